//! The verification service from the service user side.
//!
//! [`verify`] establishes an association,
//! issues one C-ECHO and releases the association.
//! Every way this can go wrong is summarised as a
//! [`VerificationFailureReason`].
use std::fmt;
use std::net::ToSocketAddrs;

use dicom_dictionary_std::uids;
use pacsnet_ul::association::{Association, ClientAssociationOptions, Error as UlError, Transport};
use snafu::{Backtrace, IntoError, Snafu};
use tracing::{info, warn};

use crate::client::DimseClient;
use crate::command::{Status, StatusCategory};
use crate::{AssociationSnafu, Error};

/// Why a verification failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum VerificationFailureReason {
    /// the peer rejected the association
    AssociationRejected,
    /// the peer accepted the association but not the verification SOP class
    NoAcceptedPresentationContext,
    /// the peer did not answer in time
    Timeout,
    /// the connection could not be made or was lost
    NetworkError,
    /// the association was aborted
    Aborted,
    /// the peer answered with something other than a C-ECHO response
    UnexpectedResponse,
    /// the peer answered with a failure status
    FailureStatus(u16),
}

impl fmt::Display for VerificationFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AssociationRejected => f.write_str("association rejected"),
            Self::NoAcceptedPresentationContext => {
                f.write_str("verification presentation context not accepted")
            }
            Self::Timeout => f.write_str("timed out"),
            Self::NetworkError => f.write_str("network error"),
            Self::Aborted => f.write_str("association aborted"),
            Self::UnexpectedResponse => f.write_str("unexpected response"),
            Self::FailureStatus(code) => write!(f, "failure status {:04X}H", code),
        }
    }
}

/// The fault reported by a failed verification.
///
/// This is a service level result,
/// separate from the protocol errors it summarises.
#[derive(Debug, Snafu)]
#[snafu(display("verification failed: {}", reason))]
pub struct VerificationFailed {
    reason: VerificationFailureReason,
    cause: Option<Error>,
    backtrace: Backtrace,
}

impl VerificationFailed {
    pub fn reason(&self) -> VerificationFailureReason {
        self.reason
    }

    /// The underlying error, if any.
    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_ref()
    }
}

fn failed(reason: VerificationFailureReason, cause: Option<Error>) -> VerificationFailed {
    VerificationFailedSnafu { reason, cause }.build()
}

fn reason_for_association_error(e: &UlError) -> VerificationFailureReason {
    match e {
        UlError::Rejected { .. } => VerificationFailureReason::AssociationRejected,
        UlError::NoAcceptedPresentationContexts { .. } => {
            VerificationFailureReason::NoAcceptedPresentationContext
        }
        UlError::DimseTimeout { .. } | UlError::ArtimExpired { .. } => {
            VerificationFailureReason::Timeout
        }
        UlError::Aborted { .. } => VerificationFailureReason::Aborted,
        e if e.is_protocol_violation() => VerificationFailureReason::Aborted,
        _ => VerificationFailureReason::NetworkError,
    }
}

fn reason_for(e: &Error) -> VerificationFailureReason {
    match e {
        Error::Association { source, .. } => reason_for_association_error(source),
        Error::NoPresentationContext { .. } => {
            VerificationFailureReason::NoAcceptedPresentationContext
        }
        Error::Aborted { .. } | Error::ReleasedByPeer { .. } => VerificationFailureReason::Aborted,
        _ => VerificationFailureReason::UnexpectedResponse,
    }
}

/// Verify that the node at the given address is reachable,
/// using message ID 1.
///
/// The verification presentation context is added to the options.
/// Warning statuses count as success.
pub fn verify<A: ToSocketAddrs>(
    options: ClientAssociationOptions<'_>,
    address: A,
) -> Result<Status, VerificationFailed> {
    verify_with_message_id(options, address, 1)
}

/// Verify that the node at the given address is reachable,
/// using the given message ID.
pub fn verify_with_message_id<A: ToSocketAddrs>(
    options: ClientAssociationOptions<'_>,
    address: A,
    message_id: u16,
) -> Result<Status, VerificationFailed> {
    let association = options
        .with_abstract_syntax(uids::VERIFICATION)
        .establish(address)
        .map_err(|e| {
            let reason = reason_for_association_error(&e);
            warn!("Could not establish association: {}", snafu::Report::from_error(&e));
            failed(reason, Some(AssociationSnafu.into_error(e)))
        })?;
    verify_association(association, message_id)
}

/// Issue a C-ECHO on an established association,
/// then release it.
pub fn verify_association<S: Transport>(
    association: Association<S>,
    message_id: u16,
) -> Result<Status, VerificationFailed> {
    let mut client = DimseClient::new(association);
    let status = match client.echo_with_message_id(message_id) {
        Ok(status) => status,
        Err(e) => {
            let reason = reason_for(&e);
            let _ = client.abort();
            return Err(failed(reason, Some(e)));
        }
    };
    info!("C-ECHO response status: {}", status);

    if let Err(e) = client.release() {
        warn!("Could not release association: {}", snafu::Report::from_error(e));
    }
    match status.category() {
        StatusCategory::Success | StatusCategory::Warning => Ok(status),
        _ => Err(failed(
            VerificationFailureReason::FailureStatus(status.code()),
            None,
        )),
    }
}
