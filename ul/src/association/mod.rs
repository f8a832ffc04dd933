//! DICOM association module
//!
//! This module contains the association state machine
//! and the [`Association`] type driving it over a [`Transport`].
//!
//! As an association requester, often as a service class user (SCU),
//! a new association is started
//! via [`ClientAssociationOptions`].
//!
//! As an association acceptor,
//! usually taking the role of a service class provider (SCP),
//! a newly accepted [TCP stream][1] is passed to
//! a previously prepared [`ServerAssociationOptions`].
//!
//! [1]: std::net::TcpStream
pub mod client;
pub mod pdata;
pub mod server;
pub mod state;

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use bytes::BytesMut;
use snafu::{ensure, Backtrace, IntoError, OptionExt, ResultExt, Snafu};
use tracing::{debug, trace, warn};

use crate::pdu::{
    self, AbortRQServiceProviderReason, AbortRQSource, AssociationAC, AssociationRJ,
    PDataValueType, Pdu, PresentationContextNegotiated, UserVariableItem, MAXIMUM_PDU_SIZE,
    PDU_HEADER_SIZE,
};

pub use client::ClientAssociationOptions;
pub use server::{
    AcceptAny, AcceptCalledAeTitle, AcceptCallingAeTitles, AccessControl,
    ServerAssociationOptions,
};
pub use state::{Event, InvalidTransition, State, StateMachine};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// missing abstract syntax to begin negotiation
    MissingAbstractSyntax { backtrace: Backtrace },

    #[snafu(display("invalid maximum PDU length {}", max_pdu_length))]
    InvalidMaxPdu {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    /// could not connect to the peer
    Connect {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// the peer address did not resolve to any socket address
    NoAddress { backtrace: Backtrace },

    /// could not configure the transport
    ConfigureTransport {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to encode PDU
    EncodePdu {
        #[snafu(backtrace)]
        source: crate::pdu::writer::Error,
    },

    /// failed to send PDU on the wire
    WireSend {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to read from the wire
    WireRead {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// received a malformed PDU
    MalformedPdu {
        #[snafu(backtrace)]
        source: crate::pdu::reader::Error,
    },

    #[snafu(display("unrecognized PDU type {:#04x}", pdu_type))]
    UnrecognizedPdu { pdu_type: u8, backtrace: Backtrace },

    #[snafu(display("unexpected PDU {} in state {}", pdu.short_description(), state))]
    UnexpectedPdu {
        pdu: Box<Pdu>,
        state: State,
        backtrace: Backtrace,
    },

    #[snafu(display("protocol version mismatch: expected {}, got {}", expected, got))]
    ProtocolVersionMismatch {
        expected: u16,
        got: u16,
        backtrace: Backtrace,
    },

    #[snafu(display("association rejected: {}", association_rj.source))]
    Rejected {
        association_rj: AssociationRJ,
        backtrace: Backtrace,
    },

    #[snafu(display("association aborted by the peer ({})", abort_source))]
    Aborted {
        abort_source: AbortRQSource,
        backtrace: Backtrace,
    },

    /// no presentation contexts accepted
    NoAcceptedPresentationContexts { backtrace: Backtrace },

    #[snafu(display("ARTIM timer expired in state {}", state))]
    ArtimExpired { state: State, backtrace: Backtrace },

    /// no PDU received within the DIMSE timeout
    DimseTimeout { backtrace: Backtrace },

    /// connection closed by the peer
    ConnectionClosed { backtrace: Backtrace },

    #[snafu(display(
        "PDU is too large ({} bytes) to be sent to the peer (maximum is {})",
        length,
        max_pdu_length
    ))]
    SendTooLongPdu {
        length: usize,
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    /// the association is closed
    Closed { backtrace: Backtrace },

    #[snafu(display("cannot {} in state {}", operation, state))]
    InvalidState {
        operation: &'static str,
        state: State,
        backtrace: Backtrace,
    },

    #[snafu(display("no accepted presentation context with ID {}", id))]
    UnknownPresentationContext { id: u8, backtrace: Backtrace },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the error stems from the transport:
    /// a failed read or write, or the peer closing the connection.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            Error::Connect { .. }
                | Error::WireSend { .. }
                | Error::WireRead { .. }
                | Error::ConnectionClosed { .. }
        )
    }

    /// Whether the error is a protocol violation by the peer.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::MalformedPdu { .. }
                | Error::UnrecognizedPdu { .. }
                | Error::UnexpectedPdu { .. }
                | Error::ProtocolVersionMismatch { .. }
        )
    }
}

/// A bidirectional byte stream carrying one association.
///
/// Implemented for [`TcpStream`].
/// Other implementations make it possible to run associations
/// over in-memory pipes.
pub trait Transport: Read + Write {
    /// Release the transport.
    ///
    /// The association calls this exactly once.
    fn close(&mut self) -> std::io::Result<()>;

    /// Set how long a read may block.
    /// `None` blocks indefinitely.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()>;

    /// Set how long a write may block.
    /// `None` blocks indefinitely.
    fn set_write_timeout(&mut self, _timeout: Option<Duration>) -> std::io::Result<()> {
        Ok(())
    }

    /// The network address of the peer, if any.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl Transport for TcpStream {
    fn close(&mut self) -> std::io::Result<()> {
        self.shutdown(Shutdown::Both)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }
}

/// Which side of the association this node is.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    Requestor,
    Acceptor,
}

/// The parameters of an association,
/// fixed once negotiation completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationParameters {
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub peer_address: Option<SocketAddr>,
    pub protocol_version: u16,
    pub application_context_name: String,
    /// All presentation contexts, accepted or not, in proposal order
    pub presentation_contexts: Vec<PresentationContextNegotiated>,
    /// The maximum PDU length which the requestor can receive.
    /// 0 stands for unlimited.
    pub requestor_max_pdu_length: u32,
    /// The maximum PDU length which the acceptor can receive.
    /// 0 stands for unlimited.
    pub acceptor_max_pdu_length: u32,
    /// User information items sent by the peer
    pub peer_user_variables: Vec<UserVariableItem>,
}

/// Timer and framing settings shared by both roles.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Timeouts {
    pub artim: Option<Duration>,
    pub dimse: Option<Duration>,
}

/// Outcome of pulling bytes for the next PDU.
enum ReadFailure {
    Timeout,
    Eof,
    Io(std::io::Error),
    Malformed(crate::pdu::reader::Error),
}

/// A DICOM upper layer association,
/// from the perspective of either the requestor or the acceptor.
///
/// The transport is owned by the association
/// and released exactly once,
/// whichever way the association ends:
/// release, local abort, peer abort, timeout or transport failure.
/// Dropping a live association aborts it.
#[derive(Debug)]
pub struct Association<S: Transport = TcpStream> {
    role: Role,
    machine: StateMachine,
    transport: Option<S>,
    read_buffer: BytesMut,
    parameters: AssociationParameters,
    /// maximum length of PDUs which this node receives
    local_max_pdu_length: u32,
    strict: bool,
    timeouts: Timeouts,
    /// the response to send when an acceptor accepts
    pending_ac: Option<AssociationAC>,
}

impl<S: Transport> Association<S> {
    pub(crate) fn new(
        role: Role,
        transport: S,
        parameters: AssociationParameters,
        local_max_pdu_length: u32,
        strict: bool,
        timeouts: Timeouts,
    ) -> Self {
        Association {
            role,
            machine: StateMachine::new(),
            transport: Some(transport),
            read_buffer: BytesMut::with_capacity(
                (local_max_pdu_length.min(MAXIMUM_PDU_SIZE) + PDU_HEADER_SIZE) as usize,
            ),
            parameters,
            local_max_pdu_length,
            strict,
            timeouts,
            pending_ac: None,
        }
    }

    /// The current state of the association.
    pub fn state(&self) -> State {
        self.machine.state()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The negotiated association parameters.
    pub fn parameters(&self) -> &AssociationParameters {
        &self.parameters
    }

    /// All negotiated presentation contexts, including rejected ones.
    pub fn presentation_contexts(&self) -> &[PresentationContextNegotiated] {
        &self.parameters.presentation_contexts
    }

    /// The accepted presentation contexts.
    pub fn accepted_presentation_contexts(
        &self,
    ) -> impl Iterator<Item = &PresentationContextNegotiated> {
        self.parameters
            .presentation_contexts
            .iter()
            .filter(|pc| pc.is_accepted())
    }

    /// Look up an accepted presentation context by ID.
    pub fn presentation_context(&self, id: u8) -> Option<&PresentationContextNegotiated> {
        self.accepted_presentation_contexts().find(|pc| pc.id == id)
    }

    /// The AE title of the other node.
    pub fn peer_ae_title(&self) -> &str {
        match self.role {
            Role::Requestor => &self.parameters.called_ae_title,
            Role::Acceptor => &self.parameters.calling_ae_title,
        }
    }

    /// The maximum length of PDUs sent to the peer.
    /// An unlimited peer is reported as `u32::MAX`.
    pub fn peer_max_pdu_length(&self) -> u32 {
        let announced = match self.role {
            Role::Requestor => self.parameters.acceptor_max_pdu_length,
            Role::Acceptor => self.parameters.requestor_max_pdu_length,
        };
        if announced == 0 {
            u32::MAX
        } else {
            announced
        }
    }

    /// The maximum length of PDUs which this node expects to receive.
    pub fn local_max_pdu_length(&self) -> u32 {
        self.local_max_pdu_length
    }

    /// Access the underlying transport,
    /// unless the association is closed.
    pub fn transport(&self) -> Option<&S> {
        self.transport.as_ref()
    }

    /// Receive the next PDU from the peer.
    ///
    /// - In `Open`, P-DATA-TF PDUs are returned as is.
    ///   An A-RELEASE-RQ moves to `Releasing`:
    ///   answer it with [`respond_release`](Self::respond_release).
    /// - In `Releasing`, the requestor receives the A-RELEASE-RP
    ///   and the association closes.
    /// - An A-ABORT from the peer closes the association
    ///   and is returned as `Pdu::AbortRQ`.
    ///
    /// A read timeout in `Open` yields [`Error::DimseTimeout`]
    /// and leaves the association open.
    /// Any other failure closes the association,
    /// aborting it first when the peer violated the protocol.
    pub fn receive(&mut self) -> Result<Pdu> {
        let state = self.state();
        ensure!(state.is_live(), ClosedSnafu);
        ensure!(
            matches!(state, State::Open | State::Releasing),
            InvalidStateSnafu {
                operation: "receive",
                state
            }
        );
        let timeout = if state == State::Open {
            self.timeouts.dimse
        } else {
            self.timeouts.artim
        };
        self.set_read_timeout(timeout)?;

        let pdu = match self.read_next_pdu() {
            Ok(pdu) => pdu,
            Err(failure) => return Err(self.fail_read(failure)),
        };
        trace!("Received {}", pdu.short_description());
        self.process_incoming(pdu)
    }

    fn process_incoming(&mut self, pdu: Pdu) -> Result<Pdu> {
        match (self.state(), pdu) {
            (State::Open, pdu @ Pdu::PData { .. }) => {
                self.transition(Event::Data)?;
                Ok(pdu)
            }
            (State::Open, Pdu::ReleaseRQ) => {
                self.transition(Event::ReleaseRequested)?;
                Ok(Pdu::ReleaseRQ)
            }
            (State::Releasing, Pdu::ReleaseRP) if self.role == Role::Requestor => {
                self.transition(Event::ReleaseCompleted)?;
                self.close_transport();
                Ok(Pdu::ReleaseRP)
            }
            (_, Pdu::AbortRQ { source }) => {
                warn!("Association aborted by peer: {}", source);
                self.transition(Event::AbortReceived)?;
                self.close_transport();
                Ok(Pdu::AbortRQ { source })
            }
            (_, Pdu::Unknown { pdu_type, .. }) => {
                self.abort_with(AbortRQSource::ServiceProvider(
                    AbortRQServiceProviderReason::UnrecognizedPdu,
                ));
                UnrecognizedPduSnafu { pdu_type }.fail()
            }
            (state, pdu) => {
                self.abort_with(AbortRQSource::ServiceProvider(
                    AbortRQServiceProviderReason::UnexpectedPdu,
                ));
                UnexpectedPduSnafu {
                    pdu: Box::new(pdu),
                    state,
                }
                .fail()
            }
        }
    }

    /// Send a PDU to the peer.
    ///
    /// Only P-DATA-TF, A-RELEASE-RQ (requestor), A-RELEASE-RP
    /// and A-ABORT PDUs may be sent this way.
    /// PDUs longer than the peer's maximum are refused
    /// and leave the association untouched.
    /// A failed write closes the association.
    pub fn send(&mut self, pdu: &Pdu) -> Result<()> {
        let state = self.state();
        ensure!(state.is_live(), ClosedSnafu);
        let event = match pdu {
            Pdu::PData { .. } => Event::Data,
            Pdu::ReleaseRQ if self.role == Role::Requestor => Event::ReleaseRequested,
            Pdu::ReleaseRP => Event::ReleaseCompleted,
            Pdu::AbortRQ { .. } => return self.abort(),
            _ => {
                return InvalidStateSnafu {
                    operation: "send this PDU",
                    state,
                }
                .fail()
            }
        };
        ensure!(
            self.machine.admits(event),
            InvalidStateSnafu {
                operation: "send this PDU",
                state
            }
        );

        let bytes = self.encode(pdu)?;
        let max_pdu_length = self.peer_max_pdu_length();
        let length = bytes.len() - PDU_HEADER_SIZE as usize;
        ensure!(
            length as u64 <= u64::from(max_pdu_length),
            SendTooLongPduSnafu {
                length,
                max_pdu_length
            }
        );
        self.write_bytes(&bytes)?;
        self.transition(event)?;
        if self.state() == State::Closed {
            self.close_transport();
        }
        Ok(())
    }

    /// Send a whole command or data set on the given presentation context,
    /// split into as many P-DATA-TF PDUs as needed.
    pub fn send_pdata(
        &mut self,
        presentation_context_id: u8,
        value_type: PDataValueType,
        data: &[u8],
    ) -> Result<()> {
        ensure!(
            self.presentation_context(presentation_context_id).is_some(),
            UnknownPresentationContextSnafu {
                id: presentation_context_id
            }
        );
        let max_pdu_length = self.peer_max_pdu_length();
        for pdu in pdata::fragment(presentation_context_id, value_type, data, max_pdu_length) {
            self.send(&pdu)?;
        }
        Ok(())
    }

    /// Gracefully release the association as the requestor.
    ///
    /// Sends an A-RELEASE-RQ and waits for the A-RELEASE-RP
    /// under the ARTIM timer.
    /// Any other PDU arriving meanwhile is a protocol violation.
    pub fn release(&mut self) -> Result<()> {
        let state = self.state();
        ensure!(
            self.role == Role::Requestor && state == State::Open,
            InvalidStateSnafu {
                operation: "release",
                state
            }
        );
        self.send(&Pdu::ReleaseRQ)?;
        match self.receive()? {
            Pdu::ReleaseRP => Ok(()),
            Pdu::AbortRQ { source } => AbortedSnafu {
                abort_source: source,
            }
            .fail(),
            pdu => UnexpectedPduSnafu {
                pdu: Box::new(pdu),
                state: State::Releasing,
            }
            .fail(),
        }
    }

    /// Answer an A-RELEASE-RQ received from the peer,
    /// closing the association.
    pub fn respond_release(&mut self) -> Result<()> {
        let state = self.state();
        ensure!(
            state == State::Releasing,
            InvalidStateSnafu {
                operation: "respond to release",
                state
            }
        );
        self.send(&Pdu::ReleaseRP)
    }

    /// Abort the association as the service user.
    ///
    /// Does nothing if the association is already closed.
    pub fn abort(&mut self) -> Result<()> {
        self.abort_with(AbortRQSource::ServiceUser);
        Ok(())
    }

    /// Abort with the given source,
    /// making a best effort to notify the peer.
    ///
    /// Does nothing if the association is already closed.
    pub fn abort_with(&mut self, source: AbortRQSource) {
        if !self.state().is_live() {
            return;
        }
        warn!("Aborting association ({})", source);
        let _ = self.machine.apply(Event::Abort);
        if self.transport.is_some() {
            if let Err(e) = self.write_pdu(&Pdu::AbortRQ { source }) {
                debug!("Could not send A-ABORT: {}", snafu::Report::from_error(e));
            }
        }
        let _ = self.machine.apply(Event::TransportClosed);
        self.close_transport();
    }

    /// Transition to `Closed` because the ARTIM timer fired.
    fn expire_artim(&mut self) -> Error {
        let state = self.state();
        warn!("ARTIM timer expired in state {}", state);
        if self.machine.apply(Event::ArtimExpired).is_ok() {
            self.abort_with(AbortRQSource::ServiceProvider(
                AbortRQServiceProviderReason::ReasonNotSpecified,
            ));
        } else {
            // awaiting the A-ASSOCIATE-RQ: nothing to abort yet
            self.shut_down();
        }
        ArtimExpiredSnafu { state }.build()
    }

    /// Close without notifying the peer.
    fn shut_down(&mut self) {
        let _ = self.machine.apply(Event::TransportClosed);
        self.close_transport();
    }

    /// Turn a read failure into an error,
    /// applying the matching state transition.
    fn fail_read(&mut self, failure: ReadFailure) -> Error {
        match failure {
            ReadFailure::Timeout if self.state() == State::Open => {
                debug!("No PDU received within the DIMSE timeout");
                DimseTimeoutSnafu.build()
            }
            ReadFailure::Timeout => self.expire_artim(),
            ReadFailure::Eof => {
                warn!("Connection closed by peer in state {}", self.state());
                self.shut_down();
                ConnectionClosedSnafu.build()
            }
            ReadFailure::Io(e) => {
                warn!("Transport failure in state {}: {}", self.state(), e);
                self.shut_down();
                WireReadSnafu.into_error(e)
            }
            ReadFailure::Malformed(e) => {
                self.abort_with(AbortRQSource::ServiceProvider(
                    AbortRQServiceProviderReason::UnrecognizedPdu,
                ));
                MalformedPduSnafu.into_error(e)
            }
        }
    }

    /// Read the next full PDU, keeping partial data across timeouts.
    fn read_next_pdu(&mut self) -> Result<Pdu, ReadFailure> {
        let mut chunk = [0_u8; 8192];
        loop {
            match pdu::reader::read_pdu_from_buf(
                &mut self.read_buffer,
                self.local_max_pdu_length,
                self.strict,
            ) {
                Ok(Some(pdu)) => return Ok(pdu),
                Ok(None) => {}
                Err(e) => return Err(ReadFailure::Malformed(e)),
            }
            let Some(transport) = self.transport.as_mut() else {
                return Err(ReadFailure::Eof);
            };
            match transport.read(&mut chunk) {
                Ok(0) => return Err(ReadFailure::Eof),
                Ok(n) => self.read_buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(ReadFailure::Timeout)
                }
                Err(e) => return Err(ReadFailure::Io(e)),
            }
        }
    }

    /// Read the next PDU during negotiation, under the ARTIM timer.
    pub(crate) fn read_negotiation_pdu(&mut self) -> Result<Pdu> {
        self.set_read_timeout(self.timeouts.artim)?;
        match self.read_next_pdu() {
            Ok(pdu) => {
                trace!("Received {}", pdu.short_description());
                Ok(pdu)
            }
            Err(failure) => Err(self.fail_read(failure)),
        }
    }

    fn encode(&self, pdu: &Pdu) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        pdu::write_pdu(&mut bytes, pdu).context(EncodePduSnafu)?;
        Ok(bytes)
    }

    /// Write a PDU without any state checks.
    pub(crate) fn write_pdu(&mut self, pdu: &Pdu) -> Result<()> {
        let bytes = self.encode(pdu)?;
        self.write_bytes(&bytes)?;
        trace!("Sent {}", pdu.short_description());
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let transport = self.transport.as_mut().context(ClosedSnafu)?;
        let outcome = transport
            .write_all(bytes)
            .and_then(|_| transport.flush());
        if let Err(e) = outcome {
            warn!("Could not write to the transport: {}", e);
            self.shut_down();
            return Err(e).context(WireSendSnafu);
        }
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match self.transport.as_mut() {
            Some(transport) => transport
                .set_read_timeout(timeout)
                .context(ConfigureTransportSnafu),
            None => ClosedSnafu.fail(),
        }
    }

    pub(crate) fn transition(&mut self, event: Event) -> Result<State> {
        let state = self.state();
        self.machine.apply(event).ok().context(InvalidStateSnafu {
            operation: "apply this event",
            state,
        })
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut AssociationParameters {
        &mut self.parameters
    }

    pub(crate) fn set_pending_ac(&mut self, ac: AssociationAC) {
        self.pending_ac = Some(ac);
    }

    pub(crate) fn take_pending_ac(&mut self) -> Option<AssociationAC> {
        self.pending_ac.take()
    }

    /// Release the transport. Subsequent calls do nothing.
    fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            debug!("Closing transport");
            if let Err(e) = transport.close() {
                debug!("Error while closing transport: {}", e);
            }
        }
    }
}

impl<S: Transport> Drop for Association<S> {
    fn drop(&mut self) {
        if self.state().is_live() && self.state() != State::Idle {
            self.abort_with(AbortRQSource::ServiceUser);
        }
        self.close_transport();
    }
}

#[cfg(test)]
pub(crate) mod tests;
