//! Association requester module
//!
//! The module provides the means to request an association
//! from another application entity.
//! See [`ClientAssociationOptions`]
//! for details and examples on how to create an association.
use std::{
    borrow::Cow,
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use snafu::{ensure, OptionExt, ResultExt};
use tracing::{debug, warn};

use crate::{
    negotiation,
    pdu::{
        max_length_of, AbortRQServiceProviderReason, AbortRQSource, AssociationAC, AssociationRQ,
        Pdu, PresentationContextProposed, UserVariableItem, APPLICATION_CONTEXT_NAME,
        DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE,
    },
    IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME,
};

use super::{
    AbortedSnafu, Association, AssociationParameters, ConfigureTransportSnafu, ConnectSnafu,
    Event, InvalidMaxPduSnafu, MissingAbstractSyntaxSnafu, NoAddressSnafu,
    NoAcceptedPresentationContextsSnafu, ProtocolVersionMismatchSnafu, RejectedSnafu, Result,
    Role, Timeouts, Transport, UnexpectedPduSnafu, UnrecognizedPduSnafu,
};

/// A DICOM association builder for a client node.
/// The final outcome is an [`Association`] in the `Open` state.
///
/// # Example
///
/// ```no_run
/// # use pacsnet_ul::association::client::ClientAssociationOptions;
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let association = ClientAssociationOptions::new()
///    .with_presentation_context("1.2.840.10008.1.1", vec!["1.2.840.10008.1.2.1", "1.2.840.10008.1.2"])
///    .establish("129.168.0.5:104")?;
/// # Ok(())
/// # }
/// ```
///
/// At least one presentation context must be specified,
/// either through [`with_presentation_context`](Self::with_presentation_context)
/// or [`with_abstract_syntax`](Self::with_abstract_syntax),
/// the latter proposing _Explicit VR Little Endian_
/// and _Implicit VR Little Endian_.
#[derive(Debug, Clone)]
pub struct ClientAssociationOptions<'a> {
    calling_ae_title: Cow<'a, str>,
    called_ae_title: Cow<'a, str>,
    application_context_name: Cow<'a, str>,
    presentation_contexts: Vec<(Cow<'a, str>, Vec<Cow<'a, str>>)>,
    protocol_version: u16,
    /// the maximum PDU length requested for receiving PDUs
    max_pdu_length: u32,
    strict: bool,
    artim_timeout: Option<Duration>,
    dimse_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    connection_timeout: Option<Duration>,
}

impl Default for ClientAssociationOptions<'_> {
    fn default() -> Self {
        ClientAssociationOptions {
            calling_ae_title: "THIS-SCU".into(),
            called_ae_title: "ANY-SCP".into(),
            application_context_name: APPLICATION_CONTEXT_NAME.into(),
            presentation_contexts: Vec::new(),
            protocol_version: 1,
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
            artim_timeout: Some(Duration::from_secs(30)),
            dimse_timeout: None,
            write_timeout: None,
            connection_timeout: None,
        }
    }
}

impl<'a> ClientAssociationOptions<'a> {
    /// Create a new set of options for establishing an association.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the calling application entity title for the association,
    /// which refers to this DICOM node.
    ///
    /// The default is `THIS-SCU`.
    pub fn calling_ae_title<T>(mut self, calling_ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.calling_ae_title = calling_ae_title.into();
        self
    }

    /// Define the called application entity title for the association,
    /// which refers to the target DICOM node.
    ///
    /// The default is `ANY-SCP`.
    pub fn called_ae_title<T>(mut self, called_ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.called_ae_title = called_ae_title.into();
        self
    }

    /// Include this presentation context
    /// in the list of proposed presentation contexts,
    /// with transfer syntaxes in order of preference.
    pub fn with_presentation_context<T>(
        mut self,
        abstract_syntax_uid: T,
        transfer_syntax_uids: Vec<T>,
    ) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let transfer_syntaxes: Vec<Cow<'a, str>> = transfer_syntax_uids
            .into_iter()
            .map(|t| t.into())
            .collect();
        self.presentation_contexts
            .push((abstract_syntax_uid.into(), transfer_syntaxes));
        self
    }

    /// Helper to add this abstract syntax
    /// with the default transfer syntaxes
    /// to the list of proposed presentation contexts.
    pub fn with_abstract_syntax<T>(self, abstract_syntax_uid: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let default_transfer_syntaxes: Vec<Cow<'a, str>> =
            vec!["1.2.840.10008.1.2.1".into(), "1.2.840.10008.1.2".into()];
        self.with_presentation_context(abstract_syntax_uid.into(), default_transfer_syntaxes)
    }

    /// Override the maximum PDU length
    /// that this application entity will admit.
    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// Override strict mode:
    /// whether receiving PDUs must not
    /// surpass the negotiated maximum PDU length.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set how long to wait for the peer's answer
    /// to an association or release request.
    ///
    /// The default is 30 seconds.
    pub fn artim_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.artim_timeout = timeout;
        self
    }

    /// Set how long to wait for the next message
    /// while the association is open.
    ///
    /// The default is to wait indefinitely.
    pub fn dimse_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dimse_timeout = timeout;
        self
    }

    /// Set the write timeout of the transport.
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the TCP connection timeout.
    pub fn connection_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Connect to the given address and negotiate an association.
    pub fn establish<A: ToSocketAddrs>(self, address: A) -> Result<Association<TcpStream>> {
        let socket = match self.connection_timeout {
            Some(timeout) => {
                let addr = address
                    .to_socket_addrs()
                    .context(ConnectSnafu)?
                    .next()
                    .context(NoAddressSnafu)?;
                TcpStream::connect_timeout(&addr, timeout).context(ConnectSnafu)?
            }
            None => TcpStream::connect(address).context(ConnectSnafu)?,
        };
        self.establish_with(socket)
    }

    /// Negotiate an association over an already connected transport.
    pub fn establish_with<S: Transport>(self, mut transport: S) -> Result<Association<S>> {
        let ClientAssociationOptions {
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            protocol_version,
            max_pdu_length,
            strict,
            artim_timeout,
            dimse_timeout,
            write_timeout,
            connection_timeout: _,
        } = self;

        // presentation contexts represent intent, they cannot be omitted
        ensure!(
            !presentation_contexts.is_empty(),
            MissingAbstractSyntaxSnafu
        );
        ensure!(
            (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&max_pdu_length),
            InvalidMaxPduSnafu { max_pdu_length }
        );

        transport
            .set_write_timeout(write_timeout)
            .context(ConfigureTransportSnafu)?;

        let proposed: Vec<_> = presentation_contexts
            .into_iter()
            .enumerate()
            .map(|(i, (abstract_syntax, transfer_syntaxes))| PresentationContextProposed {
                id: (i * 2 + 1) as u8,
                abstract_syntax: abstract_syntax.to_string(),
                transfer_syntaxes: transfer_syntaxes.iter().map(|ts| ts.to_string()).collect(),
            })
            .collect();

        let parameters = AssociationParameters {
            calling_ae_title: calling_ae_title.to_string(),
            called_ae_title: called_ae_title.to_string(),
            peer_address: transport.peer_addr(),
            protocol_version,
            application_context_name: application_context_name.to_string(),
            presentation_contexts: vec![],
            requestor_max_pdu_length: max_pdu_length,
            acceptor_max_pdu_length: DEFAULT_MAX_PDU,
            peer_user_variables: vec![],
        };
        let mut association = Association::new(
            Role::Requestor,
            transport,
            parameters,
            max_pdu_length,
            strict,
            Timeouts {
                artim: artim_timeout,
                dimse: dimse_timeout,
            },
        );

        let rq = Pdu::AssociationRQ(AssociationRQ {
            protocol_version,
            calling_ae_title: calling_ae_title.to_string(),
            called_ae_title: called_ae_title.to_string(),
            application_context_name: application_context_name.to_string(),
            presentation_contexts: proposed.clone(),
            user_variables: vec![
                UserVariableItem::MaxLength(max_pdu_length),
                UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
                UserVariableItem::ImplementationVersionName(
                    IMPLEMENTATION_VERSION_NAME.to_string(),
                ),
            ],
        });
        association.transition(Event::RequestSent)?;
        association.write_pdu(&rq)?;

        match association.read_negotiation_pdu()? {
            Pdu::AssociationAC(ac) => {
                accept_response(&mut association, ac, &proposed)?;
                Ok(association)
            }
            Pdu::AssociationRJ(association_rj) => {
                warn!("Association rejected: {}", association_rj.source);
                association.transition(Event::Rejected)?;
                association.close_transport();
                RejectedSnafu { association_rj }.fail()
            }
            Pdu::AbortRQ { source } => {
                association.transition(Event::AbortReceived)?;
                association.close_transport();
                AbortedSnafu {
                    abort_source: source,
                }
                .fail()
            }
            Pdu::Unknown { pdu_type, .. } => {
                association.abort_with(AbortRQSource::ServiceProvider(
                    AbortRQServiceProviderReason::UnrecognizedPdu,
                ));
                UnrecognizedPduSnafu { pdu_type }.fail()
            }
            pdu => {
                association.abort_with(AbortRQSource::ServiceProvider(
                    AbortRQServiceProviderReason::UnexpectedPdu,
                ));
                UnexpectedPduSnafu {
                    pdu: Box::new(pdu),
                    state: super::State::Requesting,
                }
                .fail()
            }
        }
    }
}

/// Apply an A-ASSOCIATE-AC to a requesting association.
fn accept_response<S: Transport>(
    association: &mut Association<S>,
    ac: AssociationAC,
    proposed: &[PresentationContextProposed],
) -> Result<()> {
    let AssociationAC {
        protocol_version,
        presentation_contexts,
        user_variables,
        ..
    } = ac;

    let expected = association.parameters().protocol_version;
    if protocol_version != expected {
        association.abort_with(AbortRQSource::ServiceUser);
        return ProtocolVersionMismatchSnafu {
            expected,
            got: protocol_version,
        }
        .fail();
    }

    let negotiated = negotiation::reconcile(proposed, &presentation_contexts);
    let any_accepted = negotiated.iter().any(|pc| pc.is_accepted());
    {
        let parameters = association.parameters_mut();
        parameters.acceptor_max_pdu_length =
            max_length_of(&user_variables).unwrap_or(DEFAULT_MAX_PDU);
        parameters.presentation_contexts = negotiated;
        parameters.peer_user_variables = user_variables;
    }
    association.transition(Event::Accepted)?;

    if !any_accepted {
        association.abort_with(AbortRQSource::ServiceUser);
        return NoAcceptedPresentationContextsSnafu.fail();
    }
    debug!(
        "Association with {} established, peer max PDU length {}",
        association.peer_ae_title(),
        association.peer_max_pdu_length()
    );
    Ok(())
}
