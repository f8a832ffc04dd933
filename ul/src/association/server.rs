//! Association acceptor module
//!
//! The module provides the means to accept or reject
//! association requests from other application entities.
//! See [`ServerAssociationOptions`]
//! for details and examples on how to create an association.
use std::borrow::Cow;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use pacsnet_transfer_syntax_registry::TransferSyntaxRegistry;
use snafu::{ensure, OptionExt, ResultExt};
use tracing::{debug, info, warn};

use crate::negotiation::{negotiate, PresentationContextPolicy};
use crate::pdu::{
    max_length_of, AbortRQServiceProviderReason, AbortRQSource, AssociationAC, AssociationRJ,
    AssociationRJResult, AssociationRJServiceProviderAcseReason, AssociationRJServiceUserReason,
    AssociationRJSource, AssociationRQ, Pdu, PresentationContextResult, UserIdentity,
    UserVariableItem, APPLICATION_CONTEXT_NAME, DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE,
    MINIMUM_PDU_SIZE,
};
use crate::{IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME};

use super::{
    AbortedSnafu, Association, AssociationParameters, ConfigureTransportSnafu, Event,
    InvalidMaxPduSnafu, InvalidStateSnafu, MissingAbstractSyntaxSnafu, RejectedSnafu, Result,
    Role, State, Timeouts, Transport, UnexpectedPduSnafu, UnrecognizedPduSnafu,
};

/// Common interface for application entity access control policies.
///
/// Existing implementations include [`AcceptAny`], [`AcceptCalledAeTitle`]
/// and [`AcceptCallingAeTitles`],
/// but users are free to implement their own.
pub trait AccessControl {
    /// Decide whether to accept an incoming association request
    /// based on the application entity titles and/or user identity.
    ///
    /// Returns `Ok(())` if the requester node should be given clearance.
    /// Otherwise, a concrete association RJ service user reason is given.
    fn check_access(
        &self,
        this_ae_title: &str,
        calling_ae_title: &str,
        called_ae_title: &str,
        user_identity: Option<&UserIdentity>,
    ) -> Result<(), AssociationRJServiceUserReason>;
}

/// An access control rule that accepts any incoming association request.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq)]
pub struct AcceptAny;

impl AccessControl for AcceptAny {
    fn check_access(
        &self,
        _this_ae_title: &str,
        _calling_ae_title: &str,
        _called_ae_title: &str,
        _user_identity: Option<&UserIdentity>,
    ) -> Result<(), AssociationRJServiceUserReason> {
        Ok(())
    }
}

/// An access control rule that accepts association requests
/// whose called AE title matches this node's AE title.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq)]
pub struct AcceptCalledAeTitle;

impl AccessControl for AcceptCalledAeTitle {
    fn check_access(
        &self,
        this_ae_title: &str,
        _calling_ae_title: &str,
        called_ae_title: &str,
        _user_identity: Option<&UserIdentity>,
    ) -> Result<(), AssociationRJServiceUserReason> {
        if this_ae_title.trim() == called_ae_title.trim() {
            Ok(())
        } else {
            Err(AssociationRJServiceUserReason::CalledAeTitleNotRecognized)
        }
    }
}

/// An access control rule that only accepts requests
/// from a known list of calling AE titles.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct AcceptCallingAeTitles {
    allowed: Vec<String>,
}

impl AcceptCallingAeTitles {
    pub fn new<I, T>(allowed: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        AcceptCallingAeTitles {
            allowed: allowed
                .into_iter()
                .map(|t| t.into().trim().to_string())
                .collect(),
        }
    }
}

impl AccessControl for AcceptCallingAeTitles {
    fn check_access(
        &self,
        _this_ae_title: &str,
        calling_ae_title: &str,
        _called_ae_title: &str,
        _user_identity: Option<&UserIdentity>,
    ) -> Result<(), AssociationRJServiceUserReason> {
        let calling_ae_title = calling_ae_title.trim();
        if self.allowed.iter().any(|t| t == calling_ae_title) {
            Ok(())
        } else {
            Err(AssociationRJServiceUserReason::CallingAeTitleNotRecognized)
        }
    }
}

/// A DICOM association builder for an acceptor DICOM node,
/// often taking the role of a service class provider (SCP).
///
/// Unlike the [`ClientAssociationOptions`](super::ClientAssociationOptions),
/// a value of this type can be reused for multiple connections.
///
/// Presentation contexts are negotiated
/// against a [`PresentationContextPolicy`]
/// and an explicitly constructed transfer syntax registry,
/// which defaults to the built-in entries.
///
/// Access control logic decides on
/// whether to accept or reject the association request
/// based on the _called_ and _calling_ AE titles.
/// By default any requesting node is accepted ([`AcceptAny`]).
///
/// # Example
///
/// ```no_run
/// # use std::net::TcpListener;
/// # use pacsnet_ul::association::server::ServerAssociationOptions;
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// # let tcp_listener: TcpListener = unimplemented!();
/// let scp_options = ServerAssociationOptions::new()
///    .with_presentation_context("1.2.840.10008.1.1", vec!["1.2.840.10008.1.2"]);
///
/// let (stream, _address) = tcp_listener.accept()?;
/// scp_options.establish(stream)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ServerAssociationOptions<'a, A = AcceptAny> {
    ae_access_control: A,
    ae_title: Cow<'a, str>,
    application_context_name: Cow<'a, str>,
    policy: PresentationContextPolicy,
    ts_registry: Arc<TransferSyntaxRegistry>,
    protocol_version: u16,
    max_pdu_length: u32,
    strict: bool,
    artim_timeout: Option<Duration>,
    dimse_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    reject_without_accepted_contexts: bool,
}

impl Default for ServerAssociationOptions<'_, AcceptAny> {
    fn default() -> Self {
        ServerAssociationOptions {
            ae_access_control: AcceptAny,
            ae_title: "THIS-SCP".into(),
            application_context_name: APPLICATION_CONTEXT_NAME.into(),
            policy: PresentationContextPolicy::new(),
            ts_registry: Arc::new(TransferSyntaxRegistry::with_builtin()),
            protocol_version: 1,
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
            artim_timeout: Some(Duration::from_secs(30)),
            dimse_timeout: None,
            write_timeout: None,
            reject_without_accepted_contexts: false,
        }
    }
}

impl ServerAssociationOptions<'_, AcceptAny> {
    /// Create a new set of options for establishing an association.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<'a, A> ServerAssociationOptions<'a, A>
where
    A: AccessControl,
{
    /// Change the access control policy to accept any association
    /// regardless of the specified AE titles.
    ///
    /// This is the default behavior when the options are first created.
    pub fn accept_any(self) -> ServerAssociationOptions<'a, AcceptAny> {
        self.ae_access_control(AcceptAny)
    }

    /// Change the access control policy to accept an association
    /// if the called AE title matches this node's AE title.
    pub fn accept_called_ae_title(self) -> ServerAssociationOptions<'a, AcceptCalledAeTitle> {
        self.ae_access_control(AcceptCalledAeTitle)
    }

    /// Change the access control policy to accept an association
    /// only from the given calling AE titles.
    pub fn accept_calling_ae_titles<I, T>(
        self,
        allowed: I,
    ) -> ServerAssociationOptions<'a, AcceptCallingAeTitles>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.ae_access_control(AcceptCallingAeTitles::new(allowed))
    }

    /// Change the access control policy.
    pub fn ae_access_control<P>(self, access_control: P) -> ServerAssociationOptions<'a, P>
    where
        P: AccessControl,
    {
        let ServerAssociationOptions {
            ae_access_control: _,
            ae_title,
            application_context_name,
            policy,
            ts_registry,
            protocol_version,
            max_pdu_length,
            strict,
            artim_timeout,
            dimse_timeout,
            write_timeout,
            reject_without_accepted_contexts,
        } = self;

        ServerAssociationOptions {
            ae_access_control: access_control,
            ae_title,
            application_context_name,
            policy,
            ts_registry,
            protocol_version,
            max_pdu_length,
            strict,
            artim_timeout,
            dimse_timeout,
            write_timeout,
            reject_without_accepted_contexts,
        }
    }

    /// Define the application entity title referring to this DICOM node.
    ///
    /// The default is `THIS-SCP`.
    pub fn ae_title<T>(mut self, ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.ae_title = ae_title.into();
        self
    }

    /// Support this abstract syntax
    /// with any native transfer syntax in the registry.
    pub fn with_abstract_syntax<T>(mut self, abstract_syntax_uid: T) -> Self
    where
        T: Into<String>,
    {
        self.policy = self
            .policy
            .with_abstract_syntax(abstract_syntax_uid, Vec::<String>::new());
        self
    }

    /// Support this abstract syntax
    /// with the given transfer syntaxes.
    pub fn with_presentation_context<T, U>(
        mut self,
        abstract_syntax_uid: T,
        transfer_syntax_uids: Vec<U>,
    ) -> Self
    where
        T: Into<String>,
        U: Into<String>,
    {
        self.policy = self
            .policy
            .with_abstract_syntax(abstract_syntax_uid, transfer_syntax_uids);
        self
    }

    /// Replace the whole presentation context policy.
    pub fn presentation_context_policy(mut self, policy: PresentationContextPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override promiscuous mode:
    /// whether to accept unknown abstract syntaxes.
    pub fn promiscuous(mut self, promiscuous: bool) -> Self {
        self.policy = self.policy.promiscuous(promiscuous);
        self
    }

    /// Use this transfer syntax registry during negotiation.
    pub fn transfer_syntax_registry(mut self, registry: Arc<TransferSyntaxRegistry>) -> Self {
        self.ts_registry = registry;
        self
    }

    /// Override the maximum expected PDU length.
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

    /// Set how long to wait for the association request.
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

    /// Whether [`establish`](Self::establish) rejects associations
    /// in which no presentation context was accepted.
    ///
    /// The default is `false`.
    pub fn reject_without_accepted_contexts(mut self, reject: bool) -> Self {
        self.reject_without_accepted_contexts = reject;
        self
    }

    /// The AE title of this node.
    pub fn get_ae_title(&self) -> &str {
        &self.ae_title
    }

    /// The presentation context policy in use.
    pub fn policy(&self) -> &PresentationContextPolicy {
        &self.policy
    }

    /// The transfer syntax registry in use.
    pub fn registry(&self) -> &Arc<TransferSyntaxRegistry> {
        &self.ts_registry
    }

    /// Read and evaluate an association request,
    /// leaving the association in the `Requesting` state.
    ///
    /// The caller then decides to [`accept`](Association::accept)
    /// or [`reject`](Association::reject) it.
    /// Requests failing the protocol version, application context
    /// or access control checks are rejected right away.
    pub fn receive_request<S: Transport>(&self, mut transport: S) -> Result<Association<S>> {
        ensure!(!self.policy.is_empty(), MissingAbstractSyntaxSnafu);
        ensure!(
            (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&self.max_pdu_length),
            InvalidMaxPduSnafu {
                max_pdu_length: self.max_pdu_length
            }
        );
        transport
            .set_write_timeout(self.write_timeout)
            .context(ConfigureTransportSnafu)?;

        let parameters = AssociationParameters {
            calling_ae_title: String::new(),
            called_ae_title: self.ae_title.to_string(),
            peer_address: transport.peer_addr(),
            protocol_version: self.protocol_version,
            application_context_name: self.application_context_name.to_string(),
            presentation_contexts: vec![],
            requestor_max_pdu_length: DEFAULT_MAX_PDU,
            acceptor_max_pdu_length: self.max_pdu_length,
            peer_user_variables: vec![],
        };
        let mut association = Association::new(
            Role::Acceptor,
            transport,
            parameters,
            self.max_pdu_length,
            self.strict,
            Timeouts {
                artim: self.artim_timeout,
                dimse: self.dimse_timeout,
            },
        );

        match association.read_negotiation_pdu()? {
            Pdu::AssociationRQ(rq) => {
                association.transition(Event::RequestReceived)?;
                match self.evaluate_request(rq) {
                    Ok((ac, mut parameters)) => {
                        parameters.peer_address = association.parameters().peer_address;
                        *association.parameters_mut() = parameters;
                        association.set_pending_ac(ac);
                        Ok(association)
                    }
                    Err(association_rj) => {
                        association.reject(association_rj)?;
                        RejectedSnafu { association_rj }.fail()
                    }
                }
            }
            Pdu::AbortRQ { source } => {
                association.shut_down();
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
                    state: State::Idle,
                }
                .fail()
            }
        }
    }

    /// Negotiate an association with the given transport,
    /// accepting it unless it must be rejected.
    pub fn establish<S: Transport>(&self, transport: S) -> Result<Association<S>> {
        let mut association = self.receive_request(transport)?;
        if let Some(association_rj) = self.rejection_for(&association) {
            association.reject(association_rj)?;
            return RejectedSnafu { association_rj }.fail();
        }
        association.accept()?;
        Ok(association)
    }

    /// The association-level rejection
    /// which these options impose on a received request, if any.
    ///
    /// Only associations without accepted presentation contexts
    /// are rejected, and only when
    /// [`reject_without_accepted_contexts`](Self::reject_without_accepted_contexts)
    /// is set.
    pub fn rejection_for<S: Transport>(&self, association: &Association<S>) -> Option<AssociationRJ> {
        if self.reject_without_accepted_contexts
            && association.accepted_presentation_contexts().next().is_none()
        {
            Some(AssociationRJ {
                result: AssociationRJResult::Permanent,
                source: AssociationRJSource::ServiceUser(
                    AssociationRJServiceUserReason::NoReasonGiven,
                ),
            })
        } else {
            None
        }
    }

    /// Negotiate an association over a TCP stream.
    pub fn establish_tcp(&self, stream: TcpStream) -> Result<Association<TcpStream>> {
        self.establish(stream)
    }

    /// Check an association request and negotiate its presentation contexts.
    ///
    /// Yields either the A-ASSOCIATE-AC to send with the new parameters,
    /// or the reason for rejecting the association as a whole.
    fn evaluate_request(
        &self,
        rq: AssociationRQ,
    ) -> std::result::Result<(AssociationAC, AssociationParameters), AssociationRJ> {
        let AssociationRQ {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        } = rq;

        info!(
            "Association request from {} to {}",
            calling_ae_title, called_ae_title
        );

        // only bit 0 matters for this version of the protocol
        if protocol_version & 0x0001 == 0 {
            warn!("Unsupported protocol version {:#06x}", protocol_version);
            return Err(AssociationRJ {
                result: AssociationRJResult::Permanent,
                source: AssociationRJSource::ServiceProviderAcse(
                    AssociationRJServiceProviderAcseReason::ProtocolVersionNotSupported,
                ),
            });
        }

        if application_context_name != self.application_context_name {
            warn!(
                "Unsupported application context name {}",
                application_context_name
            );
            return Err(AssociationRJ {
                result: AssociationRJResult::Permanent,
                source: AssociationRJSource::ServiceUser(
                    AssociationRJServiceUserReason::ApplicationContextNameNotSupported,
                ),
            });
        }

        let user_identity = user_variables.iter().find_map(|item| match item {
            UserVariableItem::UserIdentityItem(identity) => Some(identity),
            _ => None,
        });
        if let Err(reason) = self.ae_access_control.check_access(
            &self.ae_title,
            &calling_ae_title,
            &called_ae_title,
            user_identity,
        ) {
            warn!("Access denied to {}: {}", calling_ae_title, reason);
            return Err(AssociationRJ {
                result: AssociationRJResult::Permanent,
                source: AssociationRJSource::ServiceUser(reason),
            });
        }

        let negotiated = negotiate(&self.policy, &self.ts_registry, &presentation_contexts);
        let ac = AssociationAC {
            protocol_version: self.protocol_version,
            calling_ae_title: calling_ae_title.clone(),
            called_ae_title: called_ae_title.clone(),
            application_context_name: application_context_name.clone(),
            presentation_contexts: negotiated.iter().map(PresentationContextResult::from).collect(),
            user_variables: vec![
                UserVariableItem::MaxLength(self.max_pdu_length),
                UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
                UserVariableItem::ImplementationVersionName(
                    IMPLEMENTATION_VERSION_NAME.to_string(),
                ),
            ],
        };
        let parameters = AssociationParameters {
            calling_ae_title,
            called_ae_title,
            peer_address: None,
            protocol_version: self.protocol_version,
            application_context_name,
            presentation_contexts: negotiated,
            requestor_max_pdu_length: max_length_of(&user_variables).unwrap_or(DEFAULT_MAX_PDU),
            acceptor_max_pdu_length: self.max_pdu_length,
            peer_user_variables: user_variables,
        };
        Ok((ac, parameters))
    }
}

impl<S: Transport> Association<S> {
    /// Accept the association request received through
    /// [`ServerAssociationOptions::receive_request`],
    /// sending the A-ASSOCIATE-AC.
    pub fn accept(&mut self) -> Result<()> {
        let state = self.state();
        ensure!(
            self.role == Role::Acceptor && state == State::Requesting,
            InvalidStateSnafu {
                operation: "accept",
                state
            }
        );
        let ac = self.take_pending_ac().context(InvalidStateSnafu {
            operation: "accept",
            state,
        })?;
        self.write_pdu(&Pdu::AssociationAC(ac))?;
        self.transition(Event::Accepted)?;
        debug!(
            "Association with {} established, {} accepted presentation contexts",
            self.peer_ae_title(),
            self.accepted_presentation_contexts().count()
        );
        Ok(())
    }

    /// Reject the association request received through
    /// [`ServerAssociationOptions::receive_request`],
    /// sending the A-ASSOCIATE-RJ and closing the association.
    pub fn reject(&mut self, association_rj: AssociationRJ) -> Result<()> {
        let state = self.state();
        ensure!(
            self.role == Role::Acceptor && state == State::Requesting,
            InvalidStateSnafu {
                operation: "reject",
                state
            }
        );
        warn!("Rejecting association: {}", association_rj.source);
        self.take_pending_ac();
        self.write_pdu(&Pdu::AssociationRJ(association_rj))?;
        self.transition(Event::Rejected)?;
        self.close_transport();
        Ok(())
    }
}
