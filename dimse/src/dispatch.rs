//! Delivery of the messages of one association to a handler.
//!
//! A [`Handler`] is a table of optional callbacks,
//! one per association event.
//! Events without a callback are ignored.
//! The [`Dispatcher`] drives an established association,
//! reading PDUs one at a time
//! and invoking the callbacks in the order the messages arrive.
use std::fmt;
use std::net::TcpStream;

use pacsnet_ul::association::{Association, AssociationParameters, Error as UlError, Transport};
use pacsnet_ul::pdu::{AbortRQServiceProviderReason, AbortRQSource, AssociationRJ, Pdu, PDataValue};
use snafu::{IntoError, Report};
use tracing::{debug, info, warn};

use crate::command::{Command, CommandField, Status};
use crate::message::{send_message, Message, MessageAssembler};
use crate::pending::{MessageIdAllocator, PendingRequests};
use crate::{AssociationSnafu, Error, Result};

/// What to do with an incoming association request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociateDecision {
    Accept,
    Reject(AssociationRJ),
}

/// How the dispatching of an association ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DispatchOutcome {
    /// the association was rejected during negotiation
    Rejected,
    /// the peer released the association
    Released,
    /// either side aborted the association
    Aborted,
    /// the transport failed or the peer went silent
    NetworkError,
    /// the peer violated the protocol and the association was aborted
    ProtocolError,
}

type AssociateRequestCallback =
    Box<dyn FnMut(&AssociationParameters) -> AssociateDecision + Send>;
type MessageCallback<S> = Box<dyn FnMut(&mut DimseContext<'_, S>, Message) -> Result<()> + Send>;
type ReleaseCallback = Box<dyn FnMut() + Send>;
type AbortCallback = Box<dyn FnMut(&AbortRQSource) + Send>;
type NetworkErrorCallback = Box<dyn FnMut(&Error) + Send>;
type TimeoutCallback = Box<dyn FnMut() + Send>;

/// The callbacks of one association.
///
/// A new handler is made for every accepted association,
/// so callbacks may keep per-association state.
///
/// ```no_run
/// # use pacsnet_dimse::{Handler, Status};
/// let handler: Handler = Handler::new()
///     .on_request(|ctx, message| ctx.respond(&message, Status::SUCCESS))
///     .on_network_error(|e| eprintln!("{}", e));
/// ```
pub struct Handler<S: Transport = TcpStream> {
    associate_request: Option<AssociateRequestCallback>,
    request: Option<MessageCallback<S>>,
    response: Option<MessageCallback<S>>,
    release_request: Option<ReleaseCallback>,
    abort: Option<AbortCallback>,
    network_error: Option<NetworkErrorCallback>,
    dimse_timeout: Option<TimeoutCallback>,
}

impl<S: Transport> Default for Handler<S> {
    fn default() -> Self {
        Handler {
            associate_request: None,
            request: None,
            response: None,
            release_request: None,
            abort: None,
            network_error: None,
            dimse_timeout: None,
        }
    }
}

impl<S: Transport> fmt::Debug for Handler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("associate_request", &self.associate_request.is_some())
            .field("request", &self.request.is_some())
            .field("response", &self.response.is_some())
            .field("release_request", &self.release_request.is_some())
            .field("abort", &self.abort.is_some())
            .field("network_error", &self.network_error.is_some())
            .field("dimse_timeout", &self.dimse_timeout.is_some())
            .finish()
    }
}

impl<S: Transport> Handler<S> {
    /// A handler ignoring every event and accepting every association.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler for the verification service:
    /// C-ECHO requests are answered with success,
    /// any other request with "unrecognized operation".
    pub fn verification() -> Self {
        Self::new().on_request(|ctx, message| {
            let command_field = message.command.command_field()?;
            match command_field {
                CommandField::CEchoRq => ctx.respond(&message, Status::SUCCESS),
                CommandField::CCancelRq => Ok(()),
                _ => {
                    warn!("Unsupported request {:?}", command_field);
                    ctx.respond(&message, Status::UNRECOGNIZED_OPERATION)
                }
            }
        })
    }

    /// Decide whether to accept an association request
    /// which passed negotiation.
    pub fn on_associate_request<F>(mut self, f: F) -> Self
    where
        F: FnMut(&AssociationParameters) -> AssociateDecision + Send + 'static,
    {
        self.associate_request = Some(Box::new(f));
        self
    }

    /// Handle a request message from the peer.
    ///
    /// The request stays pending until a final response is sent
    /// through the context.
    pub fn on_request<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut DimseContext<'_, S>, Message) -> Result<()> + Send + 'static,
    {
        self.request = Some(Box::new(f));
        self
    }

    /// Handle a response to a request sent through the context.
    /// Responses to requests which are not pending never get here.
    pub fn on_response<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut DimseContext<'_, S>, Message) -> Result<()> + Send + 'static,
    {
        self.response = Some(Box::new(f));
        self
    }

    /// Called when the peer asks to release the association,
    /// right before the release is confirmed.
    pub fn on_release_request<F>(mut self, f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.release_request = Some(Box::new(f));
        self
    }

    /// Called once when the association is aborted,
    /// by the peer or locally.
    pub fn on_abort<F>(mut self, f: F) -> Self
    where
        F: FnMut(&AbortRQSource) + Send + 'static,
    {
        self.abort = Some(Box::new(f));
        self
    }

    /// Called once when the transport fails,
    /// the peer closes the connection
    /// or the ARTIM timer expires.
    pub fn on_network_error<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Error) + Send + 'static,
    {
        self.network_error = Some(Box::new(f));
        self
    }

    /// Called whenever no PDU arrives within the DIMSE timeout.
    /// The association stays open.
    pub fn on_dimse_timeout<F>(mut self, f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.dimse_timeout = Some(Box::new(f));
        self
    }

    pub(crate) fn associate_request(&mut self, parameters: &AssociationParameters) -> AssociateDecision {
        match &mut self.associate_request {
            Some(f) => f(parameters),
            None => AssociateDecision::Accept,
        }
    }

    pub(crate) fn notify_release_request(&mut self) {
        if let Some(f) = &mut self.release_request {
            f();
        }
    }

    pub(crate) fn notify_abort(&mut self, source: &AbortRQSource) {
        if let Some(f) = &mut self.abort {
            f(source);
        }
    }

    pub(crate) fn notify_network_error(&mut self, error: &Error) {
        if let Some(f) = &mut self.network_error {
            f(error);
        }
    }

    pub(crate) fn notify_dimse_timeout(&mut self) {
        if let Some(f) = &mut self.dimse_timeout {
            f();
        }
    }
}

/// What a callback can do with the association it serves.
pub struct DimseContext<'a, S: Transport = TcpStream> {
    association: &'a mut Association<S>,
    inbound: &'a mut PendingRequests,
    outbound: &'a mut PendingRequests,
    ids: &'a mut MessageIdAllocator,
    aborted: &'a mut bool,
}

impl<'a, S: Transport> DimseContext<'a, S> {
    pub fn parameters(&self) -> &AssociationParameters {
        self.association.parameters()
    }

    pub fn peer_ae_title(&self) -> &str {
        self.association.peer_ae_title()
    }

    /// The transfer syntax agreed for an accepted presentation context.
    pub fn transfer_syntax(&self, presentation_context_id: u8) -> Option<&str> {
        self.association
            .presentation_context(presentation_context_id)
            .map(|pc| pc.transfer_syntax.as_str())
    }

    /// The first accepted presentation context for the given abstract syntax.
    pub fn presentation_context_for(&self, abstract_syntax: &str) -> Option<u8> {
        self.association
            .accepted_presentation_contexts()
            .find(|pc| pc.abstract_syntax == abstract_syntax)
            .map(|pc| pc.id)
    }

    /// Answer a request with a status and no data set,
    /// on the presentation context the request came in.
    pub fn respond(&mut self, request: &Message, status: Status) -> Result<()> {
        let response = Command::response_to(&request.command, status, false)?;
        self.send_response(request.presentation_context_id, &response, None)
    }

    /// Send a response to a pending request from the peer.
    pub fn send_response(
        &mut self,
        presentation_context_id: u8,
        response: &Command,
        dataset: Option<&[u8]>,
    ) -> Result<()> {
        self.inbound.resolve(response)?;
        send_message(self.association, presentation_context_id, response, dataset)
    }

    /// A message ID which no outstanding request uses.
    pub fn next_message_id(&mut self) -> Result<u16> {
        self.ids.allocate(self.outbound)
    }

    /// Send a request to the peer.
    /// Its responses are delivered to the response callback.
    pub fn send_request(
        &mut self,
        presentation_context_id: u8,
        request: &Command,
        dataset: Option<&[u8]>,
    ) -> Result<()> {
        self.outbound.register(presentation_context_id, request)?;
        send_message(self.association, presentation_context_id, request, dataset)
    }

    /// Requests from the peer still waiting for a final response.
    pub fn pending_requests(&self) -> &PendingRequests {
        self.inbound
    }

    /// Abort the association.
    /// Dispatching stops once the callback returns.
    pub fn abort(&mut self) {
        self.association.abort_with(AbortRQSource::ServiceUser);
        *self.aborted = true;
    }
}

/// The abort source sent for a protocol violation.
pub(crate) fn abort_source_for(error: &UlError) -> AbortRQSource {
    let reason = match error {
        UlError::MalformedPdu { .. } | UlError::UnrecognizedPdu { .. } => {
            AbortRQServiceProviderReason::UnrecognizedPdu
        }
        UlError::UnexpectedPdu { .. } => AbortRQServiceProviderReason::UnexpectedPdu,
        _ => AbortRQServiceProviderReason::ReasonNotSpecified,
    };
    AbortRQSource::ServiceProvider(reason)
}

/// Drives one established association,
/// delivering its messages to a handler.
#[derive(Debug)]
pub struct Dispatcher<S: Transport = TcpStream> {
    association: Association<S>,
    handler: Handler<S>,
    assembler: MessageAssembler,
    inbound: PendingRequests,
    outbound: PendingRequests,
    ids: MessageIdAllocator,
    aborted: bool,
}

impl<S: Transport> Dispatcher<S> {
    pub fn new(association: Association<S>, handler: Handler<S>) -> Self {
        let assembler =
            MessageAssembler::new(association.accepted_presentation_contexts().map(|pc| pc.id));
        Dispatcher {
            association,
            handler,
            assembler,
            inbound: PendingRequests::new(),
            outbound: PendingRequests::new(),
            ids: MessageIdAllocator::new(),
            aborted: false,
        }
    }

    /// Process the association until it closes.
    ///
    /// PDUs are handled one at a time:
    /// a callback returns before the next PDU is read.
    /// Whichever way the association ends,
    /// exactly one of the release, abort or network error callbacks
    /// is called, and the transport is released.
    pub fn run(mut self) -> DispatchOutcome {
        loop {
            let pdu = match self.association.receive() {
                Ok(pdu) => pdu,
                Err(UlError::DimseTimeout { .. }) => {
                    debug!("DIMSE timeout, association remains open");
                    self.handler.notify_dimse_timeout();
                    continue;
                }
                Err(e) if e.is_protocol_violation() => {
                    warn!("Protocol violation: {}", Report::from_error(&e));
                    let source = abort_source_for(&e);
                    self.handler.notify_abort(&source);
                    return DispatchOutcome::ProtocolError;
                }
                Err(e) => return self.network_error(AssociationSnafu.into_error(e)),
            };

            match pdu {
                Pdu::PData { data } => {
                    for pdv in data {
                        if let Some(outcome) = self.process_pdv(pdv) {
                            return outcome;
                        }
                    }
                }
                Pdu::ReleaseRQ => {
                    info!("Release requested by {}", self.association.peer_ae_title());
                    self.handler.notify_release_request();
                    if !self.inbound.is_empty() {
                        warn!(
                            "Releasing with {} request(s) left unanswered",
                            self.inbound.len()
                        );
                    }
                    return match self.association.respond_release() {
                        Ok(()) => DispatchOutcome::Released,
                        Err(e) => self.network_error(AssociationSnafu.into_error(e)),
                    };
                }
                Pdu::AbortRQ { source } => {
                    self.handler.notify_abort(&source);
                    return DispatchOutcome::Aborted;
                }
                pdu => {
                    warn!("Unexpected {} while open", pdu.short_description());
                    let source = AbortRQSource::ServiceProvider(
                        AbortRQServiceProviderReason::UnexpectedPdu,
                    );
                    self.association.abort_with(source);
                    self.handler.notify_abort(&source);
                    return DispatchOutcome::ProtocolError;
                }
            }
        }
    }

    fn network_error(&mut self, error: Error) -> DispatchOutcome {
        warn!("Network error: {}", Report::from_error(&error));
        self.handler.notify_network_error(&error);
        DispatchOutcome::NetworkError
    }

    fn process_pdv(&mut self, pdv: PDataValue) -> Option<DispatchOutcome> {
        match self.assembler.push(pdv) {
            Ok(Some(message)) => self.deliver(message),
            Ok(None) => None,
            Err(e) => {
                warn!("Invalid message fragment: {}", Report::from_error(&e));
                let reason = match e {
                    Error::UnknownPresentationContext { .. } => {
                        AbortRQServiceProviderReason::InvalidPduParameter
                    }
                    _ => AbortRQServiceProviderReason::UnexpectedPduParameter,
                };
                let source = AbortRQSource::ServiceProvider(reason);
                self.association.abort_with(source);
                self.handler.notify_abort(&source);
                Some(DispatchOutcome::ProtocolError)
            }
        }
    }

    fn deliver(&mut self, message: Message) -> Option<DispatchOutcome> {
        let command_field = match message.command.command_field() {
            Ok(command_field) => command_field,
            Err(e) => {
                warn!("Unreadable command: {}", Report::from_error(&e));
                let source = AbortRQSource::ServiceProvider(
                    AbortRQServiceProviderReason::InvalidPduParameter,
                );
                self.association.abort_with(source);
                self.handler.notify_abort(&source);
                return Some(DispatchOutcome::ProtocolError);
            }
        };

        if command_field.is_request() {
            if let Err(e) = self
                .inbound
                .register(message.presentation_context_id, &message.command)
            {
                return self.refuse(&message, e);
            }
        } else if let Err(e) = self.outbound.resolve(&message.command) {
            warn!("Discarding response: {}", Report::from_error(&e));
            return None;
        }

        let mut ctx = DimseContext {
            association: &mut self.association,
            inbound: &mut self.inbound,
            outbound: &mut self.outbound,
            ids: &mut self.ids,
            aborted: &mut self.aborted,
        };
        let callback = if command_field.is_request() {
            &mut self.handler.request
        } else {
            &mut self.handler.response
        };
        let result = match callback {
            Some(f) => f(&mut ctx, message),
            None => {
                debug!("No callback, ignoring {:?}", command_field);
                Ok(())
            }
        };

        if self.aborted {
            if let Err(e) = &result {
                debug!("Message handling failed after abort: {}", Report::from_error(e));
            }
            self.handler.notify_abort(&AbortRQSource::ServiceUser);
            return Some(DispatchOutcome::Aborted);
        }
        let live = self.association.state().is_live();
        match result {
            Ok(()) if live => None,
            Ok(()) => {
                // closed without an error reaching the callback
                self.handler.notify_abort(&AbortRQSource::ServiceUser);
                Some(DispatchOutcome::Aborted)
            }
            Err(e) if live => {
                warn!("Message handling failed: {}", Report::from_error(&e));
                None
            }
            Err(e) => Some(self.network_error(e)),
        }
    }

    /// Answer a request which cannot be recorded as pending
    /// with a failure status, without involving the handler.
    fn refuse(&mut self, message: &Message, error: Error) -> Option<DispatchOutcome> {
        warn!("Refusing request: {}", Report::from_error(&error));
        let status = match error {
            Error::DuplicateMessageId { .. } => Status::DUPLICATE_INVOCATION,
            _ => Status::CANNOT_UNDERSTAND,
        };
        let sent = Command::response_to(&message.command, status, false).and_then(|response| {
            send_message(
                &mut self.association,
                message.presentation_context_id,
                &response,
                None,
            )
        });
        match sent {
            Ok(()) => None,
            Err(e) if self.association.state().is_live() => {
                warn!("Could not refuse request: {}", Report::from_error(&e));
                None
            }
            Err(e) => Some(self.network_error(e)),
        }
    }

    /// The association being dispatched.
    pub fn association(&self) -> &Association<S> {
        &self.association
    }
}
