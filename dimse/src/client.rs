//! The service class user side of an association.
use std::collections::VecDeque;
use std::net::TcpStream;

use dicom_dictionary_std::uids;
use pacsnet_ul::association::{Association, Transport};
use pacsnet_ul::pdu::{AbortRQServiceProviderReason, AbortRQSource, Pdu};
use snafu::{OptionExt, ResultExt};
use tracing::{debug, warn};

use crate::command::{Command, Priority, Status};
use crate::message::{send_message, Message, MessageAssembler};
use crate::pending::{MessageIdAllocator, PendingRequests};
use crate::{
    AbortedSnafu, AssociationSnafu, NoPresentationContextSnafu, ReleasedByPeerSnafu, Result,
    UnexpectedRequestSnafu,
};

/// A requestor association issuing DIMSE requests.
///
/// Every request is recorded until its final response arrives,
/// and responses which do not answer a pending request are dropped.
#[derive(Debug)]
pub struct DimseClient<S: Transport = TcpStream> {
    association: Association<S>,
    assembler: MessageAssembler,
    ready: VecDeque<Message>,
    outbound: PendingRequests,
    ids: MessageIdAllocator,
}

impl<S: Transport> DimseClient<S> {
    /// Wrap an established association.
    pub fn new(association: Association<S>) -> Self {
        let assembler =
            MessageAssembler::new(association.accepted_presentation_contexts().map(|pc| pc.id));
        DimseClient {
            association,
            assembler,
            ready: VecDeque::new(),
            outbound: PendingRequests::new(),
            ids: MessageIdAllocator::new(),
        }
    }

    pub fn association(&self) -> &Association<S> {
        &self.association
    }

    /// Requests still waiting for a final response.
    pub fn pending_requests(&self) -> &PendingRequests {
        &self.outbound
    }

    /// The first accepted presentation context for the given abstract syntax.
    pub fn presentation_context_for(&self, abstract_syntax: &str) -> Result<u8> {
        self.association
            .accepted_presentation_contexts()
            .find(|pc| pc.abstract_syntax == abstract_syntax)
            .map(|pc| pc.id)
            .context(NoPresentationContextSnafu { abstract_syntax })
    }

    /// A message ID which no outstanding request uses.
    pub fn next_message_id(&mut self) -> Result<u16> {
        self.ids.allocate(&self.outbound)
    }

    /// Send a request, recording it as pending.
    pub fn send_request(
        &mut self,
        presentation_context_id: u8,
        request: &Command,
        dataset: Option<&[u8]>,
    ) -> Result<()> {
        self.outbound.register(presentation_context_id, request)?;
        send_message(&mut self.association, presentation_context_id, request, dataset)
    }

    /// Wait for the next response to a pending request.
    ///
    /// A release request from the peer is confirmed
    /// and reported as [`ReleasedByPeer`](crate::Error::ReleasedByPeer).
    /// Requests from the peer are not served here
    /// and yield [`UnexpectedRequest`](crate::Error::UnexpectedRequest).
    pub fn receive_response(&mut self) -> Result<Message> {
        loop {
            while let Some(message) = self.ready.pop_front() {
                let command_field = message.command.command_field()?;
                if command_field.is_request() {
                    return UnexpectedRequestSnafu { command_field }.fail();
                }
                match self.outbound.resolve(&message.command) {
                    Ok(_) => return Ok(message),
                    Err(e) => warn!("Discarding response: {}", snafu::Report::from_error(e)),
                }
            }

            match self.association.receive().context(AssociationSnafu)? {
                Pdu::PData { data } => {
                    for pdv in data {
                        match self.assembler.push(pdv) {
                            Ok(Some(message)) => self.ready.push_back(message),
                            Ok(None) => {}
                            Err(e) => {
                                self.association.abort_with(AbortRQSource::ServiceProvider(
                                    AbortRQServiceProviderReason::UnexpectedPduParameter,
                                ));
                                return Err(e);
                            }
                        }
                    }
                }
                Pdu::ReleaseRQ => {
                    debug!("Peer requested release");
                    self.association.respond_release().context(AssociationSnafu)?;
                    self.outbound.clear();
                    return ReleasedByPeerSnafu.fail();
                }
                Pdu::AbortRQ { source } => {
                    self.outbound.clear();
                    return AbortedSnafu {
                        abort_source: source,
                    }
                    .fail();
                }
                pdu => warn!("Ignoring {}", pdu.short_description()),
            }
        }
    }

    /// Wait for the final response to the given request,
    /// skipping pending responses and responses to other requests.
    fn final_response_to(&mut self, message_id: u16) -> Result<Message> {
        loop {
            let message = self.receive_response()?;
            if message.command.message_id_being_responded_to()? != message_id {
                debug!("Skipping response to another request");
                continue;
            }
            if message.command.status()?.is_final() {
                return Ok(message);
            }
        }
    }

    /// Issue a C-ECHO request and wait for its response.
    pub fn echo(&mut self) -> Result<Status> {
        let message_id = self.next_message_id()?;
        self.echo_with_message_id(message_id)
    }

    /// Issue a C-ECHO request with the given message ID.
    pub fn echo_with_message_id(&mut self, message_id: u16) -> Result<Status> {
        let presentation_context_id = self.presentation_context_for(uids::VERIFICATION)?;
        self.send_request(presentation_context_id, &Command::echo_rq(message_id), None)?;
        self.final_response_to(message_id)?.command.status()
    }

    /// Issue a C-STORE request for the given data set,
    /// already encoded in the transfer syntax of the presentation context.
    pub fn store(
        &mut self,
        presentation_context_id: u8,
        sop_class_uid: &str,
        sop_instance_uid: &str,
        dataset: &[u8],
    ) -> Result<Status> {
        let message_id = self.next_message_id()?;
        let request =
            Command::store_rq(message_id, sop_class_uid, sop_instance_uid, Priority::Medium);
        self.send_request(presentation_context_id, &request, Some(dataset))?;
        self.final_response_to(message_id)?.command.status()
    }

    /// Release the association gracefully.
    pub fn release(mut self) -> Result<()> {
        if !self.outbound.is_empty() {
            warn!(
                "Releasing with {} request(s) still pending",
                self.outbound.len()
            );
        }
        self.association.release().context(AssociationSnafu)
    }

    /// Abort the association.
    pub fn abort(mut self) -> Result<()> {
        self.association.abort().context(AssociationSnafu)
    }
}
