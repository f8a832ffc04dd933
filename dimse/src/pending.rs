//! Request and response correlation.
//!
//! Each side of an association keeps one [`PendingRequests`] table
//! for the requests it sent and one for the requests it received.
//! A response is only admitted if it answers a pending request
//! with the matching command field.
use std::collections::HashMap;

use snafu::{ensure, OptionExt};
use tracing::trace;

use crate::command::{Command, CommandField};
use crate::{
    DuplicateMessageIdSnafu, MessageIdsExhaustedSnafu, MismatchedResponseSnafu,
    NotARequestSnafu, NotAResponseSnafu, Result, UnmatchedResponseSnafu,
};

/// A request awaiting its final response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub presentation_context_id: u8,
    pub command_field: CommandField,
    pub affected_sop_class_uid: Option<String>,
}

/// A table of requests awaiting responses, keyed by message ID.
#[derive(Debug, Default, Clone)]
pub struct PendingRequests {
    entries: HashMap<u16, PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, message_id: u16) -> bool {
        self.entries.contains_key(&message_id)
    }

    pub fn get(&self, message_id: u16) -> Option<&PendingRequest> {
        self.entries.get(&message_id)
    }

    /// Record a request.
    ///
    /// C-CANCEL requests refer to another request
    /// and expect no response, so they are not recorded.
    pub fn register(&mut self, presentation_context_id: u8, request: &Command) -> Result<()> {
        let command_field = request.command_field()?;
        ensure!(command_field.is_request(), NotARequestSnafu { command_field });
        if command_field == CommandField::CCancelRq {
            return Ok(());
        }
        let message_id = request.message_id()?;
        ensure!(
            !self.entries.contains_key(&message_id),
            DuplicateMessageIdSnafu { message_id }
        );
        trace!("Message {} ({:?}) pending", message_id, command_field);
        self.entries.insert(
            message_id,
            PendingRequest {
                presentation_context_id,
                command_field,
                affected_sop_class_uid: request.affected_sop_class_uid(),
            },
        );
        Ok(())
    }

    /// Match a response against its pending request.
    ///
    /// The request stays pending while the status is pending
    /// and is removed on a final status.
    pub fn resolve(&mut self, response: &Command) -> Result<PendingRequest> {
        let command_field = response.command_field()?;
        ensure!(command_field.is_response(), NotAResponseSnafu { command_field });
        let message_id = response.message_id_being_responded_to()?;
        let request = self
            .entries
            .get(&message_id)
            .context(UnmatchedResponseSnafu { message_id })?;
        if let Some(expected) = request.command_field.response() {
            ensure!(
                expected == command_field,
                MismatchedResponseSnafu {
                    message_id,
                    expected,
                    got: command_field
                }
            );
        }
        let request = request.clone();
        if response.status()?.is_final() {
            trace!("Message {} answered", message_id);
            self.entries.remove(&message_id);
        }
        Ok(request)
    }

    /// Forget a request without a response,
    /// such as when the association ends.
    pub fn remove(&mut self, message_id: u16) -> Option<PendingRequest> {
        self.entries.remove(&message_id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Hands out message IDs for new requests.
///
/// IDs wrap around, skipping 0 and any ID still pending.
#[derive(Debug, Clone)]
pub struct MessageIdAllocator {
    next: u16,
}

impl Default for MessageIdAllocator {
    fn default() -> Self {
        MessageIdAllocator { next: 1 }
    }
}

impl MessageIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the given message ID.
    pub fn starting_at(next: u16) -> Self {
        MessageIdAllocator { next: next.max(1) }
    }

    /// Take the next message ID which is not pending.
    ///
    /// Fails if all 65535 IDs are pending.
    pub fn allocate(&mut self, pending: &PendingRequests) -> Result<u16> {
        for _ in 0..u16::MAX {
            let id = self.next;
            self.next = match self.next.wrapping_add(1) {
                0 => 1,
                n => n,
            };
            if !pending.contains(id) {
                return Ok(id);
            }
        }
        MessageIdsExhaustedSnafu {
            pending: pending.len(),
        }
        .fail()
    }
}
