//! Whole DIMSE messages and their reassembly from P-DATA values.
use std::collections::HashSet;

use pacsnet_ul::association::{Association, Transport};
use pacsnet_ul::pdu::{PDataValue, PDataValueType};
use snafu::{ensure, ResultExt};
use tracing::trace;

use crate::command::Command;
use crate::{
    AssociationSnafu, CommandAfterCompleteSnafu, ContextSwitchSnafu, DataBeforeCommandSnafu,
    Result, UnexpectedDatasetSnafu, UnknownPresentationContextSnafu,
};

/// A DIMSE message:
/// a command set and, if the command announced one, a data set.
///
/// The data set is kept as bytes
/// in the transfer syntax of its presentation context.
#[derive(Debug, Clone)]
pub struct Message {
    pub presentation_context_id: u8,
    pub command: Command,
    pub dataset: Option<Vec<u8>>,
}

impl Message {
    pub fn new(presentation_context_id: u8, command: Command, dataset: Option<Vec<u8>>) -> Self {
        Message {
            presentation_context_id,
            command,
            dataset,
        }
    }
}

/// Send a message on an open association,
/// fragmenting the command and data set to fit the peer's maximum PDU length.
pub fn send_message<S: Transport>(
    association: &mut Association<S>,
    presentation_context_id: u8,
    command: &Command,
    dataset: Option<&[u8]>,
) -> Result<()> {
    let command_bytes = command.to_bytes()?;
    association
        .send_pdata(presentation_context_id, PDataValueType::Command, &command_bytes)
        .context(AssociationSnafu)?;
    if let Some(dataset) = dataset {
        association
            .send_pdata(presentation_context_id, PDataValueType::Data, dataset)
            .context(AssociationSnafu)?;
    }
    Ok(())
}

/// Reassembles presentation data values into whole messages.
///
/// Fragments of one message must all arrive
/// on the same accepted presentation context:
/// the command fragments first, then the data set fragments.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    accepted: HashSet<u8>,
    context_id: Option<u8>,
    command_bytes: Vec<u8>,
    command: Option<Command>,
    dataset: Vec<u8>,
    /// the previous message ended without a data set
    previous_without_dataset: bool,
}

impl MessageAssembler {
    /// Create an assembler admitting the given presentation context IDs.
    pub fn new<I>(accepted_presentation_contexts: I) -> Self
    where
        I: IntoIterator<Item = u8>,
    {
        MessageAssembler {
            accepted: accepted_presentation_contexts.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Whether no message is partially assembled.
    pub fn is_idle(&self) -> bool {
        self.context_id.is_none()
    }

    /// Feed one presentation data value,
    /// returning the message it completes, if any.
    pub fn push(&mut self, pdv: PDataValue) -> Result<Option<Message>> {
        let PDataValue {
            presentation_context_id: id,
            value_type,
            is_last,
            data,
        } = pdv;
        ensure!(
            self.accepted.contains(&id),
            UnknownPresentationContextSnafu { id }
        );
        if let Some(expected) = self.context_id {
            ensure!(expected == id, ContextSwitchSnafu { expected, got: id });
        }

        match value_type {
            PDataValueType::Command => {
                ensure!(
                    self.command.is_none(),
                    CommandAfterCompleteSnafu {
                        presentation_context_id: id
                    }
                );
                self.previous_without_dataset = false;
                self.context_id = Some(id);
                self.command_bytes.extend(data);
                if !is_last {
                    return Ok(None);
                }
                let command = Command::from_bytes(&self.command_bytes)?;
                self.command_bytes.clear();
                if command.has_dataset() {
                    self.command = Some(command);
                    Ok(None)
                } else {
                    trace!("Assembled message without data set on context {}", id);
                    self.context_id = None;
                    self.previous_without_dataset = true;
                    Ok(Some(Message::new(id, command, None)))
                }
            }
            PDataValueType::Data => {
                ensure!(
                    !(self.command.is_none() && self.previous_without_dataset),
                    UnexpectedDatasetSnafu {
                        presentation_context_id: id
                    }
                );
                let Some(command) = self.command.take() else {
                    return DataBeforeCommandSnafu {
                        presentation_context_id: id,
                    }
                    .fail();
                };
                self.dataset.extend(data);
                if !is_last {
                    self.command = Some(command);
                    return Ok(None);
                }
                trace!(
                    "Assembled message with {} byte data set on context {}",
                    self.dataset.len(),
                    id
                );
                self.context_id = None;
                let dataset = std::mem::take(&mut self.dataset);
                Ok(Some(Message::new(id, command, Some(dataset))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandField, Priority};
    use crate::Error;
    use matches::assert_matches;

    fn pdv(id: u8, value_type: PDataValueType, is_last: bool, data: &[u8]) -> PDataValue {
        PDataValue {
            presentation_context_id: id,
            value_type,
            is_last,
            data: data.to_vec(),
        }
    }

    fn store_command() -> Vec<u8> {
        Command::store_rq(1, "1.2.840.10008.5.1.4.1.1.7", "1.2.3", Priority::Medium)
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn assembles_fragmented_command_and_dataset() {
        let mut assembler = MessageAssembler::new([1, 3]);
        let command = store_command();
        let (head, tail) = command.split_at(10);

        assert!(assembler
            .push(pdv(3, PDataValueType::Command, false, head))
            .unwrap()
            .is_none());
        assert!(assembler
            .push(pdv(3, PDataValueType::Command, true, tail))
            .unwrap()
            .is_none());
        assert!(!assembler.is_idle());
        assert!(assembler
            .push(pdv(3, PDataValueType::Data, false, &[1, 2]))
            .unwrap()
            .is_none());
        let message = assembler
            .push(pdv(3, PDataValueType::Data, true, &[3, 4]))
            .unwrap()
            .unwrap();
        assert!(assembler.is_idle());
        assert_eq!(message.presentation_context_id, 3);
        assert_eq!(message.command.command_field().unwrap(), CommandField::CStoreRq);
        assert_eq!(message.dataset.as_deref(), Some(&[1, 2, 3, 4][..]));
    }

    #[test]
    fn message_without_dataset_completes_on_command() {
        let mut assembler = MessageAssembler::new([1]);
        let command = Command::echo_rq(5).to_bytes().unwrap();
        let message = assembler
            .push(pdv(1, PDataValueType::Command, true, &command))
            .unwrap()
            .unwrap();
        assert!(message.dataset.is_none());
        assert_eq!(message.command.message_id().unwrap(), 5);

        assert_matches!(
            assembler.push(pdv(1, PDataValueType::Data, true, &[0; 4])),
            Err(Error::UnexpectedDataset { .. })
        );
    }

    #[test]
    fn data_before_command() {
        let mut assembler = MessageAssembler::new([1]);
        assert_matches!(
            assembler.push(pdv(1, PDataValueType::Data, true, &[0; 4])),
            Err(Error::DataBeforeCommand { .. })
        );
    }

    #[test]
    fn command_after_complete() {
        let mut assembler = MessageAssembler::new([1]);
        let command = store_command();
        assembler
            .push(pdv(1, PDataValueType::Command, true, &command))
            .unwrap();
        assert_matches!(
            assembler.push(pdv(1, PDataValueType::Command, true, &command)),
            Err(Error::CommandAfterComplete { .. })
        );
    }

    #[test]
    fn context_switch_mid_message() {
        let mut assembler = MessageAssembler::new([1, 3]);
        let command = store_command();
        assembler
            .push(pdv(1, PDataValueType::Command, true, &command))
            .unwrap();
        assert_matches!(
            assembler.push(pdv(3, PDataValueType::Data, true, &[0; 2])),
            Err(Error::ContextSwitch {
                expected: 1,
                got: 3,
                ..
            })
        );
    }

    #[test]
    fn unknown_presentation_context() {
        let mut assembler = MessageAssembler::new([1]);
        assert_matches!(
            assembler.push(pdv(5, PDataValueType::Command, true, &[])),
            Err(Error::UnknownPresentationContext { id: 5, .. })
        );
    }
}
