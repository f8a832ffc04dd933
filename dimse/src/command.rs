//! DIMSE command sets.
//!
//! A [`Command`] wraps the command set of a message,
//! which is always encoded in Implicit VR Little Endian
//! and starts with the command group length.
use std::fmt;

use dicom_core::{dicom_value, DataElement, Tag, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::{mem::InMemElement, InMemDicomObject};
use dicom_transfer_syntax_registry::entries::IMPLICIT_VR_LITTLE_ENDIAN;
use snafu::{OptionExt, ResultExt};

use crate::{
    ConvertCommandElementSnafu, MissingCommandElementSnafu, NotARequestSnafu,
    ReadCommandSnafu, Result, UnknownCommandFieldSnafu, WriteCommandSnafu,
};

/// Command Data Set Type value meaning that no data set follows.
pub const NO_DATA_SET: u16 = 0x0101;

/// The kind of a DIMSE message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandField {
    CStoreRq = 0x0001,
    CStoreRsp = 0x8001,
    CGetRq = 0x0010,
    CGetRsp = 0x8010,
    CFindRq = 0x0020,
    CFindRsp = 0x8020,
    CMoveRq = 0x0021,
    CMoveRsp = 0x8021,
    CEchoRq = 0x0030,
    CEchoRsp = 0x8030,
    NEventReportRq = 0x0100,
    NEventReportRsp = 0x8100,
    NGetRq = 0x0110,
    NGetRsp = 0x8110,
    NSetRq = 0x0120,
    NSetRsp = 0x8120,
    NActionRq = 0x0130,
    NActionRsp = 0x8130,
    NCreateRq = 0x0140,
    NCreateRsp = 0x8140,
    NDeleteRq = 0x0150,
    NDeleteRsp = 0x8150,
    CCancelRq = 0x0FFF,
}

impl CommandField {
    pub fn from_code(code: u16) -> Option<Self> {
        use CommandField::*;
        Some(match code {
            0x0001 => CStoreRq,
            0x8001 => CStoreRsp,
            0x0010 => CGetRq,
            0x8010 => CGetRsp,
            0x0020 => CFindRq,
            0x8020 => CFindRsp,
            0x0021 => CMoveRq,
            0x8021 => CMoveRsp,
            0x0030 => CEchoRq,
            0x8030 => CEchoRsp,
            0x0100 => NEventReportRq,
            0x8100 => NEventReportRsp,
            0x0110 => NGetRq,
            0x8110 => NGetRsp,
            0x0120 => NSetRq,
            0x8120 => NSetRsp,
            0x0130 => NActionRq,
            0x8130 => NActionRsp,
            0x0140 => NCreateRq,
            0x8140 => NCreateRsp,
            0x0150 => NDeleteRq,
            0x8150 => NDeleteRsp,
            0x0FFF => CCancelRq,
            _ => return None,
        })
    }

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn is_request(self) -> bool {
        self.code() & 0x8000 == 0
    }

    pub fn is_response(self) -> bool {
        !self.is_request()
    }

    /// The response matching this request.
    ///
    /// `None` for responses and for C-CANCEL, which has no response.
    pub fn response(self) -> Option<Self> {
        if self.is_response() || self == CommandField::CCancelRq {
            return None;
        }
        Self::from_code(self.code() | 0x8000)
    }
}

/// The priority of a request.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn code(self) -> u16 {
        match self {
            Priority::Low => 0x0002,
            Priority::Medium => 0x0000,
            Priority::High => 0x0001,
        }
    }
}

/// The general category of a status code.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    Success,
    Pending,
    Cancel,
    Warning,
    Failure,
}

/// A DIMSE response status code.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Status(pub u16);

impl Status {
    pub const SUCCESS: Status = Status(0x0000);
    pub const PENDING: Status = Status(0xFF00);
    pub const PENDING_WITH_WARNINGS: Status = Status(0xFF01);
    pub const CANCEL: Status = Status(0xFE00);
    pub const SOP_CLASS_NOT_SUPPORTED: Status = Status(0x0122);
    pub const DUPLICATE_INVOCATION: Status = Status(0x0210);
    pub const UNRECOGNIZED_OPERATION: Status = Status(0x0211);
    pub const PROCESSING_FAILURE: Status = Status(0x0110);
    pub const OUT_OF_RESOURCES: Status = Status(0xA700);
    pub const CANNOT_UNDERSTAND: Status = Status(0xC000);

    pub fn code(self) -> u16 {
        self.0
    }

    pub fn category(self) -> StatusCategory {
        match self.0 {
            0x0000 => StatusCategory::Success,
            0xFF00 | 0xFF01 => StatusCategory::Pending,
            0xFE00 => StatusCategory::Cancel,
            0x0001 | 0x0107 | 0x0116 | 0xB000..=0xBFFF => StatusCategory::Warning,
            _ => StatusCategory::Failure,
        }
    }

    /// Whether no further responses will follow for this request.
    pub fn is_final(self) -> bool {
        self.category() != StatusCategory::Pending
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}H", self.0)
    }
}

/// The command set of a DIMSE message.
#[derive(Debug, Clone)]
pub struct Command {
    obj: InMemDicomObject,
}

impl From<InMemDicomObject> for Command {
    fn from(obj: InMemDicomObject) -> Self {
        Command { obj }
    }
}

impl Command {
    /// Decode a command set from Implicit VR Little Endian bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let obj = InMemDicomObject::read_dataset_with_ts(bytes, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
            .context(ReadCommandSnafu)?;
        Ok(Command { obj })
    }

    /// Encode the command set in Implicit VR Little Endian,
    /// with a freshly computed command group length.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut body = self.obj.clone();
        body.remove_element(tags::COMMAND_GROUP_LENGTH);
        let mut elements = Vec::new();
        body.write_dataset_with_ts(&mut elements, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
            .context(WriteCommandSnafu)?;

        let mut bytes = Vec::with_capacity(elements.len() + 12);
        bytes.extend_from_slice(&0x0000_u16.to_le_bytes());
        bytes.extend_from_slice(&0x0000_u16.to_le_bytes());
        bytes.extend_from_slice(&4_u32.to_le_bytes());
        bytes.extend_from_slice(&(elements.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&elements);
        Ok(bytes)
    }

    pub fn object(&self) -> &InMemDicomObject {
        &self.obj
    }

    pub fn into_object(self) -> InMemDicomObject {
        self.obj
    }

    /// Add or replace an element of the command set.
    pub fn put(&mut self, element: InMemElement) {
        self.obj.put(element);
    }

    pub fn with(mut self, element: InMemElement) -> Self {
        self.put(element);
        self
    }

    fn u16_of(&self, tag: Tag) -> Result<u16> {
        self.obj
            .element(tag)
            .ok()
            .context(MissingCommandElementSnafu { tag })?
            .to_int::<u16>()
            .context(ConvertCommandElementSnafu { tag })
    }

    fn uid_of(&self, tag: Tag) -> Option<String> {
        let value = self.obj.element(tag).ok()?.to_str().ok()?;
        Some(
            value
                .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
                .to_string(),
        )
    }

    pub fn command_field(&self) -> Result<CommandField> {
        let code = self.u16_of(tags::COMMAND_FIELD)?;
        CommandField::from_code(code).context(UnknownCommandFieldSnafu { code })
    }

    pub fn message_id(&self) -> Result<u16> {
        self.u16_of(tags::MESSAGE_ID)
    }

    pub fn message_id_being_responded_to(&self) -> Result<u16> {
        self.u16_of(tags::MESSAGE_ID_BEING_RESPONDED_TO)
    }

    pub fn status(&self) -> Result<Status> {
        self.u16_of(tags::STATUS).map(Status)
    }

    /// Whether a data set follows the command.
    pub fn has_dataset(&self) -> bool {
        self.u16_of(tags::COMMAND_DATA_SET_TYPE)
            .map(|t| t != NO_DATA_SET)
            .unwrap_or(false)
    }

    pub fn affected_sop_class_uid(&self) -> Option<String> {
        self.uid_of(tags::AFFECTED_SOP_CLASS_UID)
    }

    pub fn affected_sop_instance_uid(&self) -> Option<String> {
        self.uid_of(tags::AFFECTED_SOP_INSTANCE_UID)
    }

    /// A C-ECHO request.
    pub fn echo_rq(message_id: u16) -> Self {
        Command::from(InMemDicomObject::command_from_element_iter([
            DataElement::new(
                tags::AFFECTED_SOP_CLASS_UID,
                VR::UI,
                dicom_value!(Str, uids::VERIFICATION),
            ),
            command_field_element(CommandField::CEchoRq),
            DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
            data_set_type_element(false),
        ]))
    }

    /// A C-STORE request for the given instance.
    pub fn store_rq(
        message_id: u16,
        sop_class_uid: &str,
        sop_instance_uid: &str,
        priority: Priority,
    ) -> Self {
        Command::from(InMemDicomObject::command_from_element_iter([
            DataElement::new(
                tags::AFFECTED_SOP_CLASS_UID,
                VR::UI,
                dicom_value!(Str, sop_class_uid),
            ),
            command_field_element(CommandField::CStoreRq),
            DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
            DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [priority.code()])),
            data_set_type_element(true),
            DataElement::new(
                tags::AFFECTED_SOP_INSTANCE_UID,
                VR::UI,
                dicom_value!(Str, sop_instance_uid),
            ),
        ]))
    }

    /// A C-FIND request. The identifier goes in the data set.
    pub fn find_rq(message_id: u16, sop_class_uid: &str, priority: Priority) -> Self {
        Command::from(InMemDicomObject::command_from_element_iter([
            DataElement::new(
                tags::AFFECTED_SOP_CLASS_UID,
                VR::UI,
                dicom_value!(Str, sop_class_uid),
            ),
            command_field_element(CommandField::CFindRq),
            DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
            DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [priority.code()])),
            data_set_type_element(true),
        ]))
    }

    /// Build the response to a request,
    /// carrying over its message ID and affected SOP class and instance.
    pub fn response_to(request: &Command, status: Status, has_dataset: bool) -> Result<Self> {
        let command_field = request.command_field()?;
        let response = command_field
            .response()
            .context(NotARequestSnafu { command_field })?;
        let message_id = request.message_id()?;

        let mut command = Command::from(InMemDicomObject::command_from_element_iter([
            command_field_element(response),
            DataElement::new(
                tags::MESSAGE_ID_BEING_RESPONDED_TO,
                VR::US,
                dicom_value!(U16, [message_id]),
            ),
            data_set_type_element(has_dataset),
            DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status.code()])),
        ]));
        if let Some(uid) = request.affected_sop_class_uid() {
            command.put(DataElement::new(
                tags::AFFECTED_SOP_CLASS_UID,
                VR::UI,
                dicom_value!(Str, uid),
            ));
        }
        if let Some(uid) = request.affected_sop_instance_uid() {
            command.put(DataElement::new(
                tags::AFFECTED_SOP_INSTANCE_UID,
                VR::UI,
                dicom_value!(Str, uid),
            ));
        }
        Ok(command)
    }
}

fn command_field_element(field: CommandField) -> InMemElement {
    DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [field.code()]))
}

fn data_set_type_element(has_dataset: bool) -> InMemElement {
    // any value other than 0x0101 announces a data set
    let value = if has_dataset { 0x0000 } else { NO_DATA_SET };
    DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [value]))
}
