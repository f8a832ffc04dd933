//! Protocol data units of the DICOM upper layer.
//!
//! This module holds the in-memory representation of every PDU
//! exchanged over an association,
//! plus the [reader] and [writer] translating them to and from
//! their framed binary form:
//! one PDU type byte, one reserved byte,
//! a 32-bit big endian length and the payload.
pub mod reader;
pub mod writer;

use std::fmt;

pub use reader::read_pdu;
pub use writer::write_pdu;

/// The default maximum PDU length
pub const DEFAULT_MAX_PDU: u32 = 16_384;

/// The minimum PDU length,
/// as specified by the standard
pub const MINIMUM_PDU_SIZE: u32 = 4_096;

/// The maximum PDU length,
/// as specified by the standard
pub const MAXIMUM_PDU_SIZE: u32 = 131_072;

/// The length of the PDU header in bytes:
/// PDU type (1 byte), reserved byte (1 byte)
/// and PDU length (4 bytes).
pub const PDU_HEADER_SIZE: u32 = 6;

/// The length of a presentation data value item header in bytes:
/// item length (4 bytes), presentation context ID (1 byte)
/// and message control header (1 byte).
pub const PDV_HEADER_SIZE: u32 = 6;

/// The only application context name defined by the standard.
pub const APPLICATION_CONTEXT_NAME: &str = "1.2.840.10008.3.1.1.1";

/// A presentation context as proposed by the association requestor.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct PresentationContextProposed {
    /// the presentation context identifier, an odd number
    pub id: u8,
    /// the abstract syntax UID, usually a SOP class
    pub abstract_syntax: String,
    /// transfer syntax UIDs in the requestor's order of preference
    pub transfer_syntaxes: Vec<String>,
}

/// The outcome of negotiating one presentation context,
/// as sent in the A-ASSOCIATE-AC PDU.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct PresentationContextResult {
    pub id: u8,
    pub reason: PresentationContextResultReason,
    /// the chosen transfer syntax,
    /// not significant unless the context was accepted
    pub transfer_syntax: String,
}

/// A negotiated presentation context,
/// as kept by both peers once the association is established.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct PresentationContextNegotiated {
    pub id: u8,
    pub reason: PresentationContextResultReason,
    pub abstract_syntax: String,
    pub transfer_syntax: String,
}

impl PresentationContextNegotiated {
    /// Whether the acceptor accepted this presentation context.
    pub fn is_accepted(&self) -> bool {
        self.reason == PresentationContextResultReason::Acceptance
    }
}

impl From<&PresentationContextNegotiated> for PresentationContextResult {
    fn from(pc: &PresentationContextNegotiated) -> Self {
        PresentationContextResult {
            id: pc.id,
            reason: pc.reason,
            transfer_syntax: pc.transfer_syntax.clone(),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PresentationContextResultReason {
    Acceptance = 0,
    UserRejection = 1,
    NoReason = 2,
    AbstractSyntaxNotSupported = 3,
    TransferSyntaxesNotSupported = 4,
}

impl PresentationContextResultReason {
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Acceptance,
            1 => Self::UserRejection,
            2 => Self::NoReason,
            3 => Self::AbstractSyntaxNotSupported,
            4 => Self::TransferSyntaxesNotSupported,
            _ => return None,
        })
    }
}

impl fmt::Display for PresentationContextResultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Acceptance => "acceptance",
            Self::UserRejection => "user rejection",
            Self::NoReason => "no reason",
            Self::AbstractSyntaxNotSupported => "abstract syntax not supported",
            Self::TransferSyntaxesNotSupported => "transfer syntaxes not supported",
        };
        f.write_str(msg)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum AssociationRJResult {
    Permanent,
    Transient,
}

impl AssociationRJResult {
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Permanent),
            2 => Some(Self::Transient),
            _ => None,
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Permanent => 1,
            Self::Transient => 2,
        }
    }
}

/// Who rejected the association, and why.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum AssociationRJSource {
    ServiceUser(AssociationRJServiceUserReason),
    ServiceProviderAcse(AssociationRJServiceProviderAcseReason),
    ServiceProviderPresentation(AssociationRJServiceProviderPresentationReason),
}

impl AssociationRJSource {
    pub(crate) fn from_codes(source: u8, reason: u8) -> Option<Self> {
        use AssociationRJServiceProviderAcseReason as Acse;
        use AssociationRJServiceProviderPresentationReason as Presentation;
        use AssociationRJServiceUserReason as User;
        Some(match (source, reason) {
            (1, 1) => Self::ServiceUser(User::NoReasonGiven),
            (1, 2) => Self::ServiceUser(User::ApplicationContextNameNotSupported),
            (1, 3) => Self::ServiceUser(User::CallingAeTitleNotRecognized),
            (1, 7) => Self::ServiceUser(User::CalledAeTitleNotRecognized),
            (1, 4..=6) | (1, 8..=10) => Self::ServiceUser(User::Reserved(reason)),
            (2, 1) => Self::ServiceProviderAcse(Acse::NoReasonGiven),
            (2, 2) => Self::ServiceProviderAcse(Acse::ProtocolVersionNotSupported),
            (3, 1) => Self::ServiceProviderPresentation(Presentation::TemporaryCongestion),
            (3, 2) => Self::ServiceProviderPresentation(Presentation::LocalLimitExceeded),
            (3, 0) | (3, 3..=7) => Self::ServiceProviderPresentation(Presentation::Reserved(reason)),
            _ => return None,
        })
    }

    pub(crate) fn codes(self) -> (u8, u8) {
        use AssociationRJServiceProviderAcseReason as Acse;
        use AssociationRJServiceProviderPresentationReason as Presentation;
        use AssociationRJServiceUserReason as User;
        match self {
            Self::ServiceUser(User::NoReasonGiven) => (1, 1),
            Self::ServiceUser(User::ApplicationContextNameNotSupported) => (1, 2),
            Self::ServiceUser(User::CallingAeTitleNotRecognized) => (1, 3),
            Self::ServiceUser(User::CalledAeTitleNotRecognized) => (1, 7),
            Self::ServiceUser(User::Reserved(code)) => (1, code),
            Self::ServiceProviderAcse(Acse::NoReasonGiven) => (2, 1),
            Self::ServiceProviderAcse(Acse::ProtocolVersionNotSupported) => (2, 2),
            Self::ServiceProviderPresentation(Presentation::TemporaryCongestion) => (3, 1),
            Self::ServiceProviderPresentation(Presentation::LocalLimitExceeded) => (3, 2),
            Self::ServiceProviderPresentation(Presentation::Reserved(code)) => (3, code),
        }
    }
}

impl fmt::Display for AssociationRJSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceUser(r) => write!(f, "service user: {}", r),
            Self::ServiceProviderAcse(r) => write!(f, "service provider (ACSE): {}", r),
            Self::ServiceProviderPresentation(r) => {
                write!(f, "service provider (presentation): {}", r)
            }
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum AssociationRJServiceUserReason {
    NoReasonGiven,
    ApplicationContextNameNotSupported,
    CallingAeTitleNotRecognized,
    CalledAeTitleNotRecognized,
    Reserved(u8),
}

impl fmt::Display for AssociationRJServiceUserReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoReasonGiven => f.write_str("no reason given"),
            Self::ApplicationContextNameNotSupported => {
                f.write_str("application context name not supported")
            }
            Self::CallingAeTitleNotRecognized => f.write_str("calling AE title not recognized"),
            Self::CalledAeTitleNotRecognized => f.write_str("called AE title not recognized"),
            Self::Reserved(code) => write!(f, "reserved code {}", code),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum AssociationRJServiceProviderAcseReason {
    NoReasonGiven,
    ProtocolVersionNotSupported,
}

impl fmt::Display for AssociationRJServiceProviderAcseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoReasonGiven => f.write_str("no reason given"),
            Self::ProtocolVersionNotSupported => f.write_str("protocol version not supported"),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum AssociationRJServiceProviderPresentationReason {
    TemporaryCongestion,
    LocalLimitExceeded,
    Reserved(u8),
}

impl fmt::Display for AssociationRJServiceProviderPresentationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TemporaryCongestion => f.write_str("temporary congestion"),
            Self::LocalLimitExceeded => f.write_str("local limit exceeded"),
            Self::Reserved(code) => write!(f, "reserved code {}", code),
        }
    }
}

/// One presentation data value item of a P-DATA-TF PDU.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct PDataValue {
    pub presentation_context_id: u8,
    pub value_type: PDataValueType,
    /// whether this is the last fragment of the command or data set
    pub is_last: bool,
    pub data: Vec<u8>,
}

impl PDataValue {
    /// The message control header byte of this value.
    pub(crate) fn control_header(&self) -> u8 {
        let mut header = 0;
        if self.value_type == PDataValueType::Command {
            header |= 0x01;
        }
        if self.is_last {
            header |= 0x02;
        }
        header
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PDataValueType {
    Command,
    Data,
}

/// Who initiated an A-ABORT.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum AbortRQSource {
    ServiceUser,
    Reserved,
    ServiceProvider(AbortRQServiceProviderReason),
}

impl AbortRQSource {
    pub(crate) fn from_codes(source: u8, reason: u8) -> Option<Self> {
        use AbortRQServiceProviderReason as R;
        Some(match (source, reason) {
            (0, _) => Self::ServiceUser,
            (1, _) => Self::Reserved,
            (2, 0) => Self::ServiceProvider(R::ReasonNotSpecified),
            (2, 1) => Self::ServiceProvider(R::UnrecognizedPdu),
            (2, 2) => Self::ServiceProvider(R::UnexpectedPdu),
            (2, 3) => Self::ServiceProvider(R::Reserved),
            (2, 4) => Self::ServiceProvider(R::UnrecognizedPduParameter),
            (2, 5) => Self::ServiceProvider(R::UnexpectedPduParameter),
            (2, 6) => Self::ServiceProvider(R::InvalidPduParameter),
            _ => return None,
        })
    }

    pub(crate) fn codes(self) -> (u8, u8) {
        use AbortRQServiceProviderReason as R;
        match self {
            Self::ServiceUser => (0, 0),
            Self::Reserved => (1, 0),
            Self::ServiceProvider(reason) => (
                2,
                match reason {
                    R::ReasonNotSpecified => 0,
                    R::UnrecognizedPdu => 1,
                    R::UnexpectedPdu => 2,
                    R::Reserved => 3,
                    R::UnrecognizedPduParameter => 4,
                    R::UnexpectedPduParameter => 5,
                    R::InvalidPduParameter => 6,
                },
            ),
        }
    }
}

impl fmt::Display for AbortRQSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceUser => f.write_str("service user"),
            Self::Reserved => f.write_str("reserved"),
            Self::ServiceProvider(reason) => write!(f, "service provider: {}", reason),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum AbortRQServiceProviderReason {
    ReasonNotSpecified,
    UnrecognizedPdu,
    UnexpectedPdu,
    Reserved,
    UnrecognizedPduParameter,
    UnexpectedPduParameter,
    InvalidPduParameter,
}

impl fmt::Display for AbortRQServiceProviderReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::ReasonNotSpecified => "reason not specified",
            Self::UnrecognizedPdu => "unrecognized PDU",
            Self::UnexpectedPdu => "unexpected PDU",
            Self::Reserved => "reserved code",
            Self::UnrecognizedPduParameter => "unrecognized PDU parameter",
            Self::UnexpectedPduParameter => "unexpected PDU parameter",
            Self::InvalidPduParameter => "invalid PDU parameter",
        };
        f.write_str(msg)
    }
}

/// A variable item of an association request or response.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum PduVariableItem {
    Unknown(u8),
    ApplicationContext(String),
    PresentationContextProposed(PresentationContextProposed),
    PresentationContextResult(PresentationContextResult),
    UserVariables(Vec<UserVariableItem>),
}

/// A sub-item of the user information item.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum UserVariableItem {
    Unknown(u8, Vec<u8>),
    MaxLength(u32),
    ImplementationClassUID(String),
    ImplementationVersionName(String),
    SopClassExtendedNegotiationSubItem(String, Vec<u8>),
    UserIdentityItem(UserIdentity),
}

/// User identity negotiation sub-item.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct UserIdentity {
    positive_response_requested: bool,
    identity_type: UserIdentityType,
    primary_field: Vec<u8>,
    secondary_field: Vec<u8>,
}

impl UserIdentity {
    pub fn new(
        positive_response_requested: bool,
        identity_type: UserIdentityType,
        primary_field: Vec<u8>,
        secondary_field: Vec<u8>,
    ) -> Self {
        UserIdentity {
            positive_response_requested,
            identity_type,
            primary_field,
            secondary_field,
        }
    }

    pub fn positive_response_requested(&self) -> bool {
        self.positive_response_requested
    }

    pub fn identity_type(&self) -> UserIdentityType {
        self.identity_type
    }

    pub fn primary_field(&self) -> &[u8] {
        &self.primary_field
    }

    pub fn secondary_field(&self) -> &[u8] {
        &self.secondary_field
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum UserIdentityType {
    Username,
    UsernamePassword,
    KerberosServiceTicket,
    SamlAssertion,
    Jwt,
}

impl UserIdentityType {
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Username,
            2 => Self::UsernamePassword,
            3 => Self::KerberosServiceTicket,
            4 => Self::SamlAssertion,
            5 => Self::Jwt,
            _ => return None,
        })
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Username => 1,
            Self::UsernamePassword => 2,
            Self::KerberosServiceTicket => 3,
            Self::SamlAssertion => 4,
            Self::Jwt => 5,
        }
    }
}

/// An upper layer protocol data unit.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Pdu {
    /// A PDU of a type not defined by the standard.
    Unknown { pdu_type: u8, data: Vec<u8> },
    AssociationRQ(AssociationRQ),
    AssociationAC(AssociationAC),
    AssociationRJ(AssociationRJ),
    PData { data: Vec<PDataValue> },
    ReleaseRQ,
    ReleaseRP,
    AbortRQ { source: AbortRQSource },
}

impl Pdu {
    /// The PDU type code as written in the first byte of the frame.
    pub fn pdu_type(&self) -> u8 {
        match self {
            Pdu::Unknown { pdu_type, .. } => *pdu_type,
            Pdu::AssociationRQ(_) => 0x01,
            Pdu::AssociationAC(_) => 0x02,
            Pdu::AssociationRJ(_) => 0x03,
            Pdu::PData { .. } => 0x04,
            Pdu::ReleaseRQ => 0x05,
            Pdu::ReleaseRP => 0x06,
            Pdu::AbortRQ { .. } => 0x07,
        }
    }

    /// Provide a short description of the PDU,
    /// suitable for logging.
    pub fn short_description(&self) -> impl fmt::Display + '_ {
        PduShortDescription(self)
    }
}

struct PduShortDescription<'a>(&'a Pdu);

impl fmt::Display for PduShortDescription<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Pdu::Unknown { pdu_type, data } => {
                write!(f, "Unknown {{pdu_type: {}, data: {} bytes }}", pdu_type, data.len())
            }
            Pdu::AssociationRQ(rq) => write!(
                f,
                "A-ASSOCIATE-RQ {{ {} -> {}, {} presentation contexts }}",
                rq.calling_ae_title,
                rq.called_ae_title,
                rq.presentation_contexts.len()
            ),
            Pdu::AssociationAC(ac) => write!(
                f,
                "A-ASSOCIATE-AC {{ {} presentation contexts }}",
                ac.presentation_contexts.len()
            ),
            Pdu::AssociationRJ(rj) => write!(f, "A-ASSOCIATE-RJ {{ {} }}", rj.source),
            Pdu::PData { data } => {
                f.write_str("P-DATA-TF [")?;
                for (i, pdv) in data.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(
                        f,
                        "{{ctx: {}, {:?}, {} bytes{}}}",
                        pdv.presentation_context_id,
                        pdv.value_type,
                        pdv.data.len(),
                        if pdv.is_last { ", last" } else { "" }
                    )?;
                }
                f.write_str("]")
            }
            Pdu::ReleaseRQ => f.write_str("A-RELEASE-RQ"),
            Pdu::ReleaseRP => f.write_str("A-RELEASE-RP"),
            Pdu::AbortRQ { source } => write!(f, "A-ABORT {{ {} }}", source),
        }
    }
}

/// An A-ASSOCIATE-RQ message.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct AssociationRQ {
    pub protocol_version: u16,
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContextProposed>,
    pub user_variables: Vec<UserVariableItem>,
}

impl From<AssociationRQ> for Pdu {
    fn from(value: AssociationRQ) -> Self {
        Pdu::AssociationRQ(value)
    }
}

/// An A-ASSOCIATE-AC message.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct AssociationAC {
    pub protocol_version: u16,
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContextResult>,
    pub user_variables: Vec<UserVariableItem>,
}

impl From<AssociationAC> for Pdu {
    fn from(value: AssociationAC) -> Self {
        Pdu::AssociationAC(value)
    }
}

/// An A-ASSOCIATE-RJ message.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct AssociationRJ {
    pub result: AssociationRJResult,
    pub source: AssociationRJSource,
}

impl From<AssociationRJ> for Pdu {
    fn from(value: AssociationRJ) -> Self {
        Pdu::AssociationRJ(value)
    }
}

/// Look up the maximum length sub-item in a list of user variables.
///
/// Returns `None` if the peer did not send one.
pub fn max_length_of(user_variables: &[UserVariableItem]) -> Option<u32> {
    user_variables.iter().find_map(|item| match item {
        UserVariableItem::MaxLength(len) => Some(*len),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn short_description_of_pdata() {
        let pdu = Pdu::PData {
            data: vec![
                PDataValue {
                    presentation_context_id: 1,
                    value_type: PDataValueType::Command,
                    is_last: true,
                    data: vec![0; 62],
                },
                PDataValue {
                    presentation_context_id: 1,
                    value_type: PDataValueType::Data,
                    is_last: false,
                    data: vec![0; 1000],
                },
            ],
        };
        assert_eq!(
            pdu.short_description().to_string(),
            "P-DATA-TF [{ctx: 1, Command, 62 bytes, last}, {ctx: 1, Data, 1000 bytes}]"
        );
    }

    #[rstest]
    #[case(AbortRQSource::ServiceUser, (0, 0))]
    #[case(
        AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnrecognizedPdu),
        (2, 1)
    )]
    #[case(
        AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnexpectedPdu),
        (2, 2)
    )]
    fn abort_source_codes(#[case] source: AbortRQSource, #[case] codes: (u8, u8)) {
        assert_eq!(source.codes(), codes);
        assert_eq!(AbortRQSource::from_codes(codes.0, codes.1), Some(source));
    }

    #[test]
    fn reject_source_codes() {
        let source =
            AssociationRJSource::ServiceUser(AssociationRJServiceUserReason::CalledAeTitleNotRecognized);
        assert_eq!(source.codes(), (1, 7));
        assert_eq!(AssociationRJSource::from_codes(1, 7), Some(source));
        assert_eq!(AssociationRJSource::from_codes(2, 9), None);
        assert_eq!(AssociationRJSource::from_codes(4, 1), None);
    }

    #[test]
    fn control_header_bits() {
        let mut pdv = PDataValue {
            presentation_context_id: 3,
            value_type: PDataValueType::Command,
            is_last: false,
            data: vec![],
        };
        assert_eq!(pdv.control_header(), 0x01);
        pdv.is_last = true;
        assert_eq!(pdv.control_header(), 0x03);
        pdv.value_type = PDataValueType::Data;
        assert_eq!(pdv.control_header(), 0x02);
    }
}
