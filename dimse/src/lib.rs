//! DICOM message service element (DIMSE) support
//! on top of the upper layer associations of `pacsnet-ul`.
//!
//! - [`command`] holds command sets and their typed fields.
//! - [`message`] reassembles P-DATA values into whole messages
//!   and sends messages back out.
//! - [`pending`] keeps track of outstanding requests,
//!   so that every response is correlated with its request.
//! - [`dispatch`] delivers the messages of one association
//!   to a table of handler callbacks.
//! - [`server`] accepts associations, one thread each.
//! - [`client`] and [`verification`] cover the service class user side.
use dicom_core::Tag;
use pacsnet_ul::pdu::AbortRQSource;
use snafu::{Backtrace, Snafu};

pub mod client;
pub mod command;
pub mod dispatch;
pub mod message;
pub mod pending;
pub mod server;
pub mod verification;

pub use client::DimseClient;
pub use command::{Command, CommandField, Priority, Status, StatusCategory};
pub use dispatch::{AssociateDecision, DimseContext, DispatchOutcome, Dispatcher, Handler};
pub use message::{Message, MessageAssembler};
pub use pending::PendingRequests;
pub use server::Server;
pub use verification::{verify, VerificationFailed, VerificationFailureReason};

#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// association failure
    Association {
        #[snafu(backtrace)]
        source: pacsnet_ul::association::Error,
    },

    /// could not read command set
    ReadCommand {
        source: dicom_object::ReadError,
        backtrace: Backtrace,
    },

    /// could not write command set
    WriteCommand {
        source: dicom_object::WriteError,
        backtrace: Backtrace,
    },

    #[snafu(display("missing command element {}", tag))]
    MissingCommandElement { tag: Tag, backtrace: Backtrace },

    #[snafu(display("could not convert command element {}", tag))]
    ConvertCommandElement {
        tag: Tag,
        source: dicom_core::value::ConvertValueError,
        backtrace: Backtrace,
    },

    #[snafu(display("unknown command field {:#06x}", code))]
    UnknownCommandField { code: u16, backtrace: Backtrace },

    #[snafu(display("{:?} is not a request", command_field))]
    NotARequest {
        command_field: CommandField,
        backtrace: Backtrace,
    },

    #[snafu(display("{:?} is not a response", command_field))]
    NotAResponse {
        command_field: CommandField,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "command fragment on presentation context {} after the command was complete",
        presentation_context_id
    ))]
    CommandAfterComplete {
        presentation_context_id: u8,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "data set fragment on presentation context {} before any command",
        presentation_context_id
    ))]
    DataBeforeCommand {
        presentation_context_id: u8,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "presentation context switched from {} to {} in the middle of a message",
        expected,
        got
    ))]
    ContextSwitch {
        expected: u8,
        got: u8,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "data set on presentation context {} for a command without data set",
        presentation_context_id
    ))]
    UnexpectedDataset {
        presentation_context_id: u8,
        backtrace: Backtrace,
    },

    #[snafu(display("no accepted presentation context with ID {}", id))]
    UnknownPresentationContext { id: u8, backtrace: Backtrace },

    #[snafu(display("no accepted presentation context for {}", abstract_syntax))]
    NoPresentationContext {
        abstract_syntax: String,
        backtrace: Backtrace,
    },

    #[snafu(display("response to message {} which is not pending", message_id))]
    UnmatchedResponse { message_id: u16, backtrace: Backtrace },

    #[snafu(display(
        "response to message {} should be {:?}, got {:?}",
        message_id,
        expected,
        got
    ))]
    MismatchedResponse {
        message_id: u16,
        expected: CommandField,
        got: CommandField,
        backtrace: Backtrace,
    },

    #[snafu(display("message ID {} is already pending", message_id))]
    DuplicateMessageId { message_id: u16, backtrace: Backtrace },

    #[snafu(display("no free message ID, {} requests pending", pending))]
    MessageIdsExhausted { pending: usize, backtrace: Backtrace },

    #[snafu(display("unexpected {:?} from the peer", command_field))]
    UnexpectedRequest {
        command_field: CommandField,
        backtrace: Backtrace,
    },

    #[snafu(display("association aborted ({})", abort_source))]
    Aborted {
        abort_source: AbortRQSource,
        backtrace: Backtrace,
    },

    /// association released by the peer
    ReleasedByPeer { backtrace: Backtrace },

    /// could not accept an incoming connection
    AcceptConnection {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// could not spawn an association thread
    SpawnThread {
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
