//! This crate contains the types and methods needed to interact
//! with DICOM nodes through the upper layer protocol.
//!
//! It is the base for the DIMSE services in `pacsnet-dimse`,
//! from both ends of an association.
//!
//! - The [`pdu`] module
//!   provides data structures representing _protocol data units_,
//!   along with their binary reader and writer.
//! - The [`negotiation`] module
//!   decides on the outcome of each proposed presentation context.
//! - The [`association`] module
//!   comprises the association state machine
//!   and the means to establish, use, release and abort associations
//!   as either the requestor or the acceptor.

pub mod association;
pub mod negotiation;
pub mod pdu;

/// The implementation class UID of this library.
///
/// Generated as a UUID-derived UID, as per the standard, part 5, section B.2.
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.262179542384934717282412093853617407851";

/// The implementation version name of this library.
pub const IMPLEMENTATION_VERSION_NAME: &str = "PACSNET_010";

// re-exports

pub use association::{
    Association, ClientAssociationOptions, ServerAssociationOptions, State, Transport,
};
pub use negotiation::PresentationContextPolicy;
pub use pdu::{read_pdu, write_pdu, Pdu};
