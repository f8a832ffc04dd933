//! PDU reader module
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, ReadBytesExt};
use bytes::{Buf, BytesMut};
use dicom_encoding::text::{DefaultCharacterSetCodec, TextCodec};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::io::{Cursor, ErrorKind, Read};
use tracing::warn;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Invalid max PDU length {}", max_pdu_length))]
    InvalidMaxPdu {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("No PDU available"))]
    NoPduAvailable { backtrace: Backtrace },

    #[snafu(display("Could not read PDU"))]
    ReadPdu {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read PDU field `{}`", field))]
    ReadPduField {
        field: &'static str,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read {} reserved bytes", bytes))]
    ReadReserved {
        bytes: u32,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Truncated {}: expected {} bytes, got {}", what, expected, got))]
    Truncated {
        what: &'static str,
        expected: usize,
        got: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid PDV item length {} (must be >= 2)", length))]
    InvalidItemLength { length: u32, backtrace: Backtrace },

    #[snafu(display(
        "Incoming PDU was too large: length {}, maximum is {}",
        pdu_length,
        max_pdu_length
    ))]
    PduTooLarge {
        pdu_length: u32,
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("Unexpected item {:?} in {}", var_item, pdu))]
    InvalidPduVariable {
        var_item: PduVariableItem,
        pdu: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display("Multiple transfer syntaxes were accepted"))]
    MultipleTransferSyntaxesAccepted { backtrace: Backtrace },

    #[snafu(display("Invalid reject source {} or reason {}", source_code, reason))]
    InvalidRejectSourceOrReason {
        source_code: u8,
        reason: u8,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid reject result {}", result))]
    InvalidRejectResult { result: u8, backtrace: Backtrace },

    #[snafu(display("Invalid abort source {} or reason {}", source_code, reason))]
    InvalidAbortSourceOrReason {
        source_code: u8,
        reason: u8,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid presentation context result reason {}", reason))]
    InvalidPresentationContextResultReason { reason: u8, backtrace: Backtrace },

    #[snafu(display("Invalid user identity type {}", code))]
    InvalidUserIdentityType { code: u8, backtrace: Backtrace },

    #[snafu(display("Unknown presentation context sub-item {:#04x}", item_type))]
    UnknownPresentationContextSubItem { item_type: u8, backtrace: Backtrace },

    #[snafu(display("Could not decode text field `{}`", field))]
    DecodeText {
        field: &'static str,
        #[snafu(backtrace)]
        source: dicom_encoding::text::DecodeTextError,
    },

    #[snafu(display("Missing application context name"))]
    MissingApplicationContextName { backtrace: Backtrace },

    #[snafu(display("Missing abstract syntax"))]
    MissingAbstractSyntax { backtrace: Backtrace },

    #[snafu(display("Missing transfer syntax"))]
    MissingTransferSyntax { backtrace: Backtrace },
}

impl Error {
    /// Whether the error stems from the stream ending
    /// before any byte of a new PDU could be read.
    pub fn is_no_pdu_available(&self) -> bool {
        matches!(self, Error::NoPduAvailable { .. })
    }

    /// The kind of the underlying I/O error, if any.
    pub fn io_error_kind(&self) -> Option<ErrorKind> {
        match self {
            Error::ReadPdu { source, .. }
            | Error::ReadPduField { source, .. }
            | Error::ReadReserved { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Read a single PDU from the given reader.
///
/// `max_pdu_length` is the maximum PDU length
/// which this node announced to its peer.
/// It must lie within [`MINIMUM_PDU_SIZE`] and [`MAXIMUM_PDU_SIZE`].
/// In strict mode, a longer PDU is an error.
/// Otherwise, PDUs up to [`MAXIMUM_PDU_SIZE`] are tolerated with a warning.
pub fn read_pdu<R>(reader: &mut R, max_pdu_length: u32, strict: bool) -> Result<Pdu>
where
    R: Read,
{
    ensure!(
        (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&max_pdu_length),
        InvalidMaxPduSnafu { max_pdu_length }
    );

    let mut header = [0; 2];
    if let Err(e) = reader.read_exact(&mut header) {
        ensure!(e.kind() != ErrorKind::UnexpectedEof, NoPduAvailableSnafu);
        return Err(e).context(ReadPduFieldSnafu { field: "PDU-type" });
    }
    let pdu_type = header[0];
    let pdu_length = reader
        .read_u32::<BigEndian>()
        .context(ReadPduFieldSnafu { field: "PDU-length" })?;

    check_pdu_length(pdu_length, max_pdu_length, strict)?;
    warn_if_oversized(pdu_length, max_pdu_length);

    let bytes = read_n(reader, pdu_length as usize).context(ReadPduSnafu)?;
    ensure!(
        bytes.len() == pdu_length as usize,
        TruncatedSnafu {
            what: "PDU",
            expected: pdu_length as usize,
            got: bytes.len(),
        }
    );
    read_pdu_body(pdu_type, bytes)
}

/// Try to take a complete PDU out of an accumulated byte buffer.
///
/// Returns `Ok(None)` if the buffer does not hold a full PDU yet,
/// in which case the buffer is left untouched.
pub fn read_pdu_from_buf(
    buf: &mut BytesMut,
    max_pdu_length: u32,
    strict: bool,
) -> Result<Option<Pdu>> {
    ensure!(
        (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&max_pdu_length),
        InvalidMaxPduSnafu { max_pdu_length }
    );
    if buf.len() < PDU_HEADER_SIZE as usize {
        return Ok(None);
    }
    let pdu_type = buf[0];
    let pdu_length = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]);
    check_pdu_length(pdu_length, max_pdu_length, strict)?;

    let total = PDU_HEADER_SIZE as usize + pdu_length as usize;
    if buf.len() < total {
        return Ok(None);
    }
    warn_if_oversized(pdu_length, max_pdu_length);
    buf.advance(PDU_HEADER_SIZE as usize);
    let body = buf.split_to(pdu_length as usize);
    read_pdu_body(pdu_type, body.to_vec()).map(Some)
}

fn check_pdu_length(pdu_length: u32, max_pdu_length: u32, strict: bool) -> Result<()> {
    if strict {
        ensure!(
            pdu_length <= max_pdu_length,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length
            }
        );
    } else if pdu_length > max_pdu_length {
        ensure!(
            pdu_length <= MAXIMUM_PDU_SIZE,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length: MAXIMUM_PDU_SIZE
            }
        );
    }
    Ok(())
}

fn warn_if_oversized(pdu_length: u32, max_pdu_length: u32) {
    if pdu_length > max_pdu_length {
        warn!(
            "Incoming PDU was too large: length {}, maximum is {}",
            pdu_length, max_pdu_length
        );
    }
}

fn read_pdu_body(pdu_type: u8, bytes: Vec<u8>) -> Result<Pdu> {
    let mut cursor = Cursor::new(bytes);
    let codec = DefaultCharacterSetCodec;

    match pdu_type {
        0x01 => {
            let header = read_association_header(&mut cursor, &codec)?;
            let mut application_context_name = None;
            let mut presentation_contexts = vec![];
            let mut user_variables = vec![];
            while has_remaining(&cursor) {
                match read_pdu_variable(&mut cursor, &codec)? {
                    PduVariableItem::ApplicationContext(name) => {
                        application_context_name = Some(name)
                    }
                    PduVariableItem::PresentationContextProposed(pc) => {
                        presentation_contexts.push(pc)
                    }
                    PduVariableItem::UserVariables(items) => user_variables = items,
                    PduVariableItem::Unknown(item_type) => {
                        warn!("Ignoring unknown item type {:#04x} in A-ASSOCIATE-RQ", item_type)
                    }
                    var_item => {
                        return InvalidPduVariableSnafu {
                            var_item,
                            pdu: "A-ASSOCIATE-RQ",
                        }
                        .fail()
                    }
                }
            }
            Ok(Pdu::AssociationRQ(AssociationRQ {
                protocol_version: header.protocol_version,
                calling_ae_title: header.calling_ae_title,
                called_ae_title: header.called_ae_title,
                application_context_name: application_context_name
                    .context(MissingApplicationContextNameSnafu)?,
                presentation_contexts,
                user_variables,
            }))
        }
        0x02 => {
            let header = read_association_header(&mut cursor, &codec)?;
            let mut application_context_name = None;
            let mut presentation_contexts = vec![];
            let mut user_variables = vec![];
            while has_remaining(&cursor) {
                match read_pdu_variable(&mut cursor, &codec)? {
                    PduVariableItem::ApplicationContext(name) => {
                        application_context_name = Some(name)
                    }
                    PduVariableItem::PresentationContextResult(pc) => {
                        presentation_contexts.push(pc)
                    }
                    PduVariableItem::UserVariables(items) => user_variables = items,
                    PduVariableItem::Unknown(item_type) => {
                        warn!("Ignoring unknown item type {:#04x} in A-ASSOCIATE-AC", item_type)
                    }
                    var_item => {
                        return InvalidPduVariableSnafu {
                            var_item,
                            pdu: "A-ASSOCIATE-AC",
                        }
                        .fail()
                    }
                }
            }
            Ok(Pdu::AssociationAC(AssociationAC {
                protocol_version: header.protocol_version,
                calling_ae_title: header.calling_ae_title,
                called_ae_title: header.called_ae_title,
                application_context_name: application_context_name
                    .context(MissingApplicationContextNameSnafu)?,
                presentation_contexts,
                user_variables,
            }))
        }
        0x03 => {
            cursor
                .read_u8()
                .context(ReadReservedSnafu { bytes: 1_u32 })?;
            let result_code = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Result" })?;
            let result = AssociationRJResult::from_code(result_code).context(
                InvalidRejectResultSnafu {
                    result: result_code,
                },
            )?;
            let source_code = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Source" })?;
            let reason = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Reason/Diag.",
            })?;
            let source = AssociationRJSource::from_codes(source_code, reason).context(
                InvalidRejectSourceOrReasonSnafu {
                    source_code,
                    reason,
                },
            )?;
            Ok(Pdu::AssociationRJ(AssociationRJ { result, source }))
        }
        0x04 => {
            let mut values = vec![];
            while has_remaining(&cursor) {
                let item_length = cursor.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "Item-Length",
                })?;
                ensure!(
                    item_length >= 2,
                    InvalidItemLengthSnafu {
                        length: item_length
                    }
                );
                let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Presentation-context-ID",
                })?;
                let header = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Message-control-header",
                })?;
                let value_type = if header & 0x01 != 0 {
                    PDataValueType::Command
                } else {
                    PDataValueType::Data
                };
                let is_last = header & 0x02 != 0;
                let data = read_exact_n(&mut cursor, (item_length - 2) as usize, "PDV item")?;
                values.push(PDataValue {
                    presentation_context_id,
                    value_type,
                    is_last,
                    data,
                });
            }
            Ok(Pdu::PData { data: values })
        }
        0x05 => {
            cursor
                .read_u32::<BigEndian>()
                .context(ReadReservedSnafu { bytes: 4_u32 })?;
            Ok(Pdu::ReleaseRQ)
        }
        0x06 => {
            cursor
                .read_u32::<BigEndian>()
                .context(ReadReservedSnafu { bytes: 4_u32 })?;
            Ok(Pdu::ReleaseRP)
        }
        0x07 => {
            cursor
                .read_u16::<BigEndian>()
                .context(ReadReservedSnafu { bytes: 2_u32 })?;
            let source_code = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Source" })?;
            let reason = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Reason/Diag.",
            })?;
            let source = AbortRQSource::from_codes(source_code, reason).context(
                InvalidAbortSourceOrReasonSnafu {
                    source_code,
                    reason,
                },
            )?;
            Ok(Pdu::AbortRQ { source })
        }
        _ => Ok(Pdu::Unknown {
            pdu_type,
            data: cursor.into_inner(),
        }),
    }
}

/// Fields shared by the A-ASSOCIATE-RQ and A-ASSOCIATE-AC headers.
struct AssociationHeader {
    protocol_version: u16,
    called_ae_title: String,
    calling_ae_title: String,
}

fn read_association_header(
    cursor: &mut Cursor<Vec<u8>>,
    codec: &dyn TextCodec,
) -> Result<AssociationHeader> {
    let protocol_version = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Protocol-version",
    })?;
    cursor
        .read_u16::<BigEndian>()
        .context(ReadReservedSnafu { bytes: 2_u32 })?;
    let called_ae_title = read_ae_title(cursor, codec, "Called-AE-title")?;
    let calling_ae_title = read_ae_title(cursor, codec, "Calling-AE-title")?;
    let mut reserved = [0; 32];
    cursor
        .read_exact(&mut reserved)
        .context(ReadReservedSnafu { bytes: 32_u32 })?;
    Ok(AssociationHeader {
        protocol_version,
        called_ae_title,
        calling_ae_title,
    })
}

fn read_ae_title(
    cursor: &mut Cursor<Vec<u8>>,
    codec: &dyn TextCodec,
    field: &'static str,
) -> Result<String> {
    let mut ae_bytes = [0; 16];
    cursor
        .read_exact(&mut ae_bytes)
        .context(ReadPduFieldSnafu { field })?;
    Ok(codec
        .decode(&ae_bytes)
        .context(DecodeTextSnafu { field })?
        .trim()
        .to_string())
}

fn read_pdu_variable(
    cursor: &mut Cursor<Vec<u8>>,
    codec: &dyn TextCodec,
) -> Result<PduVariableItem> {
    let item_type = cursor
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Item-type" })?;
    cursor
        .read_u8()
        .context(ReadReservedSnafu { bytes: 1_u32 })?;
    let item_length = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Item-length",
    })?;
    let bytes = read_exact_n(cursor, item_length as usize, "variable item")?;
    let mut item = Cursor::new(bytes);

    match item_type {
        0x10 => Ok(PduVariableItem::ApplicationContext(decode_uid(
            codec,
            item.get_ref(),
            "Application-context-name",
        )?)),
        0x20 => {
            let id = item.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;
            let mut reserved = [0; 3];
            item.read_exact(&mut reserved)
                .context(ReadReservedSnafu { bytes: 3_u32 })?;

            let mut abstract_syntax = None;
            let mut transfer_syntaxes = vec![];
            while has_remaining(&item) {
                let (sub_type, data) = read_sub_item(&mut item)?;
                match sub_type {
                    0x30 => {
                        abstract_syntax = Some(decode_uid(codec, &data, "Abstract-syntax-name")?)
                    }
                    0x40 => {
                        transfer_syntaxes.push(decode_uid(codec, &data, "Transfer-syntax-name")?)
                    }
                    item_type => {
                        return UnknownPresentationContextSubItemSnafu { item_type }.fail();
                    }
                }
            }
            Ok(PduVariableItem::PresentationContextProposed(
                PresentationContextProposed {
                    id,
                    abstract_syntax: abstract_syntax.context(MissingAbstractSyntaxSnafu)?,
                    transfer_syntaxes,
                },
            ))
        }
        0x21 => {
            let id = item.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;
            item.read_u8()
                .context(ReadReservedSnafu { bytes: 1_u32 })?;
            let reason_code = item.read_u8().context(ReadPduFieldSnafu {
                field: "Result/Reason",
            })?;
            let reason = PresentationContextResultReason::from_code(reason_code).context(
                InvalidPresentationContextResultReasonSnafu {
                    reason: reason_code,
                },
            )?;
            item.read_u8()
                .context(ReadReservedSnafu { bytes: 1_u32 })?;

            let mut transfer_syntax = None;
            while has_remaining(&item) {
                let (sub_type, data) = read_sub_item(&mut item)?;
                match sub_type {
                    0x40 => {
                        ensure!(
                            transfer_syntax.is_none(),
                            MultipleTransferSyntaxesAcceptedSnafu
                        );
                        transfer_syntax =
                            Some(decode_uid(codec, &data, "Transfer-syntax-name")?);
                    }
                    item_type => {
                        return UnknownPresentationContextSubItemSnafu { item_type }.fail();
                    }
                }
            }
            // rejected contexts may legitimately omit the sub-item
            let transfer_syntax = match transfer_syntax {
                Some(ts) => ts,
                None if reason != PresentationContextResultReason::Acceptance => String::new(),
                None => return MissingTransferSyntaxSnafu.fail(),
            };
            Ok(PduVariableItem::PresentationContextResult(
                PresentationContextResult {
                    id,
                    reason,
                    transfer_syntax,
                },
            ))
        }
        0x50 => {
            let mut user_variables = vec![];
            while has_remaining(&item) {
                let (sub_type, data) = read_sub_item(&mut item)?;
                user_variables.push(read_user_variable(sub_type, data, codec)?);
            }
            Ok(PduVariableItem::UserVariables(user_variables))
        }
        _ => Ok(PduVariableItem::Unknown(item_type)),
    }
}

fn read_user_variable(
    sub_type: u8,
    data: Vec<u8>,
    codec: &dyn TextCodec,
) -> Result<UserVariableItem> {
    let mut sub = Cursor::new(data);
    match sub_type {
        0x51 => Ok(UserVariableItem::MaxLength(
            sub.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
                field: "Maximum-length-received",
            })?,
        )),
        0x52 => Ok(UserVariableItem::ImplementationClassUID(decode_uid(
            codec,
            sub.get_ref(),
            "Implementation-class-uid",
        )?)),
        0x55 => Ok(UserVariableItem::ImplementationVersionName(
            codec
                .decode(sub.get_ref())
                .context(DecodeTextSnafu {
                    field: "Implementation-version-name",
                })?
                .trim()
                .to_string(),
        )),
        0x56 => {
            let uid_length = sub.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                field: "SOP-class-uid-length",
            })?;
            let uid_bytes = read_exact_n(&mut sub, uid_length as usize, "SOP class UID")?;
            let sop_class_uid = decode_uid(codec, &uid_bytes, "SOP-class-uid")?;
            let mut info = vec![];
            sub.read_to_end(&mut info).context(ReadPduFieldSnafu {
                field: "Service-class-application-information",
            })?;
            Ok(UserVariableItem::SopClassExtendedNegotiationSubItem(
                sop_class_uid,
                info,
            ))
        }
        0x58 => {
            let code = sub.read_u8().context(ReadPduFieldSnafu {
                field: "User-Identity-Type",
            })?;
            let identity_type =
                UserIdentityType::from_code(code).context(InvalidUserIdentityTypeSnafu { code })?;
            let positive_response_requested = sub.read_u8().context(ReadPduFieldSnafu {
                field: "Positive-response-requested",
            })? == 1;
            let primary_length = sub.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                field: "Primary-field-length",
            })?;
            let primary_field = read_exact_n(&mut sub, primary_length as usize, "primary field")?;
            let secondary_length = sub.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                field: "Secondary-field-length",
            })?;
            let secondary_field =
                read_exact_n(&mut sub, secondary_length as usize, "secondary field")?;
            Ok(UserVariableItem::UserIdentityItem(UserIdentity::new(
                positive_response_requested,
                identity_type,
                primary_field,
                secondary_field,
            )))
        }
        _ => Ok(UserVariableItem::Unknown(sub_type, sub.into_inner())),
    }
}

/// Read a sub-item header and its payload.
fn read_sub_item(cursor: &mut Cursor<Vec<u8>>) -> Result<(u8, Vec<u8>)> {
    let item_type = cursor.read_u8().context(ReadPduFieldSnafu {
        field: "Sub-Item-type",
    })?;
    cursor
        .read_u8()
        .context(ReadReservedSnafu { bytes: 1_u32 })?;
    let item_length = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Sub-Item-length",
    })?;
    let data = read_exact_n(cursor, item_length as usize, "sub-item")?;
    Ok((item_type, data))
}

fn decode_uid(codec: &dyn TextCodec, bytes: &[u8], field: &'static str) -> Result<String> {
    Ok(codec
        .decode(bytes)
        .context(DecodeTextSnafu { field })?
        .trim_end_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string())
}

fn has_remaining(cursor: &Cursor<Vec<u8>>) -> bool {
    cursor.position() < cursor.get_ref().len() as u64
}

fn read_n<R>(reader: &mut R, bytes_to_read: usize) -> std::io::Result<Vec<u8>>
where
    R: Read,
{
    let mut result = Vec::with_capacity(bytes_to_read.min(MAXIMUM_PDU_SIZE as usize));
    reader.take(bytes_to_read as u64).read_to_end(&mut result)?;
    Ok(result)
}

fn read_exact_n(
    cursor: &mut Cursor<Vec<u8>>,
    expected: usize,
    what: &'static str,
) -> Result<Vec<u8>> {
    let data = read_n(cursor, expected).context(ReadPduSnafu)?;
    ensure!(
        data.len() == expected,
        TruncatedSnafu {
            what,
            expected,
            got: data.len(),
        }
    );
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    #[test]
    fn empty_stream_means_no_pdu() {
        let mut empty: &[u8] = &[];
        let err = read_pdu(&mut empty, DEFAULT_MAX_PDU, true).unwrap_err();
        assert!(err.is_no_pdu_available());
    }

    #[test]
    fn strict_mode_refuses_long_pdus() {
        let mut bytes: &[u8] = &[0x04, 0x00, 0x00, 0x01, 0x00, 0x00];
        assert_matches!(
            read_pdu(&mut bytes, MINIMUM_PDU_SIZE, true),
            Err(Error::PduTooLarge {
                pdu_length: 65536,
                ..
            })
        );
    }

    #[test]
    fn buffer_waits_for_complete_pdu() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x05, 0x00, 0x00, 0x00]);
        assert_matches!(read_pdu_from_buf(&mut buf, DEFAULT_MAX_PDU, true), Ok(None));
        buf.extend_from_slice(&[0x00, 0x04, 0x00, 0x00]);
        assert_matches!(read_pdu_from_buf(&mut buf, DEFAULT_MAX_PDU, true), Ok(None));
        buf.extend_from_slice(&[0x00, 0x00, 0x06]);
        assert_matches!(
            read_pdu_from_buf(&mut buf, DEFAULT_MAX_PDU, true),
            Ok(Some(Pdu::ReleaseRQ))
        );
        // the trailing byte belongs to the next PDU
        assert_eq!(&buf[..], &[0x06]);
    }

    #[test]
    fn unknown_pdu_type_is_kept() {
        let mut bytes: &[u8] = &[0x09, 0x00, 0x00, 0x00, 0x00, 0x02, 0xAB, 0xCD];
        assert_eq!(
            read_pdu(&mut bytes, DEFAULT_MAX_PDU, true).unwrap(),
            Pdu::Unknown {
                pdu_type: 9,
                data: vec![0xAB, 0xCD]
            }
        );
    }

    #[test]
    fn pdv_with_short_length_is_invalid() {
        let mut bytes: &[u8] = &[
            0x04, 0x00, 0x00, 0x00, 0x00, 0x06, //
            0x00, 0x00, 0x00, 0x01, 0x01, 0x03,
        ];
        assert_matches!(
            read_pdu(&mut bytes, DEFAULT_MAX_PDU, true),
            Err(Error::InvalidItemLength { length: 1, .. })
        );
    }
}
