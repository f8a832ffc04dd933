//! PDU writer module
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, WriteBytesExt};
use dicom_encoding::text::{DefaultCharacterSetCodec, TextCodec};
use snafu::{Backtrace, ResultExt, Snafu};
use std::io::Write;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not write chunk of {} PDU structure", name))]
    WriteChunk {
        /// the name of the PDU structure
        name: &'static str,
        source: WriteChunkError,
    },

    #[snafu(display("Could not write field `{}`", field))]
    WriteField {
        field: &'static str,
        backtrace: Backtrace,
        source: std::io::Error,
    },

    #[snafu(display("Could not write {} reserved bytes", bytes))]
    WriteReserved {
        bytes: u32,
        backtrace: Backtrace,
        source: std::io::Error,
    },

    #[snafu(display("Could not encode field `{}`", field))]
    EncodeField {
        field: &'static str,
        #[snafu(backtrace)]
        source: dicom_encoding::text::EncodeTextError,
    },

    #[snafu(display("Field `{}` is too long ({} bytes)", field, length))]
    FieldTooLong {
        field: &'static str,
        length: usize,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum WriteChunkError {
    #[snafu(display("Failed to build chunk"))]
    BuildChunk {
        backtrace: Backtrace,
        source: Box<Error>,
    },
    #[snafu(display("Chunk of {} bytes does not fit its length field", length))]
    ChunkTooLong { length: usize, backtrace: Backtrace },
    #[snafu(display("Failed to write chunk length"))]
    WriteLength {
        backtrace: Backtrace,
        source: std::io::Error,
    },
    #[snafu(display("Failed to write chunk data"))]
    WriteData {
        backtrace: Backtrace,
        source: std::io::Error,
    },
}

/// Build a chunk in memory, then write it prefixed by its 32-bit length.
fn write_chunk_u32<F>(writer: &mut dyn Write, func: F) -> Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).map_err(Box::from).context(BuildChunkSnafu)?;
    let length = u32::try_from(data.len()).map_err(|_| {
        ChunkTooLongSnafu {
            length: data.len(),
        }
        .build()
    })?;
    writer
        .write_u32::<BigEndian>(length)
        .context(WriteLengthSnafu)?;
    writer.write_all(&data).context(WriteDataSnafu)?;
    Ok(())
}

/// Build a chunk in memory, then write it prefixed by its 16-bit length.
fn write_chunk_u16<F>(writer: &mut dyn Write, func: F) -> Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).map_err(Box::from).context(BuildChunkSnafu)?;
    let length = u16::try_from(data.len()).map_err(|_| {
        ChunkTooLongSnafu {
            length: data.len(),
        }
        .build()
    })?;
    writer
        .write_u16::<BigEndian>(length)
        .context(WriteLengthSnafu)?;
    writer.write_all(&data).context(WriteDataSnafu)?;
    Ok(())
}

/// Write a PDU to the given writer, header included.
pub fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> Result<()>
where
    W: Write,
{
    let codec = DefaultCharacterSetCodec;

    writer
        .write_u8(pdu.pdu_type())
        .context(WriteFieldSnafu { field: "PDU-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })?;

    match pdu {
        Pdu::AssociationRQ(AssociationRQ {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => write_chunk_u32(writer, |writer| {
            write_association_header(
                writer,
                &codec,
                *protocol_version,
                called_ae_title,
                calling_ae_title,
            )?;
            write_application_context(writer, &codec, application_context_name)?;
            for pc in presentation_contexts {
                write_presentation_context_proposed(writer, &codec, pc)?;
            }
            write_user_variables(writer, &codec, user_variables)
        })
        .context(WriteChunkSnafu {
            name: "A-ASSOCIATE-RQ",
        }),
        Pdu::AssociationAC(AssociationAC {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => write_chunk_u32(writer, |writer| {
            write_association_header(
                writer,
                &codec,
                *protocol_version,
                called_ae_title,
                calling_ae_title,
            )?;
            write_application_context(writer, &codec, application_context_name)?;
            for pc in presentation_contexts {
                write_presentation_context_result(writer, &codec, pc)?;
            }
            write_user_variables(writer, &codec, user_variables)
        })
        .context(WriteChunkSnafu {
            name: "A-ASSOCIATE-AC",
        }),
        Pdu::AssociationRJ(AssociationRJ { result, source }) => {
            write_chunk_u32(writer, |writer| {
                let (source_code, reason) = source.codes();
                writer
                    .write_u8(0x00)
                    .context(WriteReservedSnafu { bytes: 1_u32 })?;
                writer
                    .write_u8(result.code())
                    .context(WriteFieldSnafu { field: "Result" })?;
                writer
                    .write_u8(source_code)
                    .context(WriteFieldSnafu { field: "Source" })?;
                writer.write_u8(reason).context(WriteFieldSnafu {
                    field: "Reason/Diag.",
                })?;
                Ok(())
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-RJ",
            })
        }
        Pdu::PData { data } => write_chunk_u32(writer, |writer| {
            for pdv in data {
                write_chunk_u32(writer, |writer| {
                    writer
                        .write_u8(pdv.presentation_context_id)
                        .context(WriteFieldSnafu {
                            field: "Presentation-context-ID",
                        })?;
                    writer
                        .write_u8(pdv.control_header())
                        .context(WriteFieldSnafu {
                            field: "Message-control-header",
                        })?;
                    writer.write_all(&pdv.data).context(WriteFieldSnafu {
                        field: "Presentation-data-value",
                    })?;
                    Ok(())
                })
                .context(WriteChunkSnafu {
                    name: "Presentation-data-value item",
                })?;
            }
            Ok(())
        })
        .context(WriteChunkSnafu { name: "P-DATA-TF" }),
        Pdu::ReleaseRQ | Pdu::ReleaseRP => write_chunk_u32(writer, |writer| {
            writer
                .write_u32::<BigEndian>(0)
                .context(WriteReservedSnafu { bytes: 4_u32 })?;
            Ok(())
        })
        .context(WriteChunkSnafu { name: "A-RELEASE" }),
        Pdu::AbortRQ { source } => write_chunk_u32(writer, |writer| {
            let (source_code, reason) = source.codes();
            writer
                .write_u16::<BigEndian>(0)
                .context(WriteReservedSnafu { bytes: 2_u32 })?;
            writer
                .write_u8(source_code)
                .context(WriteFieldSnafu { field: "Source" })?;
            writer.write_u8(reason).context(WriteFieldSnafu {
                field: "Reason/Diag.",
            })?;
            Ok(())
        })
        .context(WriteChunkSnafu { name: "A-ABORT" }),
        Pdu::Unknown { data, .. } => write_chunk_u32(writer, |writer| {
            writer
                .write_all(data)
                .context(WriteFieldSnafu { field: "Unknown" })?;
            Ok(())
        })
        .context(WriteChunkSnafu { name: "Unknown" }),
    }
}

fn write_association_header(
    writer: &mut Vec<u8>,
    codec: &dyn TextCodec,
    protocol_version: u16,
    called_ae_title: &str,
    calling_ae_title: &str,
) -> Result<()> {
    writer
        .write_u16::<BigEndian>(protocol_version)
        .context(WriteFieldSnafu {
            field: "Protocol-version",
        })?;
    writer
        .write_u16::<BigEndian>(0)
        .context(WriteReservedSnafu { bytes: 2_u32 })?;
    write_ae_title(writer, codec, called_ae_title, "Called-AE-title")?;
    write_ae_title(writer, codec, calling_ae_title, "Calling-AE-title")?;
    writer
        .write_all(&[0; 32])
        .context(WriteReservedSnafu { bytes: 32_u32 })?;
    Ok(())
}

/// AE titles occupy exactly 16 bytes, padded with spaces.
fn write_ae_title(
    writer: &mut Vec<u8>,
    codec: &dyn TextCodec,
    ae_title: &str,
    field: &'static str,
) -> Result<()> {
    let mut bytes = codec.encode(ae_title).context(EncodeFieldSnafu { field })?;
    bytes.resize(16, b' ');
    writer
        .write_all(&bytes)
        .context(WriteFieldSnafu { field })?;
    Ok(())
}

fn write_application_context(writer: &mut Vec<u8>, codec: &dyn TextCodec, name: &str) -> Result<()> {
    write_item(writer, 0x10, |writer| {
        write_text(writer, codec, name, "Application-context-name")
    })
}

fn write_presentation_context_proposed(
    writer: &mut Vec<u8>,
    codec: &dyn TextCodec,
    pc: &PresentationContextProposed,
) -> Result<()> {
    write_item(writer, 0x20, |writer| {
        writer.write_u8(pc.id).context(WriteFieldSnafu {
            field: "Presentation-context-ID",
        })?;
        writer
            .write_all(&[0; 3])
            .context(WriteReservedSnafu { bytes: 3_u32 })?;
        write_item(writer, 0x30, |writer| {
            write_text(writer, codec, &pc.abstract_syntax, "Abstract-syntax-name")
        })?;
        for ts in &pc.transfer_syntaxes {
            write_item(writer, 0x40, |writer| {
                write_text(writer, codec, ts, "Transfer-syntax-name")
            })?;
        }
        Ok(())
    })
}

fn write_presentation_context_result(
    writer: &mut Vec<u8>,
    codec: &dyn TextCodec,
    pc: &PresentationContextResult,
) -> Result<()> {
    write_item(writer, 0x21, |writer| {
        writer.write_u8(pc.id).context(WriteFieldSnafu {
            field: "Presentation-context-ID",
        })?;
        writer
            .write_u8(0)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;
        writer.write_u8(pc.reason as u8).context(WriteFieldSnafu {
            field: "Result/Reason",
        })?;
        writer
            .write_u8(0)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;
        write_item(writer, 0x40, |writer| {
            write_text(writer, codec, &pc.transfer_syntax, "Transfer-syntax-name")
        })
    })
}

fn write_user_variables(
    writer: &mut Vec<u8>,
    codec: &dyn TextCodec,
    user_variables: &[UserVariableItem],
) -> Result<()> {
    write_item(writer, 0x50, |writer| {
        for item in user_variables {
            match item {
                UserVariableItem::MaxLength(max_length) => write_item(writer, 0x51, |writer| {
                    writer
                        .write_u32::<BigEndian>(*max_length)
                        .context(WriteFieldSnafu {
                            field: "Maximum-length-received",
                        })
                })?,
                UserVariableItem::ImplementationClassUID(uid) => {
                    write_item(writer, 0x52, |writer| {
                        write_text(writer, codec, uid, "Implementation-class-uid")
                    })?
                }
                UserVariableItem::ImplementationVersionName(name) => {
                    write_item(writer, 0x55, |writer| {
                        write_text(writer, codec, name, "Implementation-version-name")
                    })?
                }
                UserVariableItem::SopClassExtendedNegotiationSubItem(sop_class_uid, info) => {
                    write_item(writer, 0x56, |writer| {
                        write_chunk_u16(writer, |writer| {
                            write_text(writer, codec, sop_class_uid, "SOP-class-uid")
                        })
                        .context(WriteChunkSnafu {
                            name: "SOP-class-uid",
                        })?;
                        writer.write_all(info).context(WriteFieldSnafu {
                            field: "Service-class-application-information",
                        })
                    })?
                }
                UserVariableItem::UserIdentityItem(identity) => {
                    write_item(writer, 0x58, |writer| {
                        writer
                            .write_u8(identity.identity_type().code())
                            .context(WriteFieldSnafu {
                                field: "User-Identity-Type",
                            })?;
                        writer
                            .write_u8(u8::from(identity.positive_response_requested()))
                            .context(WriteFieldSnafu {
                                field: "Positive-response-requested",
                            })?;
                        write_chunk_u16(writer, |writer| {
                            writer
                                .write_all(identity.primary_field())
                                .context(WriteFieldSnafu {
                                    field: "Primary-field",
                                })
                        })
                        .context(WriteChunkSnafu {
                            name: "Primary-field",
                        })?;
                        write_chunk_u16(writer, |writer| {
                            writer
                                .write_all(identity.secondary_field())
                                .context(WriteFieldSnafu {
                                    field: "Secondary-field",
                                })
                        })
                        .context(WriteChunkSnafu {
                            name: "Secondary-field",
                        })
                    })?
                }
                UserVariableItem::Unknown(item_type, data) => {
                    write_item(writer, *item_type, |writer| {
                        writer
                            .write_all(data)
                            .context(WriteFieldSnafu { field: "Unknown" })
                    })?
                }
            }
        }
        Ok(())
    })
}

/// Write an item or sub-item: type, reserved byte and 16-bit length.
fn write_item<F>(writer: &mut Vec<u8>, item_type: u8, func: F) -> Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    writer
        .write_u8(item_type)
        .context(WriteFieldSnafu { field: "Item-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })?;
    write_chunk_u16(writer, func).context(WriteChunkSnafu { name: "Item" })
}

fn write_text(
    writer: &mut Vec<u8>,
    codec: &dyn TextCodec,
    text: &str,
    field: &'static str,
) -> Result<()> {
    let bytes = codec.encode(text).context(EncodeFieldSnafu { field })?;
    snafu::ensure!(
        bytes.len() <= u16::MAX as usize,
        FieldTooLongSnafu {
            field,
            length: bytes.len()
        }
    );
    writer
        .write_all(&bytes)
        .context(WriteFieldSnafu { field })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_rq_bytes() {
        let mut out = vec![];
        write_pdu(&mut out, &Pdu::ReleaseRQ).unwrap();
        assert_eq!(out, [0x05, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn abort_bytes() {
        let mut out = vec![];
        write_pdu(
            &mut out,
            &Pdu::AbortRQ {
                source: AbortRQSource::ServiceProvider(
                    AbortRQServiceProviderReason::UnexpectedPdu,
                ),
            },
        )
        .unwrap();
        assert_eq!(out, [0x07, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x02, 0x02]);
    }

    #[test]
    fn pdata_bytes() {
        let mut out = vec![];
        write_pdu(
            &mut out,
            &Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: 1,
                    value_type: PDataValueType::Command,
                    is_last: true,
                    data: vec![0xAA, 0xBB],
                }],
            },
        )
        .unwrap();
        assert_eq!(
            out,
            [
                0x04, 0x00, 0x00, 0x00, 0x00, 0x08, // PDU header
                0x00, 0x00, 0x00, 0x04, 0x01, 0x03, // PDV header
                0xAA, 0xBB,
            ]
        );
    }

    #[test]
    fn ae_titles_are_space_padded() {
        let mut out = vec![];
        write_ae_title(&mut out, &DefaultCharacterSetCodec, "STORE-SCP", "AE").unwrap();
        assert_eq!(out, b"STORE-SCP       ");
    }
}
