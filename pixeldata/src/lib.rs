//! Pixel data codecs and the compression pipeline
//! applied to received DICOM objects.
//!
//! A [`Compressor`](compress::Compressor) moves the pixel data of a
//! [`Dataset`](dataset::Dataset) from one transfer syntax to another:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use pacsnet_pixeldata::{codec::{CodecParameters, CodecRegistry}, compress::Compressor, dataset::Dataset};
//! # use pacsnet_transfer_syntax_registry::{entries, TransferSyntaxRegistry};
//! # fn run(bytes: &[u8]) -> pacsnet_pixeldata::Result<()> {
//! let ts_registry = Arc::new(TransferSyntaxRegistry::with_builtin());
//! let codecs = Arc::new(CodecRegistry::with_builtin_codecs()?);
//! let compressor = Compressor::new(ts_registry.clone(), codecs);
//!
//! let mut dataset = Dataset::from_bytes(bytes, entries::EXPLICIT_VR_LITTLE_ENDIAN.uid(), &ts_registry)?;
//! compressor.compress(&mut dataset, entries::RLE_LOSSLESS.uid(), &CodecParameters::default())?;
//! # Ok(())
//! # }
//! ```
//!
//! Codecs are looked up by transfer syntax UID in a
//! [`CodecRegistry`](codec::CodecRegistry),
//! which is built explicitly and shared read-only afterwards.
//! RLE Lossless is always available;
//! JPEG Baseline requires the `jpeg` Cargo feature.
use snafu::Snafu;

mod attribute;
pub mod codec;
pub mod compress;
pub mod dataset;
pub mod description;
#[cfg(feature = "jpeg")]
pub mod jpeg;
pub mod overlay;
pub mod palette;
pub mod pixel;
pub mod rle;

pub use codec::{Codec, CodecParameters, CodecRegistry, CodecRegistryBuilder};
pub use compress::{CompressOutcome, Compressor};
pub use dataset::Dataset;
pub use description::ImageDescription;
pub use pixel::PixelData;

/// An error raised while transcoding pixel data.
#[derive(Debug, Snafu)]
pub struct Error(InnerError);

/// Alias for the result of pixel data operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum InnerError {
    /// Unknown transfer syntax `{uid}`
    UnknownTransferSyntax { uid: String },

    /// No codec registered for transfer syntax `{uid}`
    UnsupportedCodec { uid: String },

    /// A codec is already registered for transfer syntax `{uid}`
    DuplicateCodec { uid: String },

    /// Lossy compression needs a quality or a ratio
    MissingLossyParameter,

    /// Invalid {name} `{value}`: {reason}
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: &'static str,
    },

    /// Missing attribute {name}
    MissingAttribute { name: &'static str },

    /// Could not convert attribute {name}
    ConvertAttribute {
        name: &'static str,
        source: dicom_core::value::ConvertValueError,
    },

    /// Invalid value `{value}` for attribute {name}
    InvalidAttribute { name: &'static str, value: String },

    /// Pixel data is too short: expected {expected} bytes, got {got}
    PixelDataTooShort { expected: usize, got: usize },

    /// Expected {expected} fragments, one per frame, got {got}
    FragmentCount { expected: usize, got: usize },

    /// Basic offset table {offset_table:?} does not locate {frames} frames
    InvalidOffsetTable { offset_table: Vec<u32>, frames: u32 },

    /// Image frames of {rows}x{columns} pixels hold no samples
    EmptyFrame { rows: u16, columns: u16 },

    /// The {codec} codec cannot encode PALETTE COLOR images without converting them first
    PaletteConversionRequired { codec: &'static str },

    /// Invalid palette: {reason}
    InvalidPalette { reason: String },

    /// The {codec} codec does not support this image: {reason}
    UnsupportedImage { codec: &'static str, reason: String },

    /// The {codec} codec failed: {reason}
    CodecFailed { codec: &'static str, reason: String },

    /// Invalid RLE data: {reason}
    InvalidRle { reason: String },

    /// Could not transcode frame #{frame}
    Frame {
        frame: usize,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    /// Transfer syntax {uid} is not native
    NotNative { uid: String },

    /// Data sets cannot be encoded in transfer syntax {uid}
    DatasetEncodingUnsupported { uid: String },

    /// Could not read data set
    ReadDataset { source: dicom_object::ReadError },

    /// Could not write data set
    WriteDataset { source: dicom_object::WriteError },
}

/// The broad category of a pixel data [`Error`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// the transfer syntax UID is not registered
    UnknownTransferSyntax,
    /// no codec is registered for the transfer syntax
    UnsupportedCodec,
    /// a codec was registered twice for one transfer syntax
    DuplicateCodec,
    /// a codec parameter is missing or malformed
    InvalidParameter,
    /// the image attributes or pixel data are missing or inconsistent
    InvalidImage,
    /// the codec could not encode or decode the pixel data
    Codec,
    /// the data set could not be read or written
    Dataset,
}

impl Error {
    /// Report a failure from within a codec implementation.
    pub fn codec_failed(codec: &'static str, reason: impl std::fmt::Display) -> Self {
        Error(InnerError::CodecFailed {
            codec,
            reason: reason.to_string(),
        })
    }

    pub fn kind(&self) -> ErrorKind {
        match &self.0 {
            InnerError::UnknownTransferSyntax { .. } => ErrorKind::UnknownTransferSyntax,
            InnerError::UnsupportedCodec { .. } => ErrorKind::UnsupportedCodec,
            InnerError::DuplicateCodec { .. } => ErrorKind::DuplicateCodec,
            InnerError::MissingLossyParameter | InnerError::InvalidParameter { .. } => {
                ErrorKind::InvalidParameter
            }
            InnerError::MissingAttribute { .. }
            | InnerError::ConvertAttribute { .. }
            | InnerError::InvalidAttribute { .. }
            | InnerError::PixelDataTooShort { .. }
            | InnerError::FragmentCount { .. }
            | InnerError::InvalidOffsetTable { .. }
            | InnerError::EmptyFrame { .. }
            | InnerError::PaletteConversionRequired { .. }
            | InnerError::InvalidPalette { .. }
            | InnerError::NotNative { .. } => ErrorKind::InvalidImage,
            InnerError::UnsupportedImage { .. }
            | InnerError::CodecFailed { .. }
            | InnerError::InvalidRle { .. } => ErrorKind::Codec,
            InnerError::Frame { source, .. } => source.kind(),
            InnerError::DatasetEncodingUnsupported { .. }
            | InnerError::ReadDataset { .. }
            | InnerError::WriteDataset { .. } => ErrorKind::Dataset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_errors_take_the_kind_of_their_cause() {
        let cause = Error(InnerError::InvalidRle {
            reason: "truncated".to_string(),
        });
        let e = Error(InnerError::Frame {
            frame: 2,
            source: Box::new(cause),
        });
        assert_eq!(e.kind(), ErrorKind::Codec);
        assert_eq!(e.to_string(), "Could not transcode frame #2");
    }

    #[test]
    fn codec_failures_are_codec_errors() {
        let e = Error::codec_failed("JPEG Baseline", "bad marker");
        assert_eq!(e.kind(), ErrorKind::Codec);
        assert_eq!(e.to_string(), "The JPEG Baseline codec failed: bad marker");
    }
}
