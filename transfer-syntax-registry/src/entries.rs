//! Built-in transfer syntax descriptors.
//!
//! These are the well-known syntaxes which
//! [`TransferSyntaxRegistryBuilder::with_builtin_entries`](crate::TransferSyntaxRegistryBuilder::with_builtin_entries)
//! registers.
//! Whether a syntax can actually be transcoded to
//! depends on the codecs registered separately,
//! since this list only describes how each syntax encodes data.

use crate::{PixelEncoding, TransferSyntax};
use byteordered::Endianness;

// -- native encodings --

/// Implicit VR Little Endian: Default Transfer Syntax for DICOM
pub const IMPLICIT_VR_LITTLE_ENDIAN: TransferSyntax = TransferSyntax::new(
    "1.2.840.10008.1.2",
    "Implicit VR Little Endian",
    Endianness::Little,
    false,
    PixelEncoding::Native,
);

/// Explicit VR Little Endian
pub const EXPLICIT_VR_LITTLE_ENDIAN: TransferSyntax = TransferSyntax::new(
    "1.2.840.10008.1.2.1",
    "Explicit VR Little Endian",
    Endianness::Little,
    true,
    PixelEncoding::Native,
);

/// Explicit VR Big Endian (retired)
pub const EXPLICIT_VR_BIG_ENDIAN: TransferSyntax = TransferSyntax::new(
    "1.2.840.10008.1.2.2",
    "Explicit VR Big Endian",
    Endianness::Big,
    true,
    PixelEncoding::Native,
);

/// Deflated Explicit VR Little Endian
pub const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: TransferSyntax = TransferSyntax::new(
    "1.2.840.10008.1.2.1.99",
    "Deflated Explicit VR Little Endian",
    Endianness::Little,
    true,
    PixelEncoding::Deflated,
);

// -- encapsulated pixel data --

/// JPEG Baseline (Process 1): lossy 8-bit image compression
pub const JPEG_BASELINE: TransferSyntax = encapsulated(
    "1.2.840.10008.1.2.4.50",
    "JPEG Baseline (Process 1)",
    true,
);

/// JPEG Extended (Process 2 & 4): lossy 12-bit image compression
pub const JPEG_EXTENDED: TransferSyntax = encapsulated(
    "1.2.840.10008.1.2.4.51",
    "JPEG Extended (Process 2 & 4)",
    true,
);

/// JPEG Lossless, Non-Hierarchical (Process 14)
pub const JPEG_LOSSLESS_NON_HIERARCHICAL: TransferSyntax = encapsulated(
    "1.2.840.10008.1.2.4.57",
    "JPEG Lossless, Non-Hierarchical (Process 14)",
    false,
);

/// JPEG Lossless, Non-Hierarchical, First-Order Prediction
/// (Process 14 [Selection Value 1])
pub const JPEG_LOSSLESS_NON_HIERARCHICAL_FIRST_ORDER_PREDICTION: TransferSyntax = encapsulated(
    "1.2.840.10008.1.2.4.70",
    "JPEG Lossless, Non-Hierarchical, First-Order Prediction",
    false,
);

/// JPEG-LS Lossless Image Compression
pub const JPEG_LS_LOSSLESS_IMAGE_COMPRESSION: TransferSyntax = encapsulated(
    "1.2.840.10008.1.2.4.80",
    "JPEG-LS Lossless Image Compression",
    false,
);

/// JPEG-LS Lossy (Near-Lossless) Image Compression
pub const JPEG_LS_LOSSY_IMAGE_COMPRESSION: TransferSyntax = encapsulated(
    "1.2.840.10008.1.2.4.81",
    "JPEG-LS Lossy (Near-Lossless) Image Compression",
    true,
);

/// JPEG 2000 Image Compression (Lossless Only)
pub const JPEG_2000_IMAGE_COMPRESSION_LOSSLESS_ONLY: TransferSyntax = encapsulated(
    "1.2.840.10008.1.2.4.90",
    "JPEG 2000 Image Compression (Lossless Only)",
    false,
);

/// JPEG 2000 Image Compression
pub const JPEG_2000_IMAGE_COMPRESSION: TransferSyntax = encapsulated(
    "1.2.840.10008.1.2.4.91",
    "JPEG 2000 Image Compression",
    true,
);

/// RLE Lossless
pub const RLE_LOSSLESS: TransferSyntax =
    encapsulated("1.2.840.10008.1.2.5", "RLE Lossless", false);

/// All built-in entries, in registration order.
pub const BUILTIN: &[TransferSyntax] = &[
    IMPLICIT_VR_LITTLE_ENDIAN,
    EXPLICIT_VR_LITTLE_ENDIAN,
    EXPLICIT_VR_BIG_ENDIAN,
    DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN,
    JPEG_BASELINE,
    JPEG_EXTENDED,
    JPEG_LOSSLESS_NON_HIERARCHICAL,
    JPEG_LOSSLESS_NON_HIERARCHICAL_FIRST_ORDER_PREDICTION,
    JPEG_LS_LOSSLESS_IMAGE_COMPRESSION,
    JPEG_LS_LOSSY_IMAGE_COMPRESSION,
    JPEG_2000_IMAGE_COMPRESSION_LOSSLESS_ONLY,
    JPEG_2000_IMAGE_COMPRESSION,
    RLE_LOSSLESS,
];

/// Encapsulated syntaxes always use explicit VR little endian
/// for the data set.
const fn encapsulated(uid: &'static str, name: &'static str, lossy: bool) -> TransferSyntax {
    TransferSyntax::new(
        uid,
        name,
        Endianness::Little,
        true,
        PixelEncoding::Encapsulated { lossy },
    )
}
