//! Codecs and their registry.
//!
//! A codec turns one native frame into one compressed fragment
//! and back.
//! Codecs are registered against transfer syntax UIDs
//! in a [`CodecRegistry`],
//! which is populated once through a [`CodecRegistryBuilder`]
//! and shared read-only afterwards.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use pacsnet_transfer_syntax_registry::{entries, trim_uid};
use snafu::{ensure, OptionExt};
use tracing::debug;

use crate::description::ImageDescription;
use crate::{
    DuplicateCodecSnafu, InvalidParameterSnafu, MissingLossyParameterSnafu, Result,
    UnsupportedCodecSnafu,
};

/// Options given to a codec when encoding a frame.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct EncodeOptions {
    /// quality, from 1 to 100
    pub quality: Option<u8>,
    /// target compression ratio
    pub ratio: Option<f64>,
}

/// An image codec for one transfer syntax.
///
/// An implementation is both the encoder and the decoder,
/// and is shared between threads through an `Arc`.
pub trait Codec: fmt::Debug + Send + Sync {
    /// A human readable name for logging and errors.
    fn name(&self) -> &'static str;

    /// Whether encoding discards information.
    fn is_lossy(&self) -> bool;

    /// Whether PALETTE COLOR images can be encoded as they are.
    fn supports_palette(&self) -> bool {
        false
    }

    /// The value of Lossy Image Compression Method
    /// for images encoded by this codec.
    fn lossy_method(&self) -> Option<&'static str> {
        None
    }

    /// Encode one native frame into one fragment.
    fn encode_frame(
        &self,
        desc: &ImageDescription,
        frame: &[u8],
        options: &EncodeOptions,
    ) -> Result<Vec<u8>>;

    /// Decode the fragment data of one frame into native samples.
    fn decode_frame(&self, desc: &ImageDescription, data: &[u8]) -> Result<Vec<u8>>;
}

/// A registry of codecs by transfer syntax UID.
#[derive(Debug, Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn Codec>>,
}

impl CodecRegistry {
    pub fn builder() -> CodecRegistryBuilder {
        CodecRegistryBuilder::default()
    }

    /// A registry with the codecs built into this crate.
    pub fn with_builtin_codecs() -> Result<Self> {
        Ok(Self::builder().with_builtin_codecs()?.build())
    }

    /// Look up the codec for a transfer syntax.
    pub fn lookup(&self, uid: &str) -> Option<&Arc<dyn Codec>> {
        self.codecs.get(trim_uid(uid))
    }

    /// Look up the codec for a transfer syntax,
    /// failing with `UnsupportedCodec` if there is none.
    pub fn get(&self, uid: &str) -> Result<&Arc<dyn Codec>> {
        let codec = self
            .lookup(uid)
            .context(UnsupportedCodecSnafu { uid: trim_uid(uid) })?;
        Ok(codec)
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.codecs.contains_key(trim_uid(uid))
    }

    /// The transfer syntaxes with a registered codec.
    pub fn uids(&self) -> impl Iterator<Item = &str> {
        self.codecs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

/// Builder for a [`CodecRegistry`].
#[derive(Debug, Default)]
pub struct CodecRegistryBuilder {
    registry: CodecRegistry,
}

impl CodecRegistryBuilder {
    /// Register a codec for a transfer syntax.
    ///
    /// Fails if a codec is already registered for the same UID.
    pub fn register(&mut self, uid: &str, codec: Arc<dyn Codec>) -> Result<&mut Self> {
        let uid = trim_uid(uid).to_string();
        ensure!(
            !self.registry.codecs.contains_key(&uid),
            DuplicateCodecSnafu { uid }
        );
        debug!("Registering {} codec for {}", codec.name(), uid);
        self.registry.codecs.insert(uid, codec);
        Ok(self)
    }

    /// Register the codecs built into this crate.
    ///
    /// Fails with `DuplicateCodec` if a codec was already registered
    /// for one of their transfer syntaxes.
    pub fn with_builtin_codecs(mut self) -> Result<Self> {
        let rle = entries::RLE_LOSSLESS;
        self.register(rle.uid(), Arc::new(crate::rle::RleLossless))?;
        #[cfg(feature = "jpeg")]
        {
            let jpeg = entries::JPEG_BASELINE;
            self.register(jpeg.uid(), Arc::new(crate::jpeg::JpegBaseline))?;
        }
        Ok(self)
    }

    pub fn build(self) -> CodecRegistry {
        self.registry
    }
}

/// Codec parameters as configured by the user,
/// not yet validated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodecParameters {
    /// quality, an integer from 1 to 100
    pub quality: Option<String>,
    /// compression ratio, such as `10` or `10:1`
    pub ratio: Option<String>,
    /// convert PALETTE COLOR images to RGB before encoding
    pub convert_from_palette: bool,
}

impl CodecParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    pub fn ratio(mut self, ratio: impl Into<String>) -> Self {
        self.ratio = Some(ratio.into());
        self
    }

    pub fn convert_from_palette(mut self, convert: bool) -> Self {
        self.convert_from_palette = convert;
        self
    }
}

/// Validated parameters for lossy compression.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LossyParameters {
    pub quality: Option<u8>,
    pub ratio: Option<f64>,
}

impl LossyParameters {
    /// Validate the user's parameters.
    ///
    /// At least one of quality and ratio must be given,
    /// and every given value must parse and be in range.
    pub fn from_parameters(parameters: &CodecParameters) -> Result<Self> {
        let quality = parameters.quality.as_deref().map(parse_quality).transpose()?;
        let ratio = parameters.ratio.as_deref().map(parse_ratio).transpose()?;
        ensure!(
            quality.is_some() || ratio.is_some(),
            MissingLossyParameterSnafu
        );
        Ok(LossyParameters { quality, ratio })
    }
}

impl From<LossyParameters> for EncodeOptions {
    fn from(p: LossyParameters) -> Self {
        EncodeOptions {
            quality: p.quality,
            ratio: p.ratio,
        }
    }
}

fn parse_quality(value: &str) -> Result<u8> {
    let quality: u8 = value.trim().parse().ok().context(InvalidParameterSnafu {
        name: "quality",
        value,
        reason: "not an integer between 1 and 100",
    })?;
    ensure!(
        (1..=100).contains(&quality),
        InvalidParameterSnafu {
            name: "quality",
            value,
            reason: "not an integer between 1 and 100",
        }
    );
    Ok(quality)
}

fn parse_ratio(value: &str) -> Result<f64> {
    let number = value.trim();
    let number = number.strip_suffix(":1").unwrap_or(number);
    let ratio: f64 = number.trim().parse().ok().context(InvalidParameterSnafu {
        name: "ratio",
        value,
        reason: "not a number",
    })?;
    ensure!(
        ratio.is_finite() && ratio > 1.,
        InvalidParameterSnafu {
            name: "ratio",
            value,
            reason: "must be greater than 1",
        }
    );
    Ok(ratio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use rstest::rstest;

    #[rstest]
    #[case(Some("75"), None, Some(75), None)]
    #[case(None, Some("10"), None, Some(10.))]
    #[case(None, Some("12.5:1"), None, Some(12.5))]
    #[case(Some(" 1"), Some("2"), Some(1), Some(2.))]
    fn valid_lossy_parameters(
        #[case] quality: Option<&str>,
        #[case] ratio: Option<&str>,
        #[case] expected_quality: Option<u8>,
        #[case] expected_ratio: Option<f64>,
    ) {
        let parameters = CodecParameters {
            quality: quality.map(String::from),
            ratio: ratio.map(String::from),
            convert_from_palette: false,
        };
        let lossy = LossyParameters::from_parameters(&parameters).unwrap();
        assert_eq!(lossy.quality, expected_quality);
        assert_eq!(lossy.ratio, expected_ratio);
    }

    #[rstest]
    #[case(Some("0"), None)]
    #[case(Some("101"), None)]
    #[case(Some("high"), None)]
    #[case(None, Some("1"))]
    #[case(None, Some("1:2"))]
    #[case(None, Some("NaN"))]
    fn invalid_lossy_parameters(#[case] quality: Option<&str>, #[case] ratio: Option<&str>) {
        let parameters = CodecParameters {
            quality: quality.map(String::from),
            ratio: ratio.map(String::from),
            convert_from_palette: false,
        };
        let e = LossyParameters::from_parameters(&parameters).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn lossy_parameters_are_required() {
        let e = LossyParameters::from_parameters(&CodecParameters::new()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidParameter);
        assert_eq!(e.to_string(), "Lossy compression needs a quality or a ratio");
    }

    #[test]
    fn duplicate_registration_fails_in_any_order() {
        let rle: Arc<dyn Codec> = Arc::new(crate::rle::RleLossless);

        let mut builder = CodecRegistry::builder();
        builder.register(entries::RLE_LOSSLESS.uid(), rle.clone()).unwrap();
        let e = builder
            .register("1.2.840.10008.1.2.5\0", rle.clone())
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::DuplicateCodec);

        // built-in codecs first, extension second
        let mut builder = CodecRegistry::builder().with_builtin_codecs().unwrap();
        let e = builder.register(entries::RLE_LOSSLESS.uid(), rle.clone()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::DuplicateCodec);

        // extension first, built-in codecs second
        let mut builder = CodecRegistry::builder();
        builder.register(entries::RLE_LOSSLESS.uid(), rle).unwrap();
        let e = builder.with_builtin_codecs().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::DuplicateCodec);
        assert_eq!(
            e.to_string(),
            "A codec is already registered for transfer syntax `1.2.840.10008.1.2.5`"
        );
    }

    #[test]
    fn builtin_codecs() {
        let registry = CodecRegistry::with_builtin_codecs().unwrap();
        assert!(registry.contains(entries::RLE_LOSSLESS.uid()));
        assert_eq!(
            registry.contains(entries::JPEG_BASELINE.uid()),
            cfg!(feature = "jpeg")
        );
        let e = registry.get(entries::JPEG_2000_IMAGE_COMPRESSION.uid()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::UnsupportedCodec);
    }
}
