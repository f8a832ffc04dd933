//! Moving the pixel data of a data set to another transfer syntax.
//!
//! The object is transcoded in a staged copy.
//! Only once every frame is encoded
//! are the object and its transfer syntax replaced together,
//! so a failure leaves the data set as it was.
use std::sync::Arc;
use std::time::{Duration, Instant};

use dicom_core::{Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use pacsnet_transfer_syntax_registry::{TransferSyntax, TransferSyntaxRegistry};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use snafu::{ensure, OptionExt, ResultExt};
use tracing::{debug, info};

use crate::attribute::put_str;
use crate::codec::{Codec, CodecParameters, CodecRegistry, EncodeOptions, LossyParameters};
use crate::dataset::Dataset;
use crate::description::ImageDescription;
use crate::pixel::{encapsulated_frames, native_frames, PixelData};
use crate::{
    overlay, palette, FrameSnafu, NotNativeSnafu, PaletteConversionRequiredSnafu, Result,
    UnknownTransferSyntaxSnafu,
};

const LOSSY_IMAGE_COMPRESSION: Tag = Tag(0x0028, 0x2110);
const LOSSY_IMAGE_COMPRESSION_RATIO: Tag = Tag(0x0028, 0x2112);
const LOSSY_IMAGE_COMPRESSION_METHOD: Tag = Tag(0x0028, 0x2114);

/// What a compression or decompression did to a data set.
#[derive(Debug, Clone, PartialEq)]
pub enum CompressOutcome {
    /// Nothing to do: the data set was already in the target transfer syntax,
    /// or has no pixel data to compress.
    Unchanged,
    /// The data set is now in the target transfer syntax.
    Transcoded {
        transfer_syntax: String,
        frames: u32,
        /// size of the new pixel data in bytes
        encoded_size: usize,
        duration: Duration,
    },
}

/// Transcodes pixel data using the registered codecs.
#[derive(Debug, Clone)]
pub struct Compressor {
    ts_registry: Arc<TransferSyntaxRegistry>,
    codecs: Arc<CodecRegistry>,
}

impl Compressor {
    pub fn new(ts_registry: Arc<TransferSyntaxRegistry>, codecs: Arc<CodecRegistry>) -> Self {
        Compressor {
            ts_registry,
            codecs,
        }
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    fn resolve(&self, uid: &str) -> Result<&TransferSyntax> {
        let ts = self
            .ts_registry
            .get(uid)
            .context(UnknownTransferSyntaxSnafu { uid })?;
        Ok(ts)
    }

    /// Compress the pixel data of the data set
    /// into the target transfer syntax.
    ///
    /// Parameters of lossy codecs are validated before any encoding.
    /// A PALETTE COLOR image is converted to RGB first
    /// if the parameters ask for it,
    /// and refused if the codec cannot encode it otherwise.
    /// Overlays embedded in native pixel data
    /// are extracted to their own Overlay Data elements.
    ///
    /// A native target is handled by [`decompress`](Self::decompress).
    pub fn compress(
        &self,
        dataset: &mut Dataset,
        target_uid: &str,
        parameters: &CodecParameters,
    ) -> Result<CompressOutcome> {
        let start = Instant::now();
        let target = self.resolve(target_uid)?;
        if dataset.transfer_syntax() == target.uid() {
            return Ok(CompressOutcome::Unchanged);
        }
        if !target.is_encapsulated() {
            return self.decompress(dataset, target_uid);
        }
        let current = self.resolve(dataset.transfer_syntax())?;
        if dataset.object().element(tags::PIXEL_DATA).is_err() {
            debug!("No pixel data to compress");
            return Ok(CompressOutcome::Unchanged);
        }

        let codec = self.codecs.get(target.uid())?;
        let options = if codec.is_lossy() || target.is_lossy() {
            EncodeOptions::from(LossyParameters::from_parameters(parameters)?)
        } else {
            EncodeOptions::default()
        };

        let mut staged = dataset.object().clone();
        let mut desc = ImageDescription::from_object(&staged)?;
        let mut native = self.native_pixels(&staged, current, &desc)?;

        if desc.is_palette() {
            if parameters.convert_from_palette {
                debug!("Converting PALETTE COLOR image to RGB");
                let (rgb, rgb_desc) = palette::convert_from_palette(&mut staged, &desc, &native)?;
                native = rgb;
                desc = rgb_desc;
            } else {
                ensure!(
                    codec.supports_palette(),
                    PaletteConversionRequiredSnafu { codec: codec.name() }
                );
            }
        }

        if current.is_native() {
            let groups = overlay::extract_embedded_overlays(&mut staged, &desc, &native)?;
            if !groups.is_empty() {
                debug!("Extracted {} embedded overlay(s)", groups.len());
            }
        }

        let frames = native_frames(&desc, &native)?;
        let fragments = encode_frames(&**codec, &desc, &frames, &options)?;
        let encoded_size: usize = fragments.iter().map(Vec::len).sum();

        if codec.is_lossy() || target.is_lossy() {
            let ratio = desc.frame_size() as f64 * frames.len() as f64 / encoded_size.max(1) as f64;
            put_str(&mut staged, LOSSY_IMAGE_COMPRESSION, VR::CS, "01");
            put_str(
                &mut staged,
                LOSSY_IMAGE_COMPRESSION_RATIO,
                VR::DS,
                &format!("{:.2}", ratio),
            );
            if let Some(method) = codec.lossy_method() {
                put_str(&mut staged, LOSSY_IMAGE_COMPRESSION_METHOD, VR::CS, method);
            }
        }
        staged.put(PixelData::encapsulate(fragments).into_element(desc.bits_allocated));

        dataset.commit(target.uid(), staged);
        let duration = start.elapsed();
        info!(
            "Compressed {} frame(s) to {} ({} bytes) in {:?}",
            desc.number_of_frames, target, encoded_size, duration
        );
        Ok(CompressOutcome::Transcoded {
            transfer_syntax: target.uid().to_string(),
            frames: desc.number_of_frames,
            encoded_size,
            duration,
        })
    }

    /// Decompress the pixel data of the data set
    /// into a native transfer syntax.
    pub fn decompress(&self, dataset: &mut Dataset, target_uid: &str) -> Result<CompressOutcome> {
        let start = Instant::now();
        let target = self.resolve(target_uid)?;
        ensure!(!target.is_encapsulated(), NotNativeSnafu { uid: target.uid() });
        if dataset.transfer_syntax() == target.uid() {
            return Ok(CompressOutcome::Unchanged);
        }
        let current = self.resolve(dataset.transfer_syntax())?;
        if !current.is_encapsulated() {
            // native pixel data is re-encoded along with the rest of the data set
            dataset.set_transfer_syntax(target.uid());
            return Ok(CompressOutcome::Transcoded {
                transfer_syntax: target.uid().to_string(),
                frames: ImageDescription::from_object(dataset.object())
                    .map(|desc| desc.number_of_frames)
                    .unwrap_or(0),
                encoded_size: 0,
                duration: start.elapsed(),
            });
        }

        let mut staged = dataset.object().clone();
        let desc = ImageDescription::from_object(&staged)?;
        let native = self.native_pixels(&staged, current, &desc)?;
        let encoded_size = native.len();
        staged.put(PixelData::Native(native).into_element(desc.bits_allocated));

        dataset.commit(target.uid(), staged);
        let duration = start.elapsed();
        info!("Decompressed to {} in {:?}", target, duration);
        Ok(CompressOutcome::Transcoded {
            transfer_syntax: target.uid().to_string(),
            frames: desc.number_of_frames,
            encoded_size,
            duration,
        })
    }

    /// The native pixel data of the object,
    /// decoding it first if it is encapsulated.
    fn native_pixels(
        &self,
        obj: &InMemDicomObject,
        current: &TransferSyntax,
        desc: &ImageDescription,
    ) -> Result<Vec<u8>> {
        match PixelData::from_object(obj)? {
            PixelData::Native(bytes) => Ok(bytes),
            PixelData::Encapsulated {
                offset_table,
                fragments,
            } => {
                let codec = self.codecs.get(current.uid())?;
                let frames = encapsulated_frames(desc, &offset_table, &fragments)?;
                let mut native = Vec::with_capacity(desc.frame_size() * frames.len());
                for (i, frame) in frames.iter().enumerate() {
                    let decoded = codec
                        .decode_frame(desc, frame)
                        .context(FrameSnafu { frame: i })?;
                    native.extend_from_slice(&decoded);
                }
                Ok(native)
            }
        }
    }
}

fn encode_frames(
    codec: &dyn Codec,
    desc: &ImageDescription,
    frames: &[&[u8]],
    options: &EncodeOptions,
) -> Result<Vec<Vec<u8>>> {
    let encode = |(i, frame): (usize, &&[u8])| -> Result<Vec<u8>> {
        let mut fragment = codec
            .encode_frame(desc, frame, options)
            .context(FrameSnafu { frame: i })?;
        if fragment.len() % 2 == 1 {
            fragment.push(0);
        }
        Ok(fragment)
    };

    #[cfg(feature = "rayon")]
    let fragments = frames.par_iter().enumerate().map(encode).collect();
    #[cfg(not(feature = "rayon"))]
    let fragments = frames.iter().enumerate().map(encode).collect();
    fragments
}
