//! JPEG Baseline codec,
//! for 8-bit monochrome and RGB images.
use std::io::Cursor;

use jpeg_decoder::Decoder;
use jpeg_encoder::{ColorType, Encoder};
use snafu::{ensure, OptionExt};

use crate::codec::{Codec, EncodeOptions};
use crate::description::ImageDescription;
use crate::{Error, MissingLossyParameterSnafu, Result, UnsupportedImageSnafu};

const NAME: &str = "JPEG Baseline";

/// The JPEG Baseline (Process 1) codec.
#[derive(Debug, Copy, Clone, Default)]
pub struct JpegBaseline;

fn color_type(desc: &ImageDescription) -> Result<ColorType> {
    ensure!(
        desc.bits_allocated == 8,
        UnsupportedImageSnafu {
            codec: NAME,
            reason: format!("{} bits allocated", desc.bits_allocated),
        }
    );
    match desc.samples_per_pixel {
        1 => Ok(ColorType::Luma),
        3 => Ok(ColorType::Rgb),
        spp => UnsupportedImageSnafu {
            codec: NAME,
            reason: format!("{} samples per pixel", spp),
        }
        .fail()
        .map_err(Error::from),
    }
}

/// Rearrange one plane per sample into interleaved samples.
fn interleave(planar: &[u8], samples: usize) -> Vec<u8> {
    let pixels = planar.len() / samples;
    (0..pixels)
        .flat_map(|p| (0..samples).map(move |s| planar[s * pixels + p]))
        .collect()
}

fn deinterleave(interleaved: &[u8], samples: usize) -> Vec<u8> {
    let pixels = interleaved.len() / samples;
    (0..samples)
        .flat_map(|s| (0..pixels).map(move |p| interleaved[p * samples + s]))
        .collect()
}

impl Codec for JpegBaseline {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_lossy(&self) -> bool {
        true
    }

    fn lossy_method(&self) -> Option<&'static str> {
        Some("ISO_10918_1")
    }

    fn encode_frame(
        &self,
        desc: &ImageDescription,
        frame: &[u8],
        options: &EncodeOptions,
    ) -> Result<Vec<u8>> {
        let color_type = color_type(desc)?;
        let quality = options.quality.context(MissingLossyParameterSnafu)?;
        let frame = &frame[..desc.frame_size().min(frame.len())];
        let samples = usize::from(desc.samples_per_pixel);
        let data = if desc.planar_configuration == 1 && samples > 1 {
            interleave(frame, samples)
        } else {
            frame.to_vec()
        };

        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, quality);
        encoder.set_progressive(false);
        encoder
            .encode(&data, desc.columns, desc.rows, color_type)
            .map_err(|e| Error::codec_failed(NAME, e))?;
        Ok(out)
    }

    fn decode_frame(&self, desc: &ImageDescription, data: &[u8]) -> Result<Vec<u8>> {
        color_type(desc)?;
        let mut decoder = Decoder::new(Cursor::new(data));
        let decoded = decoder
            .decode()
            .map_err(|e| Error::codec_failed(NAME, e))?;
        ensure!(
            decoded.len() == desc.frame_size(),
            UnsupportedImageSnafu {
                codec: NAME,
                reason: format!(
                    "decoded {} bytes, expected {}",
                    decoded.len(),
                    desc.frame_size()
                ),
            }
        );
        let samples = usize::from(desc.samples_per_pixel);
        if desc.planar_configuration == 1 && samples > 1 {
            Ok(deinterleave(&decoded, samples))
        } else {
            Ok(decoded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn desc(samples_per_pixel: u16, bits_allocated: u16) -> ImageDescription {
        ImageDescription {
            rows: 16,
            columns: 16,
            samples_per_pixel,
            bits_allocated,
            bits_stored: bits_allocated,
            high_bit: bits_allocated - 1,
            pixel_representation: 0,
            planar_configuration: 0,
            photometric_interpretation: "MONOCHROME2".to_string(),
            number_of_frames: 1,
        }
    }

    fn quality(q: u8) -> EncodeOptions {
        EncodeOptions {
            quality: Some(q),
            ratio: None,
        }
    }

    #[test]
    fn encode_and_decode_gray() {
        let desc = desc(1, 8);
        let frame: Vec<u8> = (0..256).map(|i| (i / 16 * 16) as u8).collect();
        let encoded = JpegBaseline.encode_frame(&desc, &frame, &quality(95)).unwrap();
        // SOI marker
        assert_eq!(&encoded[..2], &[0xFF, 0xD8]);

        let decoded = JpegBaseline.decode_frame(&desc, &encoded).unwrap();
        assert_eq!(decoded.len(), frame.len());
        let max_error = decoded
            .iter()
            .zip(&frame)
            .map(|(&a, &b)| (a as i16 - b as i16).abs())
            .max()
            .unwrap();
        assert!(max_error < 16, "error too large: {}", max_error);
    }

    #[test]
    fn quality_is_required() {
        let desc = desc(1, 8);
        let frame = vec![0; desc.frame_size()];
        let e = JpegBaseline
            .encode_frame(&desc, &frame, &EncodeOptions::default())
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn only_8_bit_samples() {
        let desc = desc(1, 16);
        let frame = vec![0; desc.frame_size()];
        let e = JpegBaseline.encode_frame(&desc, &frame, &quality(90)).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Codec);
    }

    #[test]
    fn planar_samples_are_restored() {
        let planar: Vec<u8> = vec![1, 2, 3, 10, 20, 30];
        let interleaved = interleave(&planar, 2);
        assert_eq!(interleaved, vec![1, 10, 2, 20, 3, 30]);
        assert_eq!(deinterleave(&interleaved, 2), planar);
    }

    #[test]
    fn garbage_does_not_decode() {
        let e = JpegBaseline
            .decode_frame(&desc(1, 8), &[0, 1, 2, 3])
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Codec);
    }
}
