//! RLE Lossless codec.
//!
//! Each sample of the image is split into byte planes,
//! most significant byte first,
//! and every plane is compressed into its own PackBits segment.
//! A fragment starts with a 64 byte header:
//! the number of segments followed by 15 segment offsets,
//! all 32-bit little endian.
use byteordered::byteorder::{ByteOrder, LittleEndian};
use snafu::ensure;

use crate::codec::{Codec, EncodeOptions};
use crate::description::ImageDescription;
use crate::{InvalidRleSnafu, Result, UnsupportedImageSnafu};

const HEADER_LENGTH: usize = 64;
const MAX_SEGMENTS: usize = 15;

/// The RLE Lossless codec.
#[derive(Debug, Copy, Clone, Default)]
pub struct RleLossless;

impl Codec for RleLossless {
    fn name(&self) -> &'static str {
        "RLE Lossless"
    }

    fn is_lossy(&self) -> bool {
        false
    }

    fn supports_palette(&self) -> bool {
        true
    }

    fn encode_frame(
        &self,
        desc: &ImageDescription,
        frame: &[u8],
        _options: &EncodeOptions,
    ) -> Result<Vec<u8>> {
        let layout = SegmentLayout::new(desc)?;
        ensure!(
            frame.len() >= desc.frame_size(),
            UnsupportedImageSnafu {
                codec: self.name(),
                reason: format!(
                    "frame has {} bytes, expected {}",
                    frame.len(),
                    desc.frame_size()
                ),
            }
        );

        let mut out = vec![0; HEADER_LENGTH];
        LittleEndian::write_u32(&mut out[0..4], layout.segments() as u32);
        let mut plane = Vec::with_capacity(layout.pixels);
        for segment in 0..layout.segments() {
            let offset = out.len() as u32;
            LittleEndian::write_u32(&mut out[4 + segment * 4..8 + segment * 4], offset);

            plane.clear();
            plane.extend((0..layout.pixels).map(|p| frame[layout.byte_index(segment, p)]));
            pack_bits(&plane, &mut out);
            if out.len() % 2 == 1 {
                // no-op run
                out.push(0x80);
            }
        }
        Ok(out)
    }

    fn decode_frame(&self, desc: &ImageDescription, data: &[u8]) -> Result<Vec<u8>> {
        let layout = SegmentLayout::new(desc)?;
        let offsets = read_header(data)?;
        ensure!(
            offsets.len() == layout.segments(),
            InvalidRleSnafu {
                reason: format!(
                    "{} segments, expected {}",
                    offsets.len(),
                    layout.segments()
                ),
            }
        );

        let mut frame = vec![0; desc.frame_size()];
        let mut plane = Vec::with_capacity(layout.pixels);
        for (segment, &start) in offsets.iter().enumerate() {
            let end = offsets.get(segment + 1).copied().unwrap_or(data.len());
            plane.clear();
            unpack_bits(&data[start..end], layout.pixels, &mut plane)?;
            ensure!(
                plane.len() == layout.pixels,
                InvalidRleSnafu {
                    reason: format!(
                        "segment #{} decodes to {} bytes, expected {}",
                        segment,
                        plane.len(),
                        layout.pixels
                    ),
                }
            );
            for (p, &byte) in plane.iter().enumerate() {
                frame[layout.byte_index(segment, p)] = byte;
            }
        }
        Ok(frame)
    }
}

/// Where each segment's bytes live in a native frame.
struct SegmentLayout {
    pixels: usize,
    samples_per_pixel: usize,
    bytes_per_sample: usize,
    planar: bool,
}

impl SegmentLayout {
    fn new(desc: &ImageDescription) -> Result<Self> {
        let layout = SegmentLayout {
            pixels: desc.pixels_per_frame(),
            samples_per_pixel: usize::from(desc.samples_per_pixel),
            bytes_per_sample: desc.bytes_per_sample(),
            planar: desc.planar_configuration == 1,
        };
        ensure!(
            layout.segments() <= MAX_SEGMENTS,
            UnsupportedImageSnafu {
                codec: "RLE Lossless",
                reason: format!("{} segments needed", layout.segments()),
            }
        );
        Ok(layout)
    }

    fn segments(&self) -> usize {
        self.samples_per_pixel * self.bytes_per_sample
    }

    /// Index in the native frame of the byte of `pixel`
    /// which goes into `segment`.
    fn byte_index(&self, segment: usize, pixel: usize) -> usize {
        let sample = segment / self.bytes_per_sample;
        // most significant byte first, samples are little endian
        let byte = self.bytes_per_sample - 1 - segment % self.bytes_per_sample;
        let position = if self.planar {
            sample * self.pixels + pixel
        } else {
            pixel * self.samples_per_pixel + sample
        };
        position * self.bytes_per_sample + byte
    }
}

/// Read the segment offsets from the fragment header.
fn read_header(data: &[u8]) -> Result<Vec<usize>> {
    ensure!(
        data.len() >= HEADER_LENGTH,
        InvalidRleSnafu {
            reason: format!("{} bytes is too short for a header", data.len()),
        }
    );
    let count = LittleEndian::read_u32(&data[0..4]) as usize;
    ensure!(
        (1..=MAX_SEGMENTS).contains(&count),
        InvalidRleSnafu {
            reason: format!("invalid number of segments {}", count),
        }
    );

    let offsets: Vec<usize> = (0..count)
        .map(|i| LittleEndian::read_u32(&data[4 + i * 4..8 + i * 4]) as usize)
        .collect();
    ensure!(
        offsets[0] == HEADER_LENGTH,
        InvalidRleSnafu {
            reason: format!("first segment starts at {}", offsets[0]),
        }
    );
    ensure!(
        offsets.windows(2).all(|w| w[0] <= w[1]) && offsets[count - 1] <= data.len(),
        InvalidRleSnafu {
            reason: "segment offsets out of order or out of bounds",
        }
    );
    Ok(offsets)
}

/// Append the PackBits encoding of `input` to `out`.
fn pack_bits(input: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < input.len() {
        let mut run = 1;
        while i + run < input.len() && run < 128 && input[i + run] == input[i] {
            run += 1;
        }
        if run > 1 {
            // replicate run, header is 1 - run
            out.push((257 - run) as u8);
            out.push(input[i]);
            i += run;
            continue;
        }

        let start = i;
        while i < input.len() && i - start < 128 {
            if i + 1 < input.len() && input[i] == input[i + 1] {
                break;
            }
            i += 1;
        }
        out.push((i - start - 1) as u8);
        out.extend_from_slice(&input[start..i]);
    }
}

/// Decode a PackBits segment into `out`,
/// stopping once `expected` bytes are produced.
fn unpack_bits(segment: &[u8], expected: usize, out: &mut Vec<u8>) -> Result<()> {
    let mut i = 0;
    while i < segment.len() && out.len() < expected {
        let header = segment[i] as i8;
        i += 1;
        match header {
            -128 => {}
            h if h < 0 => {
                let byte = *segment.get(i).ok_or_else(|| {
                    InvalidRleSnafu {
                        reason: "replicate run past the end of the segment",
                    }
                    .build()
                })?;
                i += 1;
                let count = (1 - h as isize) as usize;
                out.extend(std::iter::repeat(byte).take(count));
            }
            h => {
                let count = h as usize + 1;
                ensure!(
                    i + count <= segment.len(),
                    InvalidRleSnafu {
                        reason: "literal run past the end of the segment",
                    }
                );
                out.extend_from_slice(&segment[i..i + count]);
                i += count;
            }
        }
    }
    out.truncate(expected);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use rstest::rstest;

    fn desc(samples_per_pixel: u16, bits_allocated: u16, planar: u16) -> ImageDescription {
        ImageDescription {
            rows: 3,
            columns: 5,
            samples_per_pixel,
            bits_allocated,
            bits_stored: bits_allocated,
            high_bit: bits_allocated - 1,
            pixel_representation: 0,
            planar_configuration: planar,
            photometric_interpretation: if samples_per_pixel == 3 {
                "RGB".to_string()
            } else {
                "MONOCHROME2".to_string()
            },
            number_of_frames: 1,
        }
    }

    #[rstest]
    #[case(&[], &[])]
    #[case(&[7], &[0, 7])]
    #[case(&[1, 1, 1, 1], &[0xFD, 1])]
    #[case(&[1, 2, 3], &[2, 1, 2, 3])]
    #[case(&[1, 2, 2, 2, 3], &[0, 1, 0xFE, 2, 0, 3])]
    fn packbits_encoding(#[case] input: &[u8], #[case] expected: &[u8]) {
        let mut out = Vec::new();
        pack_bits(input, &mut out);
        assert_eq!(out, expected);

        let mut decoded = Vec::new();
        unpack_bits(&out, input.len(), &mut decoded).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn long_runs_are_split() {
        let input = vec![9_u8; 300];
        let mut out = Vec::new();
        pack_bits(&input, &mut out);
        // 128 + 128 + 44
        assert_eq!(out, vec![0x81, 9, 0x81, 9, 0xD5, 9]);

        let literal: Vec<u8> = (0..=255).collect();
        let mut out = Vec::new();
        pack_bits(&literal, &mut out);
        assert_eq!(out.len(), 2 + 256);
        assert_eq!(out[0], 127);
        assert_eq!(out[129], 127);
    }

    #[test]
    fn header_of_16_bit_frame() {
        let desc = desc(1, 16, 0);
        let frame: Vec<u8> = (0..15_u16).flat_map(|v| (v * 300).to_le_bytes()).collect();
        let encoded = RleLossless
            .encode_frame(&desc, &frame, &EncodeOptions::default())
            .unwrap();

        assert_eq!(LittleEndian::read_u32(&encoded[0..4]), 2);
        assert_eq!(LittleEndian::read_u32(&encoded[4..8]), 64);
        let second = LittleEndian::read_u32(&encoded[8..12]) as usize;
        assert_eq!(second % 2, 0);
        assert!(encoded[12..64].iter().all(|&b| b == 0));
        assert_eq!(encoded.len() % 2, 0);

        // the first segment holds the high bytes
        let mut high = Vec::new();
        unpack_bits(&encoded[64..second], 15, &mut high).unwrap();
        let expected: Vec<u8> = (0..15_u16).map(|v| (v * 300 >> 8) as u8).collect();
        assert_eq!(high, expected);
    }

    #[rstest]
    #[case(1, 8, 0)]
    #[case(1, 16, 0)]
    #[case(1, 32, 0)]
    #[case(3, 8, 0)]
    #[case(3, 8, 1)]
    #[case(3, 16, 1)]
    fn frame_round_trip(#[case] spp: u16, #[case] bits: u16, #[case] planar: u16) {
        let desc = desc(spp, bits, planar);
        let frame: Vec<u8> = (0..desc.frame_size())
            .map(|i| if i % 7 < 3 { 0x55 } else { (i * 31) as u8 })
            .collect();
        let encoded = RleLossless
            .encode_frame(&desc, &frame, &EncodeOptions::default())
            .unwrap();
        let decoded = RleLossless.decode_frame(&desc, &encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn too_many_segments() {
        // 4 samples of 4 bytes
        let desc = desc(4, 32, 0);
        let frame = vec![0; desc.frame_size()];
        let e = RleLossless
            .encode_frame(&desc, &frame, &EncodeOptions::default())
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Codec);
    }

    #[rstest]
    #[case::short(vec![1, 0, 0, 0])]
    #[case::no_segments(header(&[]))]
    #[case::wrong_count(header(&[64, 70]))]
    #[case::bad_first_offset(header(&[60]))]
    #[case::offset_out_of_bounds(header(&[200]))]
    fn malformed_headers_are_rejected(#[case] data: Vec<u8>) {
        let e = RleLossless.decode_frame(&desc(1, 8, 0), &data).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Codec);
    }

    #[test]
    fn truncated_segment_is_rejected() {
        let mut data = header(&[64]);
        // a literal run of 4 bytes with only 2 present
        data.extend_from_slice(&[3, 1, 2]);
        let e = RleLossless.decode_frame(&desc(1, 8, 0), &data).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Codec);
    }

    fn header(offsets: &[u32]) -> Vec<u8> {
        let mut data = vec![0; 64];
        LittleEndian::write_u32(&mut data[0..4], offsets.len() as u32);
        for (i, &offset) in offsets.iter().enumerate() {
            LittleEndian::write_u32(&mut data[4 + i * 4..8 + i * 4], offset);
        }
        data
    }
}
