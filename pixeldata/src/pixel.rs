//! Native and encapsulated pixel data.
use dicom_core::value::{PixelFragmentSequence, PrimitiveValue, Value};
use dicom_core::{DataElement, VR};
use dicom_dictionary_std::tags;
use dicom_object::{mem::InMemElement, InMemDicomObject};
use snafu::{ensure, OptionExt};

use crate::attribute::{binary_value, ow_element};
use crate::description::ImageDescription;
use crate::{
    EmptyFrameSnafu, FragmentCountSnafu, InvalidAttributeSnafu, InvalidOffsetTableSnafu,
    MissingAttributeSnafu, PixelDataTooShortSnafu, Result,
};

/// The pixel data of a DICOM object.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    /// Uncompressed samples, little endian.
    Native(Vec<u8>),
    /// Compressed fragments, with the basic offset table.
    Encapsulated {
        offset_table: Vec<u32>,
        fragments: Vec<Vec<u8>>,
    },
}

impl PixelData {
    /// Take the pixel data out of the Pixel Data element.
    pub fn from_object(obj: &InMemDicomObject) -> Result<Self> {
        let elem = obj.element(tags::PIXEL_DATA).ok().context(MissingAttributeSnafu {
            name: "PixelData",
        })?;
        if let Value::PixelSequence(seq) = elem.value() {
            return Ok(PixelData::Encapsulated {
                offset_table: seq.offset_table().to_vec(),
                fragments: seq.fragments().to_vec(),
            });
        }
        let bytes = binary_value(elem).context(InvalidAttributeSnafu {
            name: "PixelData",
            value: format!("{:?}", elem.vr()),
        })?;
        Ok(PixelData::Native(bytes))
    }

    /// Encapsulate one compressed fragment per frame.
    ///
    /// The basic offset table is filled in for multi-frame images.
    pub fn encapsulate(fragments: Vec<Vec<u8>>) -> Self {
        let offset_table = if fragments.len() > 1 {
            fragments
                .iter()
                .scan(0_u32, |offset, fragment| {
                    let this = *offset;
                    // each item carries an 8 byte header
                    *offset += 8 + fragment.len() as u32;
                    Some(this)
                })
                .collect()
        } else {
            Vec::new()
        };
        PixelData::Encapsulated {
            offset_table,
            fragments,
        }
    }

    pub fn is_encapsulated(&self) -> bool {
        matches!(self, PixelData::Encapsulated { .. })
    }

    /// Build the Pixel Data element.
    ///
    /// Native samples wider than 8 bits are stored as OW,
    /// everything else as OB.
    pub fn into_element(self, bits_allocated: u16) -> InMemElement {
        match self {
            PixelData::Native(bytes) if bits_allocated > 8 => ow_element(tags::PIXEL_DATA, &bytes),
            PixelData::Native(mut bytes) => {
                if bytes.len() % 2 == 1 {
                    bytes.push(0);
                }
                DataElement::new(tags::PIXEL_DATA, VR::OB, PrimitiveValue::U8(bytes.into()))
            }
            PixelData::Encapsulated {
                offset_table,
                fragments,
            } => DataElement::new(
                tags::PIXEL_DATA,
                VR::OB,
                PixelFragmentSequence::new(offset_table, fragments),
            ),
        }
    }
}

/// Split native pixel data into frames.
///
/// Trailing padding past the last frame is ignored.
pub fn native_frames<'a>(desc: &ImageDescription, bytes: &'a [u8]) -> Result<Vec<&'a [u8]>> {
    let frame_size = desc.frame_size();
    ensure!(
        frame_size > 0,
        EmptyFrameSnafu {
            rows: desc.rows,
            columns: desc.columns,
        }
    );
    let expected = frame_size * desc.number_of_frames as usize;
    ensure!(
        bytes.len() >= expected,
        PixelDataTooShortSnafu {
            expected,
            got: bytes.len(),
        }
    );
    Ok(bytes[..expected].chunks_exact(frame_size).collect())
}

/// Group the fragments of encapsulated pixel data into frames.
///
/// A single frame spans all fragments.
/// With a basic offset table, each frame collects the fragments
/// from its offset up to the next one.
/// Without it, there must be one fragment per frame.
pub fn encapsulated_frames(
    desc: &ImageDescription,
    offset_table: &[u32],
    fragments: &[Vec<u8>],
) -> Result<Vec<Vec<u8>>> {
    if desc.number_of_frames == 1 {
        return Ok(vec![fragments.concat()]);
    }
    if !offset_table.is_empty() {
        return Ok(frames_by_offset(offset_table, fragments)
            .filter(|frames| frames.len() == desc.number_of_frames as usize)
            .context(InvalidOffsetTableSnafu {
                offset_table: offset_table.to_vec(),
                frames: desc.number_of_frames,
            })?);
    }
    ensure!(
        fragments.len() == desc.number_of_frames as usize,
        FragmentCountSnafu {
            expected: desc.number_of_frames as usize,
            got: fragments.len(),
        }
    );
    Ok(fragments.to_vec())
}

/// Offsets count from the first byte of the first fragment item,
/// item headers included.
/// Fails if an offset does not land on the start of a fragment.
fn frames_by_offset(offset_table: &[u32], fragments: &[Vec<u8>]) -> Option<Vec<Vec<u8>>> {
    let mut frames: Vec<Vec<u8>> = Vec::with_capacity(offset_table.len());
    let mut offsets = offset_table.iter().peekable();
    let mut position = 0_u64;
    for fragment in fragments {
        if offsets.next_if(|&&offset| u64::from(offset) == position).is_some() {
            frames.push(Vec::new());
        }
        frames.last_mut()?.extend_from_slice(fragment);
        // each item carries an 8 byte header
        position += 8 + fragment.len() as u64;
    }
    offsets.peek().is_none().then_some(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn desc(frames: u32) -> ImageDescription {
        ImageDescription {
            rows: 2,
            columns: 2,
            samples_per_pixel: 1,
            bits_allocated: 16,
            bits_stored: 12,
            high_bit: 11,
            pixel_representation: 0,
            planar_configuration: 0,
            photometric_interpretation: "MONOCHROME2".to_string(),
            number_of_frames: frames,
        }
    }

    #[test]
    fn offset_table_for_multiple_frames() {
        let pixels = PixelData::encapsulate(vec![vec![0; 10], vec![0; 4], vec![0; 6]]);
        assert_eq!(
            pixels,
            PixelData::Encapsulated {
                offset_table: vec![0, 18, 30],
                fragments: vec![vec![0; 10], vec![0; 4], vec![0; 6]],
            }
        );
        match PixelData::encapsulate(vec![vec![1, 2]]) {
            PixelData::Encapsulated { offset_table, .. } => assert!(offset_table.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn element_round_trip() {
        let mut obj = InMemDicomObject::new_empty();
        let native = PixelData::Native((0..16).collect());
        obj.put(native.clone().into_element(16));
        assert_eq!(PixelData::from_object(&obj).unwrap(), native);

        let encapsulated = PixelData::encapsulate(vec![vec![1, 2, 3, 4]]);
        obj.put(encapsulated.clone().into_element(16));
        assert_eq!(PixelData::from_object(&obj).unwrap(), encapsulated);
    }

    #[test]
    fn split_native_frames() {
        let bytes: Vec<u8> = (0..26).collect();
        let frames = native_frames(&desc(3), &bytes).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2], &bytes[16..24]);

        let e = native_frames(&desc(4), &bytes).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidImage);
    }

    #[test]
    fn empty_frames_are_rejected() {
        let mut desc = desc(1);
        desc.columns = 0;
        let e = native_frames(&desc, &[0; 8]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidImage);
        assert_eq!(e.to_string(), "Image frames of 2x0 pixels hold no samples");
    }

    #[test]
    fn fragments_must_match_frames() {
        let fragments = vec![vec![1], vec![2]];
        assert_eq!(encapsulated_frames(&desc(1), &[], &fragments).unwrap(), vec![vec![1, 2]]);
        assert_eq!(encapsulated_frames(&desc(2), &[], &fragments).unwrap(), fragments);
        let e = encapsulated_frames(&desc(3), &[], &fragments).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidImage);
    }

    #[test]
    fn frames_span_fragments_by_offset() {
        let fragments = vec![vec![1, 1], vec![2, 2, 2, 2], vec![3, 3], vec![4, 4]];
        // frame 1 starts at the third item: (8 + 2) + (8 + 4)
        let frames = encapsulated_frames(&desc(2), &[0, 22], &fragments).unwrap();
        assert_eq!(frames, vec![vec![1, 1, 2, 2, 2, 2], vec![3, 3, 4, 4]]);

        let frames = encapsulated_frames(&desc(2), &[0, 10], &fragments).unwrap();
        assert_eq!(frames, vec![vec![1, 1], vec![2, 2, 2, 2, 3, 3, 4, 4]]);
    }

    #[test]
    fn offsets_must_locate_every_frame() {
        let fragments = vec![vec![1, 1], vec![2, 2], vec![3, 3]];
        // inside an item
        let e = encapsulated_frames(&desc(2), &[0, 12], &fragments).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidImage);
        // first frame not at the first item
        assert!(encapsulated_frames(&desc(2), &[10, 20], &fragments).is_err());
        // fewer offsets than frames
        assert!(encapsulated_frames(&desc(3), &[0, 10], &fragments).is_err());
    }
}
