//! Converting PALETTE COLOR images to RGB.
use dicom_core::{Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use snafu::{ensure, OptionExt, ResultExt};

use crate::attribute::{binary_value, put_str, put_u16};
use crate::description::ImageDescription;
use crate::pixel::native_frames;
use crate::{ConvertAttributeSnafu, InvalidPaletteSnafu, MissingAttributeSnafu, Result};

const PALETTE_COLOR_LOOKUP_TABLE_UID: Tag = Tag(0x0028, 0x1199);
const SEGMENTED_PALETTE_DATA: [Tag; 3] = [
    Tag(0x0028, 0x1221),
    Tag(0x0028, 0x1222),
    Tag(0x0028, 0x1223),
];

/// One of the three color lookup tables, narrowed to 8 bits.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorLut {
    first_mapped: i32,
    entries: Vec<u8>,
}

impl ColorLut {
    /// Read a lookup table from its descriptor and data elements.
    fn read(
        obj: &InMemDicomObject,
        descriptor_tag: Tag,
        data_tag: Tag,
        name: &'static str,
    ) -> Result<Self> {
        let descriptor = obj
            .element(descriptor_tag)
            .ok()
            .context(MissingAttributeSnafu { name })?
            .to_multi_int::<i32>()
            .context(ConvertAttributeSnafu { name })?;
        ensure!(
            descriptor.len() == 3,
            InvalidPaletteSnafu {
                reason: format!("{} has {} values", name, descriptor.len()),
            }
        );
        // the descriptor may be read as signed
        let count = match descriptor[0] & 0xFFFF {
            0 => 65536,
            n => n as usize,
        };
        let first_mapped = descriptor[1];
        let bits = descriptor[2];

        let data = obj
            .element(data_tag)
            .ok()
            .and_then(binary_value)
            .context(InvalidPaletteSnafu {
                reason: format!("missing data for {}", name),
            })?;
        let entries: Vec<u8> = match bits {
            16 => data.chunks_exact(2).map(|c| c[1]).take(count).collect(),
            // one entry per byte, or one per 16-bit word
            8 if data.len() >= count * 2 => data.chunks_exact(2).map(|c| c[0]).take(count).collect(),
            8 => data.iter().copied().take(count).collect(),
            _ => {
                return Err(InvalidPaletteSnafu {
                    reason: format!("{} bits per entry in {}", bits, name),
                }
                .build()
                .into())
            }
        };
        ensure!(
            entries.len() == count,
            InvalidPaletteSnafu {
                reason: format!("{} has {} of {} entries", name, entries.len(), count),
            }
        );
        Ok(ColorLut {
            first_mapped,
            entries,
        })
    }

    fn get(&self, index: i32) -> u8 {
        let i = (index - self.first_mapped).clamp(0, self.entries.len() as i32 - 1);
        self.entries[i as usize]
    }
}

/// The red, green and blue lookup tables of a PALETTE COLOR image.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    red: ColorLut,
    green: ColorLut,
    blue: ColorLut,
}

impl Palette {
    pub fn from_object(obj: &InMemDicomObject) -> Result<Self> {
        Ok(Palette {
            red: ColorLut::read(
                obj,
                tags::RED_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR,
                tags::RED_PALETTE_COLOR_LOOKUP_TABLE_DATA,
                "RedPaletteColorLookupTableDescriptor",
            )?,
            green: ColorLut::read(
                obj,
                tags::GREEN_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR,
                tags::GREEN_PALETTE_COLOR_LOOKUP_TABLE_DATA,
                "GreenPaletteColorLookupTableDescriptor",
            )?,
            blue: ColorLut::read(
                obj,
                tags::BLUE_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR,
                tags::BLUE_PALETTE_COLOR_LOOKUP_TABLE_DATA,
                "BluePaletteColorLookupTableDescriptor",
            )?,
        })
    }

    pub fn rgb(&self, index: i32) -> [u8; 3] {
        [self.red.get(index), self.green.get(index), self.blue.get(index)]
    }
}

/// Convert a PALETTE COLOR image to 8-bit interleaved RGB.
///
/// The image attributes of the object are updated
/// and the palette attributes removed.
/// The Pixel Data element is left to the caller.
/// Returns the new native pixel data and its description.
pub fn convert_from_palette(
    obj: &mut InMemDicomObject,
    desc: &ImageDescription,
    native: &[u8],
) -> Result<(Vec<u8>, ImageDescription)> {
    ensure!(
        desc.samples_per_pixel == 1 && desc.bits_allocated <= 16,
        InvalidPaletteSnafu {
            reason: format!(
                "{} samples of {} bits",
                desc.samples_per_pixel, desc.bits_allocated
            ),
        }
    );
    let palette = Palette::from_object(obj)?;

    let signed = desc.pixel_representation == 1;
    let mut rgb = Vec::with_capacity(desc.pixels_per_frame() * 3 * desc.number_of_frames as usize);
    for frame in native_frames(desc, native)? {
        for sample in frame.chunks_exact(desc.bytes_per_sample()) {
            let index = match (sample, signed) {
                ([b], false) => i32::from(*b),
                ([b], true) => i32::from(*b as i8),
                ([lo, hi], false) => i32::from(u16::from_le_bytes([*lo, *hi])),
                ([lo, hi], true) => i32::from(i16::from_le_bytes([*lo, *hi])),
                _ => 0,
            };
            rgb.extend_from_slice(&palette.rgb(index));
        }
    }

    put_str(obj, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "RGB");
    put_u16(obj, tags::SAMPLES_PER_PIXEL, 3);
    put_u16(obj, tags::BITS_ALLOCATED, 8);
    put_u16(obj, tags::BITS_STORED, 8);
    put_u16(obj, tags::HIGH_BIT, 7);
    put_u16(obj, tags::PIXEL_REPRESENTATION, 0);
    put_u16(obj, tags::PLANAR_CONFIGURATION, 0);
    for tag in [
        tags::RED_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR,
        tags::GREEN_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR,
        tags::BLUE_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR,
        tags::RED_PALETTE_COLOR_LOOKUP_TABLE_DATA,
        tags::GREEN_PALETTE_COLOR_LOOKUP_TABLE_DATA,
        tags::BLUE_PALETTE_COLOR_LOOKUP_TABLE_DATA,
        PALETTE_COLOR_LOOKUP_TABLE_UID,
    ]
    .into_iter()
    .chain(SEGMENTED_PALETTE_DATA)
    {
        obj.remove_element(tag);
    }

    let desc = ImageDescription {
        samples_per_pixel: 3,
        bits_allocated: 8,
        bits_stored: 8,
        high_bit: 7,
        pixel_representation: 0,
        planar_configuration: 0,
        photometric_interpretation: "RGB".to_string(),
        ..desc.clone()
    };
    Ok((rgb, desc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::ow_element;
    use crate::ErrorKind;
    use dicom_core::{dicom_value, DataElement};

    fn palette_image(bits_per_entry: u16) -> (InMemDicomObject, ImageDescription) {
        let entries: Vec<u16> = match bits_per_entry {
            16 => vec![0x0000, 0x8000, 0xFF00],
            _ => vec![0x00, 0x80, 0xFF],
        };
        let data: Vec<u8> = entries.iter().flat_map(|e| e.to_le_bytes()).collect();
        let mut obj = InMemDicomObject::new_empty();
        for (descriptor, lut) in [
            (
                tags::RED_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR,
                tags::RED_PALETTE_COLOR_LOOKUP_TABLE_DATA,
            ),
            (
                tags::GREEN_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR,
                tags::GREEN_PALETTE_COLOR_LOOKUP_TABLE_DATA,
            ),
            (
                tags::BLUE_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR,
                tags::BLUE_PALETTE_COLOR_LOOKUP_TABLE_DATA,
            ),
        ] {
            obj.put(DataElement::new(
                descriptor,
                VR::US,
                dicom_value!(U16, [3, 10, bits_per_entry]),
            ));
            obj.put(ow_element(lut, &data));
        }
        put_str(&mut obj, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "PALETTE COLOR");
        let desc = ImageDescription {
            rows: 1,
            columns: 4,
            samples_per_pixel: 1,
            bits_allocated: 8,
            bits_stored: 8,
            high_bit: 7,
            pixel_representation: 0,
            planar_configuration: 0,
            photometric_interpretation: "PALETTE COLOR".to_string(),
            number_of_frames: 1,
        };
        (obj, desc)
    }

    #[test]
    fn sixteen_bit_entries_are_narrowed() {
        let (mut obj, desc) = palette_image(16);
        // below, at, after and past the mapped range
        let (rgb, new_desc) = convert_from_palette(&mut obj, &desc, &[0, 10, 11, 200]).unwrap();
        assert_eq!(
            rgb,
            vec![0, 0, 0, 0, 0, 0, 0x80, 0x80, 0x80, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(new_desc.samples_per_pixel, 3);
        assert_eq!(new_desc.photometric_interpretation, "RGB");

        let mut described = obj.clone();
        put_u16(&mut described, tags::ROWS, 1);
        put_u16(&mut described, tags::COLUMNS, 4);
        assert_eq!(ImageDescription::from_object(&described).unwrap(), new_desc);
        assert!(obj
            .element(tags::RED_PALETTE_COLOR_LOOKUP_TABLE_DATA)
            .is_err());
        assert!(obj
            .element(tags::BLUE_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR)
            .is_err());
    }

    #[test]
    fn eight_bit_entries_in_words() {
        let (mut obj, desc) = palette_image(8);
        let (rgb, _) = convert_from_palette(&mut obj, &desc, &[12, 12, 12, 12]).unwrap();
        assert_eq!(&rgb[..3], &[0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn missing_lookup_table() {
        let (mut obj, desc) = palette_image(16);
        obj.remove_element(tags::GREEN_PALETTE_COLOR_LOOKUP_TABLE_DATA);
        let e = convert_from_palette(&mut obj, &desc, &[0; 4]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidImage);
    }
}
