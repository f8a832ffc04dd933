//! Extracting overlays embedded in the unused bits of pixel samples.
//!
//! Encapsulated transfer syntaxes cannot carry overlay bits
//! inside the pixel samples,
//! so embedded overlays are copied to their own Overlay Data element
//! before compressing.
use dicom_core::Tag;
use dicom_object::InMemDicomObject;
use tracing::debug;

use crate::attribute::{ow_element, optional_u16, optional_u32};
use crate::description::ImageDescription;
use crate::Result;

const OVERLAY_ROWS: u16 = 0x0010;
const OVERLAY_COLUMNS: u16 = 0x0011;
const NUMBER_OF_FRAMES_IN_OVERLAY: u16 = 0x0015;
const OVERLAY_BIT_POSITION: u16 = 0x0102;
const OVERLAY_DATA: u16 = 0x3000;

/// An overlay whose bits live in the pixel samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedOverlay {
    pub group: u16,
    pub rows: u16,
    pub columns: u16,
    pub bit_position: u16,
    pub frames: u32,
}

/// Find the embedded overlays of the object.
///
/// An overlay group is embedded when it has no Overlay Data
/// and its Overlay Bit Position lies in the unused bits of the sample:
/// inside Bits Allocated but outside the stored bits.
/// Overlay Bits Allocated is not consulted,
/// as older files declare it as 1 even for embedded planes.
/// Only single sample images are considered.
pub fn embedded_overlays(
    obj: &InMemDicomObject,
    desc: &ImageDescription,
) -> Result<Vec<EmbeddedOverlay>> {
    let mut overlays = Vec::new();
    if desc.samples_per_pixel != 1 {
        return Ok(overlays);
    }
    let low_bit = desc.high_bit.saturating_add(1).saturating_sub(desc.bits_stored);
    for group in (0x6000..=0x601E).step_by(2) {
        if obj.element(Tag(group, OVERLAY_DATA)).is_ok() {
            continue;
        }
        let bit_position =
            match optional_u16(obj, Tag(group, OVERLAY_BIT_POSITION), "OverlayBitPosition")? {
                Some(position)
                    if position < desc.bits_allocated
                        && (position > desc.high_bit || position < low_bit) =>
                {
                    position
                }
                Some(position) => {
                    debug!(
                        "Overlay {:04X} at bit {} is not in the unused bits of the sample",
                        group, position
                    );
                    continue;
                }
                None => continue,
            };
        let rows = optional_u16(obj, Tag(group, OVERLAY_ROWS), "OverlayRows")?
            .unwrap_or(desc.rows);
        let columns = optional_u16(obj, Tag(group, OVERLAY_COLUMNS), "OverlayColumns")?
            .unwrap_or(desc.columns);
        let frames = optional_u32(
            obj,
            Tag(group, NUMBER_OF_FRAMES_IN_OVERLAY),
            "NumberOfFramesInOverlay",
        )?
        .unwrap_or(1)
        .clamp(1, desc.number_of_frames);

        overlays.push(EmbeddedOverlay {
            group,
            rows,
            columns,
            bit_position,
            frames,
        });
    }
    Ok(overlays)
}

/// Copy the bits of the overlay out of native pixel data,
/// packed least significant bit first and padded to an even length.
pub fn extract_bits(overlay: &EmbeddedOverlay, desc: &ImageDescription, native: &[u8]) -> Vec<u8> {
    let bytes_per_sample = desc.bytes_per_sample();
    let frame_size = desc.frame_size();
    let columns = usize::from(desc.columns);
    let bits_per_frame = usize::from(overlay.rows) * usize::from(overlay.columns);
    let total_bits = bits_per_frame * overlay.frames as usize;

    let mut packed = vec![0_u8; (total_bits + 7) / 8];
    for frame in 0..overlay.frames as usize {
        for row in 0..usize::from(overlay.rows).min(usize::from(desc.rows)) {
            for col in 0..usize::from(overlay.columns).min(columns) {
                let offset = frame * frame_size + (row * columns + col) * bytes_per_sample;
                let Some(sample) = native.get(offset..offset + bytes_per_sample) else {
                    continue;
                };
                let value = sample
                    .iter()
                    .rev()
                    .fold(0_u32, |acc, &b| (acc << 8) | u32::from(b));
                if (value >> overlay.bit_position) & 1 == 1 {
                    let bit = frame * bits_per_frame + row * usize::from(overlay.columns) + col;
                    packed[bit / 8] |= 1 << (bit % 8);
                }
            }
        }
    }
    if packed.len() % 2 == 1 {
        packed.push(0);
    }
    packed
}

/// Extract every embedded overlay into its Overlay Data element.
///
/// Pixel samples and the other overlay attributes are left as they are.
/// Returns the overlay groups which were extracted.
pub fn extract_embedded_overlays(
    obj: &mut InMemDicomObject,
    desc: &ImageDescription,
    native: &[u8],
) -> Result<Vec<u16>> {
    let overlays = embedded_overlays(obj, desc)?;
    let mut groups = Vec::with_capacity(overlays.len());
    for overlay in overlays {
        let bits = extract_bits(&overlay, desc, native);
        debug!(
            "Extracting embedded overlay {:04X} from bit {}",
            overlay.group, overlay.bit_position
        );
        obj.put(ow_element(Tag(overlay.group, OVERLAY_DATA), &bits));
        groups.push(overlay.group);
    }
    Ok(groups)
}
