//! The image pixel module attributes needed to transcode pixel data.
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use snafu::ensure;

use crate::attribute::{optional_u16, optional_u32, required_string, required_u16};
use crate::{InvalidAttributeSnafu, Result};

/// A description of the pixel data held by a DICOM object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescription {
    pub rows: u16,
    pub columns: u16,
    pub samples_per_pixel: u16,
    pub bits_allocated: u16,
    pub bits_stored: u16,
    pub high_bit: u16,
    /// 0 for unsigned samples, 1 for two's complement
    pub pixel_representation: u16,
    /// 0 for interleaved samples, 1 for one plane per sample
    pub planar_configuration: u16,
    pub photometric_interpretation: String,
    pub number_of_frames: u32,
}

impl ImageDescription {
    /// Read the image description from a DICOM object.
    ///
    /// Rows, Columns, Bits Allocated
    /// and Photometric Interpretation are mandatory.
    /// Only whole-byte sample sizes are supported.
    pub fn from_object(obj: &InMemDicomObject) -> Result<Self> {
        let rows = required_u16(obj, tags::ROWS, "Rows")?;
        let columns = required_u16(obj, tags::COLUMNS, "Columns")?;
        let bits_allocated = required_u16(obj, tags::BITS_ALLOCATED, "BitsAllocated")?;
        let photometric_interpretation = required_string(
            obj,
            tags::PHOTOMETRIC_INTERPRETATION,
            "PhotometricInterpretation",
        )?;
        let samples_per_pixel =
            optional_u16(obj, tags::SAMPLES_PER_PIXEL, "SamplesPerPixel")?.unwrap_or(1);
        let bits_stored =
            optional_u16(obj, tags::BITS_STORED, "BitsStored")?.unwrap_or(bits_allocated);
        let high_bit = optional_u16(obj, tags::HIGH_BIT, "HighBit")?
            .unwrap_or_else(|| bits_stored.saturating_sub(1));
        let pixel_representation =
            optional_u16(obj, tags::PIXEL_REPRESENTATION, "PixelRepresentation")?.unwrap_or(0);
        let planar_configuration =
            optional_u16(obj, tags::PLANAR_CONFIGURATION, "PlanarConfiguration")?.unwrap_or(0);
        let number_of_frames =
            optional_u32(obj, tags::NUMBER_OF_FRAMES, "NumberOfFrames")?.unwrap_or(1);

        ensure!(
            rows > 0,
            InvalidAttributeSnafu {
                name: "Rows",
                value: rows.to_string(),
            }
        );
        ensure!(
            columns > 0,
            InvalidAttributeSnafu {
                name: "Columns",
                value: columns.to_string(),
            }
        );
        ensure!(
            matches!(bits_allocated, 8 | 16 | 32),
            InvalidAttributeSnafu {
                name: "BitsAllocated",
                value: bits_allocated.to_string(),
            }
        );
        ensure!(
            bits_stored > 0 && bits_stored <= bits_allocated,
            InvalidAttributeSnafu {
                name: "BitsStored",
                value: bits_stored.to_string(),
            }
        );
        ensure!(
            samples_per_pixel > 0,
            InvalidAttributeSnafu {
                name: "SamplesPerPixel",
                value: samples_per_pixel.to_string(),
            }
        );
        ensure!(
            number_of_frames > 0,
            InvalidAttributeSnafu {
                name: "NumberOfFrames",
                value: number_of_frames.to_string(),
            }
        );

        Ok(ImageDescription {
            rows,
            columns,
            samples_per_pixel,
            bits_allocated,
            bits_stored,
            high_bit,
            pixel_representation,
            planar_configuration,
            photometric_interpretation,
            number_of_frames,
        })
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_allocated / 8)
    }

    pub fn pixels_per_frame(&self) -> usize {
        usize::from(self.rows) * usize::from(self.columns)
    }

    /// The size of one native frame in bytes.
    pub fn frame_size(&self) -> usize {
        self.pixels_per_frame() * usize::from(self.samples_per_pixel) * self.bytes_per_sample()
    }

    pub fn is_palette(&self) -> bool {
        self.photometric_interpretation == "PALETTE COLOR"
    }
}
