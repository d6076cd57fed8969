//! Image loading for the sharder.

use std::path::Path;

use image::imageops::{self, FilterType};

use crate::error::SeerError;
use crate::record::{Record, RGB_DEPTH};

/// Loads one image as a square RGB record with pixels scaled to `[0, 1]`.
///
/// Any source color type is converted to 8-bit RGB first, so greyscale and
/// alpha images produce three channels. Resizing is bilinear.
///
/// [`Record::new`] enforces the channel depth and the pixel count.
pub fn load_record(path: &Path, label: i64, image_size: u32) -> Result<Record, SeerError> {
    let decoded = image::open(path).map_err(|source| SeerError::ImageDecode {
        path: path.to_path_buf(),
        source,
    })?;

    let rgb = decoded.to_rgb8();
    let resized = imageops::resize(&rgb, image_size, image_size, FilterType::Triangle);
    let pixels: Vec<f32> = resized
        .as_raw()
        .iter()
        .map(|&v| f32::from(v) / 255.0)
        .collect();

    let side = image_size as usize;
    Record::new(side, side, RGB_DEPTH, label, pixels)
}
