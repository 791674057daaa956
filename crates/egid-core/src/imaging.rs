//! Image helpers: cropping to detection boxes and grayscale conversion.

use crate::types::BoundingBox;
use image::{DynamicImage, GrayImage};

/// Crop `image` to `bbox`, clamped to the image bounds.
///
/// A box that lies outside the image yields an empty (0-sized) image.
pub fn crop(image: &DynamicImage, bbox: &BoundingBox) -> DynamicImage {
    let x1 = bbox.x1.min(image.width());
    let y1 = bbox.y1.min(image.height());
    let x2 = bbox.x2.min(image.width()).max(x1);
    let y2 = bbox.y2.min(image.height()).max(y1);
    image.crop_imm(x1, y1, x2 - x1, y2 - y1)
}

/// Convert to 8-bit luma.
pub fn to_grayscale(image: &DynamicImage) -> GrayImage {
    image.to_luma8()
}

pub fn is_empty(image: &DynamicImage) -> bool {
    image.width() == 0 || image.height() == 0
}
