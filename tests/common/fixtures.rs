#![allow(dead_code)] // Each test binary uses its own subset of fixtures

use image::{Rgb, RgbImage};
use objtally::models::RegionMask;
use tempfile::NamedTempFile;

/// Write a solid-color PNG to a temp file. The file is deleted when the
/// returned handle drops, so keep it alive for the test's duration.
pub fn solid_image_file(width: u32, height: u32, color: [u8; 3]) -> NamedTempFile {
    let file = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .unwrap();
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    img.save(file.path()).unwrap();
    file
}

/// Rectangular mask covering `[x0, x1) x [y0, y1)` of a
/// `width x height` image.
pub fn rect_mask(width: u32, height: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> RegionMask {
    let data = (0..height)
        .flat_map(|y| (0..width).map(move |x| x >= x0 && x < x1 && y >= y0 && y < y1))
        .collect();
    RegionMask::new(width, height, data)
}
