use image::{DynamicImage, Luma, RgbImage};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::region_labelling::{Connectivity, connected_components};
use std::collections::HashMap;
use tracing::debug;

use crate::models::RegionMask;

/// External segmentation collaborator: produces candidate region masks
/// for an image. Implementations must be safe to call from multiple
/// requests at once.
pub trait SegmentationModel: Send + Sync {
    fn generate_masks(&self, image: &RgbImage) -> anyhow::Result<Vec<RegionMask>>;

    fn name(&self) -> &str {
        "segmentation model"
    }
}

/// In-process region-proposal backend: grayscale, Gaussian blur, Canny
/// edges, then connected components over the edge map. Each labelled
/// component becomes one region mask.
pub struct ContourSegmenter {
    pub blur_sigma: f32,
    pub low_threshold: f32,
    pub high_threshold: f32,
    /// Components smaller than this many pixels are discarded as noise
    pub min_area: usize,
}

impl ContourSegmenter {
    pub fn new() -> Self {
        Self {
            blur_sigma: 1.5,
            low_threshold: 50.0,
            high_threshold: 100.0,
            min_area: 10,
        }
    }
}

impl Default for ContourSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentationModel for ContourSegmenter {
    fn generate_masks(&self, image: &RgbImage) -> anyhow::Result<Vec<RegionMask>> {
        let gray = DynamicImage::ImageRgb8(image.clone()).to_luma8();
        let blurred = gaussian_blur_f32(&gray, self.blur_sigma);
        let edges = canny(&blurred, self.low_threshold, self.high_threshold);

        let labeled = connected_components(&edges, Connectivity::Eight, Luma([0u8]));

        let (width, height) = image.dimensions();
        let mut regions: HashMap<u32, Vec<bool>> = HashMap::new();
        for (x, y, label) in labeled.enumerate_pixels() {
            let label_val = label[0];
            if label_val == 0 {
                continue; // Skip background
            }
            let mask = regions
                .entry(label_val)
                .or_insert_with(|| vec![false; (width * height) as usize]);
            mask[(y * width + x) as usize] = true;
        }

        let masks: Vec<RegionMask> = regions
            .into_values()
            .map(|data| RegionMask::new(width, height, data))
            .filter(|m| m.pixel_count() >= self.min_area)
            .collect();

        debug!(regions = masks.len(), "contour segmentation complete");
        Ok(masks)
    }

    fn name(&self) -> &str {
        "contour region proposals"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_uniform_image_yields_no_regions() {
        let img = RgbImage::from_pixel(32, 32, Rgb([120, 120, 120]));
        let masks = ContourSegmenter::new().generate_masks(&img).unwrap();
        assert!(masks.is_empty());
    }

    #[test]
    fn test_high_contrast_block_yields_regions() {
        let mut img = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));
        for y in 16..48 {
            for x in 16..48 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let masks = ContourSegmenter::new().generate_masks(&img).unwrap();
        assert!(!masks.is_empty());
        for mask in &masks {
            assert!(mask.pixel_count() >= 10);
            assert_eq!(mask.width, 64);
            assert_eq!(mask.height, 64);
        }
    }
}
