use image::{Rgb, RgbImage};
use tracing::debug;

use crate::models::{RegionMask, Segment};

/// Pixel value written outside the mask inside a chip, so the
/// classifier sees an isolated object on a uniform background.
pub const CHIP_BACKGROUND: u8 = 188;

pub const DEFAULT_MAX_SEGMENTS: usize = 10;

/// Crops each region mask to its tight bounding box, largest regions
/// first, capped at `max_segments`. Masks with no true pixels are
/// skipped. The returned order (descending area, discovery order on
/// ties) is preserved through the rest of the pipeline.
pub struct SegmentExtractor {
    max_segments: usize,
}

impl SegmentExtractor {
    pub fn new(max_segments: usize) -> Self {
        assert!(max_segments >= 1, "max_segments must be at least 1");
        Self { max_segments }
    }

    pub fn extract(&self, image: &RgbImage, masks: &[RegionMask]) -> Vec<Segment> {
        let mut order: Vec<(usize, usize)> = masks
            .iter()
            .enumerate()
            .map(|(idx, mask)| (idx, mask.pixel_count()))
            .collect();
        // Stable sort keeps discovery order for equal areas
        order.sort_by(|a, b| b.1.cmp(&a.1));

        let mut segments = Vec::new();
        for &(idx, area) in order.iter().take(self.max_segments) {
            let mask = &masks[idx];
            let Some(bbox) = mask.bbox() else {
                debug!(mask = idx, "skipping empty region mask");
                continue;
            };

            let mut chip = RgbImage::new(bbox.width(), bbox.height());
            for y in 0..bbox.height() {
                for x in 0..bbox.width() {
                    let sx = bbox.left + x;
                    let sy = bbox.top + y;
                    let pixel = if mask.get(sx, sy) {
                        *image.get_pixel(sx, sy)
                    } else {
                        Rgb([CHIP_BACKGROUND; 3])
                    };
                    chip.put_pixel(x, y, pixel);
                }
            }

            segments.push(Segment {
                rank: segments.len(),
                area,
                bbox,
                chip,
            });
        }

        segments
    }
}
