use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Binary region mask produced by a segmentation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionMask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<bool>, // Flattened row-major format
}

impl RegionMask {
    pub fn new(width: u32, height: u32, data: Vec<bool>) -> Self {
        assert_eq!(
            data.len(),
            (width * height) as usize,
            "Mask data size must match width * height"
        );
        Self {
            width,
            height,
            data,
        }
    }

    /// Get mask value at (x, y)
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.data[(y * self.width + x) as usize]
    }

    /// Number of true pixels
    pub fn pixel_count(&self) -> usize {
        self.data.iter().filter(|&&b| b).count()
    }

    /// Tight bounding box of true pixels, or None for an empty mask
    pub fn bbox(&self) -> Option<BoundingBox> {
        let mut min_x = self.width;
        let mut max_x = 0;
        let mut min_y = self.height;
        let mut max_y = 0;
        let mut found = false;

        for y in 0..self.height {
            for x in 0..self.width {
                if self.get(x, y) {
                    found = true;
                    min_x = min_x.min(x);
                    max_x = max_x.max(x);
                    min_y = min_y.min(y);
                    max_y = max_y.max(y);
                }
            }
        }

        if found {
            Some(BoundingBox {
                top: min_y,
                left: min_x,
                bottom: max_y,
                right: max_x,
            })
        } else {
            None
        }
    }
}

/// Bounding box with inclusive edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: u32,
    pub left: u32,
    pub bottom: u32,
    pub right: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.right - self.left + 1
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top + 1
    }
}

/// One extracted image chip: the masked content of a region, cropped to
/// its bounding box. Lives only for the duration of a single count call.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Position in the area-sorted order (0 = largest retained region)
    pub rank: usize,
    pub area: usize,
    pub bbox: BoundingBox,
    pub chip: RgbImage,
}

/// The fixed set of object types the counting pipeline can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Car,
    Cat,
    Tree,
    Dog,
    Building,
    Person,
    Sky,
    Ground,
    Hardware,
}

impl ItemType {
    pub const ALL: [ItemType; 9] = [
        ItemType::Car,
        ItemType::Cat,
        ItemType::Tree,
        ItemType::Dog,
        ItemType::Building,
        ItemType::Person,
        ItemType::Sky,
        ItemType::Ground,
        ItemType::Hardware,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Car => "car",
            ItemType::Cat => "cat",
            ItemType::Tree => "tree",
            ItemType::Dog => "dog",
            ItemType::Building => "building",
            ItemType::Person => "person",
            ItemType::Sky => "sky",
            ItemType::Ground => "ground",
            ItemType::Hardware => "hardware",
        }
    }

    /// The candidate label set used for fallback classification and
    /// zero-shot refinement.
    pub fn candidate_labels() -> Vec<String> {
        Self::ALL.iter().map(|t| t.as_str().to_string()).collect()
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-segment classification detail in a counting result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentDetail {
    pub rank: usize,
    pub predicted_class: String,
    pub refined_label: String,
    pub is_target: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountDetails {
    pub total_segments: usize,
    pub target_type: String,
    pub fallback_mode: bool,
    pub segment_details: Vec<SegmentDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_size: Option<String>,
}

/// Result of one counting request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountOutcome {
    pub count: usize,
    pub confidence: f32,
    /// Wall-clock processing duration in seconds
    pub processing_time: f64,
    pub details: CountDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub avg_similarity: f32,
    pub min_similarity: f32,
    pub max_similarity: f32,
    pub validation_images_count: usize,
    pub validation_successful: bool,
}

/// Result of a learn call. Learning never raises; failures are encoded
/// as `learning_successful: false` plus an error message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnOutcome {
    pub object_name: String,
    pub training_images_count: usize,
    pub validation_images_count: usize,
    pub feature_dim: usize,
    pub learning_successful: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_results: Option<ValidationOutcome>,
    pub learned_at: String,
}

/// Result of recognizing a single image against every learned object.
/// The similarity map is returned even when nothing clears the
/// threshold, so callers can still inspect the ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionOutcome {
    pub recognized: bool,
    pub best_match: Option<String>,
    pub best_similarity: f32,
    pub similarities: BTreeMap<String, f32>,
    pub threshold: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of grid-tile counting of a learned object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileCountOutcome {
    pub count: usize,
    pub confidence: f32,
    pub segments_checked: usize,
    pub avg_similarity: f32,
    pub object_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedObjectInfo {
    pub name: String,
    pub training_images_count: usize,
    pub learned_at: String,
    pub feature_dim: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_creation() {
        let data = vec![true, false, true, false];
        let mask = RegionMask::new(2, 2, data);
        assert!(mask.get(0, 0));
        assert!(!mask.get(1, 0));
        assert_eq!(mask.pixel_count(), 2);
    }

    #[test]
    fn test_mask_bbox() {
        let mut data = vec![false; 9];
        // 2x2 block in the lower-right corner of a 3x3 mask
        data[4] = true;
        data[5] = true;
        data[7] = true;
        data[8] = true;

        let mask = RegionMask::new(3, 3, data);
        let bbox = mask.bbox().expect("Expected bbox");
        assert_eq!(bbox.left, 1);
        assert_eq!(bbox.top, 1);
        assert_eq!(bbox.right, 2);
        assert_eq!(bbox.bottom, 2);
        assert_eq!(bbox.width(), 2);
        assert_eq!(bbox.height(), 2);
    }

    #[test]
    fn test_empty_mask_has_no_bbox() {
        let mask = RegionMask::new(4, 4, vec![false; 16]);
        assert!(mask.bbox().is_none());
    }

    #[test]
    fn test_item_type_labels() {
        let labels = ItemType::candidate_labels();
        assert_eq!(labels.len(), 9);
        assert_eq!(labels[0], "car");
        assert_eq!(ItemType::Hardware.to_string(), "hardware");
    }
}
