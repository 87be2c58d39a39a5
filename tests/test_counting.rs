mod common;

use common::*;
use image::RgbImage;
use std::path::Path;

use objtally::counting::classify::ClassModel;
use objtally::counting::refine::EntailmentScorer;
use objtally::counting::segmenter::SegmentationModel;
use objtally::models::RegionMask;
use objtally::{Error, ItemType, Mode, ObjectCounter};

struct FixedSegmenter {
    masks: Vec<RegionMask>,
}

impl SegmentationModel for FixedSegmenter {
    fn generate_masks(&self, _image: &RgbImage) -> anyhow::Result<Vec<RegionMask>> {
        Ok(self.masks.clone())
    }
}

struct FixedModel {
    vocab: Vec<String>,
    index: usize,
}

impl ClassModel for FixedModel {
    fn predict(&self, _chip: &RgbImage) -> anyhow::Result<usize> {
        Ok(self.index)
    }

    fn vocab(&self) -> &[String] {
        &self.vocab
    }
}

struct FailingModel {
    vocab: Vec<String>,
}

impl ClassModel for FailingModel {
    fn predict(&self, _chip: &RgbImage) -> anyhow::Result<usize> {
        anyhow::bail!("inference backend unavailable")
    }

    fn vocab(&self) -> &[String] {
        &self.vocab
    }
}

/// Scores the candidate equal to the premise highest, everything else
/// low. Stands in for a real entailment model.
struct EchoScorer;

impl EntailmentScorer for EchoScorer {
    fn score(&self, premise: &str, candidates: &[String]) -> anyhow::Result<Vec<f32>> {
        Ok(candidates
            .iter()
            .map(|c| if c == premise { 0.95 } else { 0.05 })
            .collect())
    }
}

#[test]
fn test_unreadable_image_is_a_load_error() {
    let counter = ObjectCounter::builder().build();
    let err = counter
        .count_objects(Path::new("/nonexistent/image.png"), ItemType::Car)
        .unwrap_err();
    assert!(matches!(err, Error::ImageLoad { .. }));
}

#[test]
fn test_missing_segmentation_simulates_a_result() {
    let image = solid_image_file(640, 480, [90, 90, 90]);
    let counter = ObjectCounter::builder().build();
    assert_eq!(counter.mode(), Mode::Degraded);

    let outcome = counter.count_objects(image.path(), ItemType::Cat).unwrap();
    assert!(outcome.details.fallback_mode);
    assert!(outcome.count >= 1 && outcome.count <= 12);
    assert!(outcome.confidence >= 0.75 && outcome.confidence <= 0.95);
    assert!(outcome.details.total_segments >= outcome.count);
    assert_eq!(outcome.details.target_type, "cat");
    assert_eq!(outcome.details.image_size.as_deref(), Some("640x480"));
    assert!(outcome.details.segment_details.is_empty());
}

#[test]
fn test_simulated_results_are_stable_across_runs() {
    let image = solid_image_file(320, 240, [90, 90, 90]);
    let counter = ObjectCounter::builder().build();

    let first = counter.count_objects(image.path(), ItemType::Dog).unwrap();
    let second = counter.count_objects(image.path(), ItemType::Dog).unwrap();
    assert_eq!(first.count, second.count);
    assert_eq!(first.confidence, second.confidence);
    assert_eq!(first.details.total_segments, second.details.total_segments);
}

#[test]
fn test_full_pipeline_counts_matching_segments() {
    let image = solid_image_file(32, 32, [90, 90, 90]);
    let masks = vec![
        rect_mask(32, 32, 2, 2, 10, 10),
        rect_mask(32, 32, 20, 20, 28, 28),
    ];

    let counter = ObjectCounter::builder()
        .segmentation(Box::new(FixedSegmenter { masks }))
        .class_model(Box::new(FixedModel {
            vocab: vec!["car".to_string()],
            index: 0,
        }))
        .entailment(Box::new(EchoScorer))
        .build();
    assert_eq!(counter.mode(), Mode::Ready);

    let outcome = counter.count_objects(image.path(), ItemType::Car).unwrap();
    assert_eq!(outcome.count, 2);
    // Two matches plus raw/refined agreement saturates the confidence.
    assert_eq!(outcome.confidence, 1.0);
    assert!(!outcome.details.fallback_mode);
    assert_eq!(outcome.details.total_segments, 2);
    assert!(outcome.details.image_size.is_none());
    assert!(outcome.details.segment_details.iter().all(|d| d.is_target));
    assert!(outcome.processing_time >= 0.0);
}

#[test]
fn test_non_matching_target_counts_zero() {
    let image = solid_image_file(32, 32, [90, 90, 90]);
    let masks = vec![rect_mask(32, 32, 2, 2, 10, 10)];

    let counter = ObjectCounter::builder()
        .segmentation(Box::new(FixedSegmenter { masks }))
        .class_model(Box::new(FixedModel {
            vocab: vec!["car".to_string()],
            index: 0,
        }))
        .entailment(Box::new(EchoScorer))
        .build();

    let outcome = counter.count_objects(image.path(), ItemType::Tree).unwrap();
    assert_eq!(outcome.count, 0);
    assert_eq!(outcome.confidence, 0.5);
    assert_eq!(outcome.details.segment_details.len(), 1);
    assert!(!outcome.details.segment_details[0].is_target);
}

#[test]
fn test_per_segment_model_failure_does_not_abort() {
    let image = solid_image_file(32, 32, [90, 90, 90]);
    let masks = vec![
        rect_mask(32, 32, 2, 2, 10, 10),
        rect_mask(32, 32, 20, 20, 28, 28),
    ];

    let counter = ObjectCounter::builder()
        .segmentation(Box::new(FixedSegmenter { masks }))
        .class_model(Box::new(FailingModel {
            vocab: vec!["car".to_string()],
        }))
        .entailment(Box::new(EchoScorer))
        .build();

    let outcome = counter.count_objects(image.path(), ItemType::Car).unwrap();
    // Every segment degraded to "unknown"; nothing matched, nothing
    // crashed.
    assert_eq!(outcome.count, 0);
    assert_eq!(outcome.confidence, 0.5);
    assert_eq!(outcome.details.segment_details.len(), 2);
    assert!(
        outcome
            .details
            .segment_details
            .iter()
            .all(|d| d.predicted_class == "unknown")
    );
}

#[test]
fn test_segment_cap_keeps_largest_regions() {
    let image = solid_image_file(64, 64, [90, 90, 90]);
    let masks = vec![
        rect_mask(64, 64, 0, 0, 4, 4),   // 16 px
        rect_mask(64, 64, 0, 0, 32, 32), // 1024 px
        rect_mask(64, 64, 40, 40, 48, 48), // 64 px
    ];

    let counter = ObjectCounter::builder()
        .segmentation(Box::new(FixedSegmenter { masks }))
        .class_model(Box::new(FixedModel {
            vocab: vec!["car".to_string()],
            index: 0,
        }))
        .entailment(Box::new(EchoScorer))
        .max_segments(2)
        .build();

    let outcome = counter.count_objects(image.path(), ItemType::Car).unwrap();
    assert_eq!(outcome.details.total_segments, 2);
    assert_eq!(outcome.count, 2);
}

#[test]
fn test_model_info_reports_degraded_backends() {
    let counter = ObjectCounter::builder().build();
    let info = counter.model_info();
    assert_eq!(info.mode, Mode::Degraded);
    assert!(info.segmentation_model.is_none());
    assert_eq!(info.supported_types.len(), 9);
    assert_eq!(info.max_segments, 10);
}
