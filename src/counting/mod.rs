pub mod aggregate;
pub mod classify;
pub mod extract;
pub mod refine;
pub mod segmenter;

use image::RgbImage;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::models::{CountDetails, CountOutcome, ItemType};
use aggregate::LabelledSegment;
use classify::{ClassModel, Classifier, FallbackClassifier, ModelClassifier, fnv1a};
use extract::{DEFAULT_MAX_SEGMENTS, SegmentExtractor};
use refine::{EntailmentRefiner, EntailmentScorer, PassthroughRefiner, Refiner};
use segmenter::SegmentationModel;

/// Operating mode, fixed at construction. There is no transition back
/// to `Ready` at runtime: a model missing at startup stays missing for
/// the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Segmentation, classification and refinement models all loaded
    Ready,
    /// One or more models failed to load; fallback strategies active
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub mode: Mode,
    pub segmentation_model: Option<String>,
    pub classifier: String,
    pub refiner: String,
    pub max_segments: usize,
    pub supported_types: Vec<String>,
}

/// Orchestrates the three-stage counting pipeline: segmentation,
/// per-segment classification, zero-shot label refinement, then
/// aggregation into a count with a confidence score.
pub struct ObjectCounter {
    segmentation: Option<Box<dyn SegmentationModel>>,
    classifier: Box<dyn Classifier>,
    refiner: Box<dyn Refiner>,
    candidate_labels: Vec<String>,
    max_segments: usize,
    mode: Mode,
}

/// Builds an [`ObjectCounter`] from whichever model backends loaded at
/// startup. Any backend left unset selects the corresponding fallback
/// strategy and puts the counter in degraded mode.
pub struct ObjectCounterBuilder {
    segmentation: Option<Box<dyn SegmentationModel>>,
    class_model: Option<Box<dyn ClassModel>>,
    entailment: Option<Box<dyn EntailmentScorer>>,
    max_segments: usize,
}

impl ObjectCounterBuilder {
    pub fn new() -> Self {
        Self {
            segmentation: None,
            class_model: None,
            entailment: None,
            max_segments: DEFAULT_MAX_SEGMENTS,
        }
    }

    pub fn segmentation(mut self, model: Box<dyn SegmentationModel>) -> Self {
        self.segmentation = Some(model);
        self
    }

    pub fn class_model(mut self, model: Box<dyn ClassModel>) -> Self {
        self.class_model = Some(model);
        self
    }

    pub fn entailment(mut self, scorer: Box<dyn EntailmentScorer>) -> Self {
        self.entailment = Some(scorer);
        self
    }

    pub fn max_segments(mut self, max_segments: usize) -> Self {
        self.max_segments = max_segments;
        self
    }

    pub fn build(self) -> ObjectCounter {
        let candidate_labels = ItemType::candidate_labels();

        let degraded = self.segmentation.is_none()
            || self.class_model.is_none()
            || self.entailment.is_none();

        if self.segmentation.is_none() {
            warn!("segmentation model unavailable; counting will return simulated results");
        }

        let classifier: Box<dyn Classifier> = match self.class_model {
            Some(model) => Box::new(ModelClassifier::new(model)),
            None => {
                warn!("classification model unavailable; using fallback candidate labels");
                Box::new(FallbackClassifier::new(candidate_labels.clone()))
            }
        };

        let refiner: Box<dyn Refiner> = match self.entailment {
            Some(scorer) => Box::new(EntailmentRefiner::new(scorer)),
            None => {
                warn!("entailment model unavailable; raw labels pass through unrefined");
                Box::new(PassthroughRefiner)
            }
        };

        let mode = if degraded { Mode::Degraded } else { Mode::Ready };
        info!(?mode, "object counter initialized");

        ObjectCounter {
            segmentation: self.segmentation,
            classifier,
            refiner,
            candidate_labels,
            max_segments: self.max_segments,
            mode,
        }
    }
}

impl Default for ObjectCounterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectCounter {
    pub fn builder() -> ObjectCounterBuilder {
        ObjectCounterBuilder::new()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The item types the pipeline can be asked to count.
    pub fn supported_item_types(&self) -> &[String] {
        &self.candidate_labels
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            mode: self.mode,
            segmentation_model: self.segmentation.as_ref().map(|s| s.name().to_string()),
            classifier: self.classifier.name().to_string(),
            refiner: self.refiner.name().to_string(),
            max_segments: self.max_segments,
            supported_types: self.candidate_labels.clone(),
        }
    }

    /// Count instances of `target` in the image at `image_path`.
    ///
    /// Fails with [`Error::ImageLoad`] when the image cannot be
    /// decoded. Without a segmentation model the result is simulated
    /// from the image dimensions and flagged `fallback_mode`. Any
    /// other failure surfaces as a single [`Error::Pipeline`].
    pub fn count_objects(&self, image_path: &Path, target: ItemType) -> Result<CountOutcome> {
        let started = Instant::now();
        let image = image::open(image_path)
            .map_err(|source| Error::ImageLoad {
                path: image_path.to_path_buf(),
                source,
            })?
            .to_rgb8();
        info!(
            path = %image_path.display(),
            %target,
            width = image.width(),
            height = image.height(),
            "counting objects"
        );

        let Some(segmentation) = self.segmentation.as_ref() else {
            return Ok(self.simulated_outcome(&image, target, started));
        };

        self.run_pipeline(segmentation.as_ref(), &image, target, started)
            .map_err(|err| {
                error!(error = %err, "counting pipeline failed");
                Error::Pipeline(err.to_string())
            })
    }

    fn run_pipeline(
        &self,
        segmentation: &dyn SegmentationModel,
        image: &RgbImage,
        target: ItemType,
        started: Instant,
    ) -> anyhow::Result<CountOutcome> {
        let masks = segmentation.generate_masks(image)?;
        debug!(masks = masks.len(), "segmentation complete");

        let extractor = SegmentExtractor::new(self.max_segments);
        let segments = extractor.extract(image, &masks);
        debug!(segments = segments.len(), "segments extracted");

        let mut labelled = Vec::with_capacity(segments.len());
        let mut fallback_mode = false;
        for segment in &segments {
            let classification = self.classifier.classify(&segment.chip, segment.rank);
            fallback_mode |= classification.fallback;
            let refined = self
                .refiner
                .refine(&classification.label, &self.candidate_labels);
            debug!(
                rank = segment.rank,
                raw = %classification.label,
                refined = %refined,
                "segment labelled"
            );
            labelled.push(LabelledSegment {
                rank: segment.rank,
                predicted_class: classification.label,
                refined_label: refined,
            });
        }

        let result = aggregate::aggregate(&labelled, target.as_str());
        info!(
            count = result.count,
            confidence = result.confidence,
            "object counting completed"
        );

        Ok(CountOutcome {
            count: result.count,
            confidence: result.confidence,
            processing_time: started.elapsed().as_secs_f64(),
            details: CountDetails {
                total_segments: segments.len(),
                target_type: target.to_string(),
                fallback_mode,
                segment_details: result.details,
                image_size: None,
            },
        })
    }

    /// Structurally valid placeholder result for when no segmentation
    /// model is present: the count is derived from the pixel area with
    /// bounded deterministic jitter and flagged `fallback_mode` so the
    /// surrounding service stays testable without the heavy models.
    fn simulated_outcome(&self, image: &RgbImage, target: ItemType, started: Instant) -> CountOutcome {
        let (width, height) = image.dimensions();
        let area = width as u64 * height as u64;
        let base = ((area / 100_000) as i64).clamp(1, 10);

        let seed = fnv1a(&[width, height]);
        let jitter = (seed % 4) as i64 - 1; // [-1, 2]
        let count = (base + jitter).max(1) as usize;
        let confidence = 0.75 + ((seed >> 8) % 2001) as f32 / 10_000.0; // [0.75, 0.95]
        let segments_found = count + ((seed >> 24) % 3) as usize;

        warn!(count, "segmentation unavailable, returning simulated result");

        CountOutcome {
            count,
            confidence,
            processing_time: started.elapsed().as_secs_f64(),
            details: CountDetails {
                total_segments: segments_found,
                target_type: target.to_string(),
                fallback_mode: true,
                segment_details: Vec::new(),
                image_size: Some(format!("{width}x{height}")),
            },
        }
    }
}
