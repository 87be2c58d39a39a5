pub mod features;
pub mod store;

use image::RgbImage;
use ndarray::Array1;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use crate::error::Error;
use crate::models::{
    LearnOutcome, LearnedObjectInfo, RecognitionOutcome, TileCountOutcome, ValidationOutcome,
};
use features::{DEFAULT_FEATURE_DIM, FeatureExtractor, cosine_similarity};
use store::{DirStore, ModelStore};

pub const DEFAULT_RECOGNITION_THRESHOLD: f32 = 0.5;

/// Similarity a tile must exceed to count as an instance; distinct
/// from the recognition threshold.
pub const COUNTING_THRESHOLD: f32 = 0.6;

/// Edge length of the grid tiles used by `count_learned`
pub const TILE_SIZE: u32 = 64;

const MIN_TRAINING_IMAGES: usize = 2;

/// On-disk representation of one learned object: summary feature
/// statistics over its training set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedObject {
    pub name: String,
    pub mean_features: Vec<f32>,
    pub feature_variance: Vec<f32>,
    /// Pairwise cosine similarity over the training examples
    pub similarity_matrix: Vec<Vec<f32>>,
    pub training_images_count: usize,
    pub feature_dim: usize,
    pub learned_at: String,
}

/// Registry of object categories learned from a handful of example
/// images, recognized later by nearest-mean feature similarity.
///
/// The in-memory map is the source of truth for the lifetime of the
/// process; every successful learn or delete is mirrored to the blob
/// store so a later process can [`FewShotRegistry::load_all`] it back.
pub struct FewShotRegistry {
    extractor: FeatureExtractor,
    store: Box<dyn ModelStore>,
    objects: RwLock<HashMap<String, LearnedObject>>,
}

impl FewShotRegistry {
    pub fn new(store: Box<dyn ModelStore>) -> Self {
        Self::with_feature_dim(store, DEFAULT_FEATURE_DIM)
    }

    pub fn with_feature_dim(store: Box<dyn ModelStore>, feature_dim: usize) -> Self {
        Self {
            extractor: FeatureExtractor::new(feature_dim),
            store,
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Open a directory-backed registry and load every persisted
    /// object into memory.
    pub fn open(model_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let registry = Self::new(Box::new(DirStore::new(model_dir)?));
        let loaded = registry.load_all()?;
        if loaded > 0 {
            info!(loaded, "loaded learned objects from disk");
        }
        Ok(registry)
    }

    /// Load all persisted objects from the blob store. Blobs that fail
    /// to parse are skipped with a warning.
    pub fn load_all(&self) -> anyhow::Result<usize> {
        let mut loaded = 0;
        for name in self.store.list()? {
            let Some(blob) = self.store.get(&name)? else {
                continue;
            };
            match serde_json::from_slice::<LearnedObject>(&blob) {
                Ok(object) => {
                    self.objects.write().insert(name, object);
                    loaded += 1;
                }
                Err(err) => {
                    warn!(name, error = %err, "skipping unreadable learned object blob");
                }
            }
        }
        Ok(loaded)
    }

    /// Learn (or re-learn, overwriting) an object category from at
    /// least two training images. Never raises: every failure path is
    /// captured as `learning_successful: false` with a message.
    pub fn learn(
        &self,
        name: &str,
        training_images: &[PathBuf],
        validation_images: &[PathBuf],
    ) -> LearnOutcome {
        match self.try_learn(name, training_images, validation_images) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(name, error = %err, "learning failed");
                LearnOutcome {
                    object_name: name.to_string(),
                    training_images_count: training_images.len(),
                    validation_images_count: validation_images.len(),
                    feature_dim: self.extractor.feature_dim(),
                    learning_successful: false,
                    error: Some(err.to_string()),
                    validation_results: None,
                    learned_at: now_rfc3339(),
                }
            }
        }
    }

    fn try_learn(
        &self,
        name: &str,
        training_images: &[PathBuf],
        validation_images: &[PathBuf],
    ) -> anyhow::Result<LearnOutcome> {
        if !is_valid_name(name) {
            anyhow::bail!("invalid object name {name:?}");
        }
        if training_images.len() < MIN_TRAINING_IMAGES {
            return Err(Error::InsufficientData {
                required: MIN_TRAINING_IMAGES,
                got: training_images.len(),
            }
            .into());
        }

        info!(name, images = training_images.len(), "learning new object type");

        let features: Vec<Array1<f32>> = training_images
            .iter()
            .map(|path| self.extractor.extract_path(path))
            .collect();

        let dim = self.extractor.feature_dim();
        let count = features.len();

        let mut mean = Array1::<f32>::zeros(dim);
        for feature in &features {
            mean += feature;
        }
        mean /= count as f32;

        let mut variance = Array1::<f32>::zeros(dim);
        for feature in &features {
            let diff = feature - &mean;
            variance += &(&diff * &diff);
        }
        variance /= count as f32;

        let similarity_matrix: Vec<Vec<f32>> = features
            .iter()
            .map(|a| {
                features
                    .iter()
                    .map(|b| cosine_similarity(a.view(), b.view()))
                    .collect()
            })
            .collect();

        let learned_at = now_rfc3339();
        let object = LearnedObject {
            name: name.to_string(),
            mean_features: mean.to_vec(),
            feature_variance: variance.to_vec(),
            similarity_matrix,
            training_images_count: count,
            feature_dim: dim,
            learned_at: learned_at.clone(),
        };

        let validation_results = if validation_images.is_empty() {
            None
        } else {
            Some(self.validate_against(&mean, validation_images))
        };

        // Write lock spans the insert and the persist so no other
        // operation observes the two out of step.
        {
            let mut objects = self.objects.write();
            objects.insert(name.to_string(), object.clone());
            match serde_json::to_vec(&object) {
                Ok(blob) => {
                    if let Err(err) = self.store.put(name, &blob) {
                        warn!(name, error = %err, "persisting learned object failed; in-memory registration kept");
                    }
                }
                Err(err) => {
                    warn!(name, error = %err, "serializing learned object failed; in-memory registration kept");
                }
            }
        }

        info!(name, "successfully learned object type");
        Ok(LearnOutcome {
            object_name: name.to_string(),
            training_images_count: count,
            validation_images_count: validation_images.len(),
            feature_dim: dim,
            learning_successful: true,
            error: None,
            validation_results,
            learned_at,
        })
    }

    fn validate_against(&self, mean: &Array1<f32>, images: &[PathBuf]) -> ValidationOutcome {
        let similarities: Vec<f32> = images
            .iter()
            .map(|path| {
                let feature = self.extractor.extract_path(path);
                cosine_similarity(feature.view(), mean.view())
            })
            .collect();

        let avg = similarities.iter().sum::<f32>() / similarities.len() as f32;
        let min = similarities.iter().copied().fold(f32::INFINITY, f32::min);
        let max = similarities
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);

        ValidationOutcome {
            avg_similarity: avg,
            min_similarity: min,
            max_similarity: max,
            validation_images_count: images.len(),
            validation_successful: avg > 0.5,
        }
    }

    /// Compare an image against every learned object's mean features.
    /// The full similarity map is returned whether or not the best
    /// match clears the threshold.
    pub fn recognize(&self, image_path: &Path, threshold: f32) -> RecognitionOutcome {
        let means: Vec<(String, Array1<f32>)> = {
            let objects = self.objects.read();
            objects
                .values()
                .map(|o| (o.name.clone(), Array1::from(o.mean_features.clone())))
                .collect()
        };

        if means.is_empty() {
            return RecognitionOutcome {
                recognized: false,
                best_match: None,
                best_similarity: 0.0,
                similarities: BTreeMap::new(),
                threshold,
                message: Some("no objects learned yet".to_string()),
            };
        }

        let image = match image::open(image_path) {
            Ok(img) => img.to_rgb8(),
            Err(err) => {
                warn!(path = %image_path.display(), error = %err, "recognition input failed to load");
                return RecognitionOutcome {
                    recognized: false,
                    best_match: None,
                    best_similarity: 0.0,
                    similarities: BTreeMap::new(),
                    threshold,
                    message: Some(format!("failed to load image: {err}")),
                };
            }
        };

        let feature = self.extractor.extract(&image);
        self.recognize_features(&feature, &means, threshold)
    }

    fn recognize_features(
        &self,
        feature: &Array1<f32>,
        means: &[(String, Array1<f32>)],
        threshold: f32,
    ) -> RecognitionOutcome {
        let mut similarities = BTreeMap::new();
        let mut best: Option<(&str, f32)> = None;
        for (name, mean) in means {
            let similarity = cosine_similarity(feature.view(), mean.view());
            similarities.insert(name.clone(), similarity);
            if best.is_none_or(|(_, s)| similarity > s) {
                best = Some((name, similarity));
            }
        }

        let (best_name, best_similarity) = best.map(|(n, s)| (n.to_string(), s)).unwrap_or_default();
        RecognitionOutcome {
            recognized: best_similarity >= threshold,
            best_match: Some(best_name),
            best_similarity,
            similarities,
            threshold,
            message: None,
        }
    }

    /// Count instances of a learned object by partitioning the image
    /// into a fixed grid of tiles (trailing partial tiles included)
    /// and counting tiles whose similarity exceeds the counting
    /// threshold.
    ///
    /// This is a coarse spatial-grid approximation: objects spanning a
    /// tile boundary are counted more than once and objects smaller
    /// than a tile can be missed. That is an accepted limitation of
    /// the approach, not a defect of a particular result.
    pub fn count_learned(&self, image_path: &Path, name: &str) -> TileCountOutcome {
        let mean = {
            let objects = self.objects.read();
            match objects.get(name) {
                Some(object) => Array1::from(object.mean_features.clone()),
                None => {
                    return TileCountOutcome {
                        count: 0,
                        confidence: 0.0,
                        segments_checked: 0,
                        avg_similarity: 0.0,
                        object_name: name.to_string(),
                        error: Some(format!("object type \"{name}\" not learned yet")),
                    };
                }
            }
        };

        let image = match image::open(image_path) {
            Ok(img) => img.to_rgb8(),
            Err(err) => {
                warn!(path = %image_path.display(), error = %err, "counting input failed to load");
                return TileCountOutcome {
                    count: 0,
                    confidence: 0.0,
                    segments_checked: 0,
                    avg_similarity: 0.0,
                    object_name: name.to_string(),
                    error: Some(format!("failed to load image: {err}")),
                };
            }
        };

        let (width, height) = image.dimensions();
        let mut similarities = Vec::new();
        let mut count = 0;

        let mut y = 0;
        while y < height {
            let tile_h = TILE_SIZE.min(height - y);
            let mut x = 0;
            while x < width {
                let tile_w = TILE_SIZE.min(width - x);
                let tile = tile_of(&image, x, y, tile_w, tile_h);
                let feature = self.extractor.extract(&tile);
                let similarity = cosine_similarity(feature.view(), mean.view());
                similarities.push(similarity);
                if similarity > COUNTING_THRESHOLD {
                    count += 1;
                }
                x += TILE_SIZE;
            }
            y += TILE_SIZE;
        }

        let avg = if similarities.is_empty() {
            0.0
        } else {
            similarities.iter().sum::<f32>() / similarities.len() as f32
        };

        TileCountOutcome {
            count,
            confidence: (avg * 2.0).min(1.0),
            segments_checked: similarities.len(),
            avg_similarity: avg,
            object_name: name.to_string(),
            error: None,
        }
    }

    /// Remove a learned object and its persisted blob. Returns false
    /// when the name was never learned.
    pub fn delete(&self, name: &str) -> bool {
        let mut objects = self.objects.write();
        let existed = objects.remove(name).is_some();
        if existed {
            if let Err(err) = self.store.delete(name) {
                warn!(name, error = %err, "deleting learned object blob failed");
            }
            info!(name, "deleted learned object");
        } else {
            warn!(name, "delete requested for unknown object");
        }
        existed
    }

    /// Every currently learned object, in registry iteration order.
    pub fn list(&self) -> Vec<LearnedObjectInfo> {
        let objects = self.objects.read();
        objects
            .values()
            .map(|o| LearnedObjectInfo {
                name: o.name.clone(),
                training_images_count: o.training_images_count,
                learned_at: o.learned_at.clone(),
                feature_dim: o.feature_dim,
            })
            .collect()
    }

    pub fn feature_dim(&self) -> usize {
        self.extractor.feature_dim()
    }
}

/// In-memory tile crop; tiles never touch the filesystem.
fn tile_of(image: &RgbImage, x: u32, y: u32, width: u32, height: u32) -> RgbImage {
    image::imageops::crop_imm(image, x, y, width, height).to_image()
}

/// Names become blob filenames, so anything that could escape the
/// model directory is rejected.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339).unwrap_or_else(|_| now.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        assert!(is_valid_name("widget"));
        assert!(is_valid_name("blue widget 2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name(".."));
        assert!(!is_valid_name("a/b"));
        assert!(!is_valid_name("a\\b"));
    }
}
