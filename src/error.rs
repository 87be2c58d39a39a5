use std::path::PathBuf;

/// Fatal error taxonomy for the counting and learning APIs.
///
/// Per-segment classification and refinement failures are not errors:
/// they degrade to an `"unknown"` label and are logged where they occur.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input image could not be read or decoded. Fatal to the
    /// request; never retried.
    #[error("failed to load image {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// A learn call was given fewer examples than required.
    #[error("at least {required} training images are required, got {got}")]
    InsufficientData { required: usize, got: usize },

    /// Unexpected failure inside the counting pipeline after image
    /// load. Carries the original cause; fatal to that request.
    #[error("counting pipeline failed: {0}")]
    Pipeline(String),
}

pub type Result<T> = std::result::Result<T, Error>;
