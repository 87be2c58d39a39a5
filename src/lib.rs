pub mod counting;
pub mod error;
pub mod fewshot;
pub mod models;

pub use counting::{Mode, ModelInfo, ObjectCounter, ObjectCounterBuilder};
pub use error::{Error, Result};
pub use fewshot::FewShotRegistry;
pub use models::{CountOutcome, ItemType, LearnOutcome, RecognitionOutcome, TileCountOutcome};
