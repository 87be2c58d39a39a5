use std::cmp::Ordering;
use tracing::warn;

/// External zero-shot entailment collaborator: scores every candidate
/// label against a premise text, higher meaning stronger entailment.
pub trait EntailmentScorer: Send + Sync {
    fn score(&self, premise: &str, candidates: &[String]) -> anyhow::Result<Vec<f32>>;
}

/// Per-capability refinement strategy, chosen once at startup.
pub trait Refiner: Send + Sync {
    /// Map a raw classification onto the candidate set. A per-segment
    /// scorer failure degrades to `"unknown"` and is logged.
    fn refine(&self, raw_label: &str, candidates: &[String]) -> String;

    fn name(&self) -> &str;
}

/// Strategy backed by a real zero-shot entailment model: returns the
/// top-scoring candidate.
pub struct EntailmentRefiner {
    scorer: Box<dyn EntailmentScorer>,
}

impl EntailmentRefiner {
    pub fn new(scorer: Box<dyn EntailmentScorer>) -> Self {
        Self { scorer }
    }
}

impl Refiner for EntailmentRefiner {
    fn refine(&self, raw_label: &str, candidates: &[String]) -> String {
        match self.scorer.score(raw_label, candidates) {
            Ok(scores) => {
                let best = scores
                    .iter()
                    .take(candidates.len())
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
                    .map(|(idx, _)| candidates[idx].clone());
                match best {
                    Some(label) => label,
                    None => {
                        warn!(raw_label, "entailment scorer returned no scores");
                        "unknown".to_string()
                    }
                }
            }
            Err(err) => {
                warn!(raw_label, error = %err, "label refinement failed");
                "unknown".to_string()
            }
        }
    }

    fn name(&self) -> &str {
        "zero-shot entailment model"
    }
}

/// Degraded-mode strategy: the raw classification passes through
/// unchanged.
pub struct PassthroughRefiner;

impl Refiner for PassthroughRefiner {
    fn refine(&self, raw_label: &str, _candidates: &[String]) -> String {
        raw_label.to_string()
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}
