use crate::models::SegmentDetail;

/// A segment after classification and refinement, in rank order.
#[derive(Debug, Clone)]
pub struct LabelledSegment {
    pub rank: usize,
    pub predicted_class: String,
    pub refined_label: String,
}

#[derive(Debug, Clone)]
pub struct Aggregate {
    pub count: usize,
    pub confidence: f32,
    pub details: Vec<SegmentDetail>,
}

/// Count segments whose refined label matches the target exactly and
/// derive a confidence score.
///
/// The heuristic is intentionally simple and is not a calibrated
/// probability: 0.8 base when anything matched (0.5 otherwise), +0.1
/// when more than one segment agrees, +0.1 when some matching
/// segment's raw class is a case-insensitive substring of the target,
/// capped at 1.0.
pub fn aggregate(segments: &[LabelledSegment], target_type: &str) -> Aggregate {
    let count = segments
        .iter()
        .filter(|s| s.refined_label == target_type)
        .count();

    let mut confidence: f32 = if count > 0 { 0.8 } else { 0.5 };
    if count > 0 {
        if count > 1 {
            confidence += 0.1;
        }
        let agreement = segments.iter().any(|s| {
            s.refined_label == target_type
                && target_type
                    .to_lowercase()
                    .contains(&s.predicted_class.to_lowercase())
        });
        if agreement {
            confidence += 0.1;
        }
    }
    let confidence = confidence.min(1.0);

    let details = segments
        .iter()
        .map(|s| SegmentDetail {
            rank: s.rank,
            predicted_class: s.predicted_class.clone(),
            refined_label: s.refined_label.clone(),
            is_target: s.refined_label == target_type,
        })
        .collect();

    Aggregate {
        count,
        confidence,
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(rank: usize, predicted: &str, refined: &str) -> LabelledSegment {
        LabelledSegment {
            rank,
            predicted_class: predicted.to_string(),
            refined_label: refined.to_string(),
        }
    }

    #[test]
    fn test_no_match_is_exactly_half() {
        let segments = vec![segment(0, "tabby", "cat"), segment(1, "oak", "tree")];
        let result = aggregate(&segments, "car");
        assert_eq!(result.count, 0);
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn test_single_match_base_confidence() {
        let segments = vec![segment(0, "sports sedan", "car")];
        let result = aggregate(&segments, "car");
        assert_eq!(result.count, 1);
        assert!((result.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_multi_segment_bonus() {
        let segments = vec![
            segment(0, "sports sedan", "car"),
            segment(1, "pickup truck", "car"),
        ];
        let result = aggregate(&segments, "car");
        assert_eq!(result.count, 2);
        assert!((result.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_agreement_bonus_and_cap() {
        // Raw "car" is a substring of target "car": both bonuses apply,
        // capped at 1.0.
        let segments = vec![segment(0, "Car", "car"), segment(1, "car", "car")];
        let result = aggregate(&segments, "car");
        assert_eq!(result.count, 2);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_agreement_requires_matching_segment() {
        // The raw/refined agreement only counts on segments that
        // actually matched the target.
        let segments = vec![segment(0, "car", "tree"), segment(1, "boat", "car")];
        let result = aggregate(&segments, "car");
        assert_eq!(result.count, 1);
        assert!((result.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_bounds_when_matched() {
        let segments = vec![segment(0, "x", "car")];
        let result = aggregate(&segments, "car");
        assert!(result.confidence >= 0.5 && result.confidence <= 1.0);
    }

    #[test]
    fn test_details_preserve_rank_order() {
        let segments = vec![
            segment(0, "a", "car"),
            segment(1, "b", "cat"),
            segment(2, "c", "car"),
        ];
        let result = aggregate(&segments, "car");
        let ranks: Vec<usize> = result.details.iter().map(|d| d.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert!(result.details[0].is_target);
        assert!(!result.details[1].is_target);
    }
}
