//! Leaf rejection gate: feature vector in, leaf/not-leaf verdict out.
//!
//! # Strategy pattern
//!
//! [`RejectionPolicy`] is the single interface; [`RejectionPolicyKind`]
//! selects a concrete rule set from configuration. The weighted score
//! degrades gracefully on unusual photos and is the default. The binary
//! rule set is stricter and reports only a neutral prior as its score.

use serde::{Deserialize, Serialize};

use crate::thresholds::Thresholds;
use crate::types::FeatureVector;

/// Selects which rejection policy the gate applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RejectionPolicyKind {
    /// Additive evidence score starting from a neutral prior.
    #[default]
    Weighted,
    /// Hard rule set that rejects only flat, non-foliage images.
    Binary,
}

impl std::fmt::Display for RejectionPolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Weighted => write!(f, "weighted"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Why the gate decided the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateReason {
    /// The image passed the gate.
    Accepted,
    /// No usable external contour was found.
    NoContour,
    /// The weighted score fell below `leaf_score_reject`.
    LowLeafScore,
    /// No foliage color, no leaf-like outline, and flat or extreme
    /// exposure.
    NonFoliage,
}

/// Outcome of the rejection gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    /// `true` when the image may proceed to the classifiers.
    pub is_leaf: bool,
    /// Heuristic leaf confidence in `[0, 1]`.
    pub leaf_score: f64,
    /// Policy that produced the verdict.
    pub policy: RejectionPolicyKind,
    /// Deciding rule.
    pub reason: GateReason,
}

/// A rule set that decides whether features describe a leaf.
pub trait RejectionPolicy {
    /// Evaluate the features under the given thresholds.
    fn evaluate(&self, features: &FeatureVector, thresholds: &Thresholds) -> GateVerdict;
}

impl RejectionPolicy for RejectionPolicyKind {
    fn evaluate(&self, features: &FeatureVector, thresholds: &Thresholds) -> GateVerdict {
        let verdict = match *self {
            Self::Weighted => weighted(features, thresholds),
            Self::Binary => binary(features),
        };
        log::debug!(
            "gate[{self}]: is_leaf={} leaf_score={:.3} reason={:?}",
            verdict.is_leaf,
            verdict.leaf_score,
            verdict.reason,
        );
        verdict
    }
}

/// Neutral prior for both policies.
const PRIOR: f64 = 0.5;

/// Weighted evidence score.
///
/// Each satisfied cue adds a fixed bonus to the prior; the sum is
/// clamped to `[0, 1]`. A missing contour zeroes the score.
#[must_use]
pub fn leaf_score(f: &FeatureVector) -> f64 {
    if f.no_contour {
        return 0.0;
    }
    let cues = [
        (f.green_ratio > 0.3 || f.brown_ratio > 0.2, 0.15),
        (f.avg_saturation > 50.0, 0.15),
        (f.texture_score > 10.0 && f.texture_score < 100.0, 0.2),
        (f.vein_count > 5 && f.vein_count < 50, 0.2),
        (f.solidity > 0.8 && f.solidity < 0.98, 0.1),
        (f.circularity > 0.2 && f.circularity < 0.8, 0.1),
        (f.aspect_ratio > 1.3 && f.aspect_ratio < 3.5, 0.1),
    ];
    let score = cues
        .iter()
        .filter(|(hit, _)| *hit)
        .fold(PRIOR, |acc, (_, bonus)| acc + bonus);
    score.clamp(0.0, 1.0)
}

fn weighted(f: &FeatureVector, thresholds: &Thresholds) -> GateVerdict {
    let score = leaf_score(f);
    let (is_leaf, reason) = if f.no_contour {
        (false, GateReason::NoContour)
    } else if score < thresholds.leaf_score_reject {
        (false, GateReason::LowLeafScore)
    } else {
        (true, GateReason::Accepted)
    };
    GateVerdict {
        is_leaf,
        leaf_score: score,
        policy: RejectionPolicyKind::Weighted,
        reason,
    }
}

/// Whether the contour looks like an elongated, compact leaf outline.
fn leaf_like_outline(f: &FeatureVector) -> bool {
    let elongated = (1.5..=3.0).contains(&f.aspect_ratio);
    let compact = f.contour_area > 0.0
        && f.contour_perimeter * f.contour_perimeter / f.contour_area < 20.0;
    elongated && compact
}

fn binary(f: &FeatureVector) -> GateVerdict {
    let lacks_foliage_color = f.green_ratio < 0.2 && f.brown_ratio < 0.1;
    let extreme_exposure = f.brightness < 0.03 || f.brightness > 0.97;
    let flat = f.channel_std.iter().all(|&s| s < 15.0);

    let reason = if f.no_contour {
        GateReason::NoContour
    } else if lacks_foliage_color && !leaf_like_outline(f) && (extreme_exposure || flat) {
        GateReason::NonFoliage
    } else {
        GateReason::Accepted
    };
    let is_leaf = reason == GateReason::Accepted;
    GateVerdict {
        is_leaf,
        leaf_score: if is_leaf { PRIOR } else { 0.0 },
        policy: RejectionPolicyKind::Binary,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Features of a plausible leaf photo.
    fn leafy() -> FeatureVector {
        FeatureVector {
            green_ratio: 0.6,
            brown_ratio: 0.05,
            avg_saturation: 120.0,
            texture_score: 40.0,
            vein_count: 12,
            solidity: 0.9,
            circularity: 0.5,
            aspect_ratio: 2.0,
            brightness: 0.45,
            contrast: 50.0,
            blur_metric: 400.0,
            no_contour: false,
            contour_area: 5000.0,
            contour_perimeter: 300.0,
            channel_std: [40.0, 45.0, 30.0],
        }
    }

    /// Features of a flat, colorless frame with a stray contour.
    fn flat_gray() -> FeatureVector {
        FeatureVector {
            green_ratio: 0.0,
            brown_ratio: 0.0,
            avg_saturation: 0.0,
            texture_score: 255.0,
            vein_count: 0,
            solidity: 0.2,
            circularity: 0.05,
            aspect_ratio: 8.0,
            brightness: 0.99,
            contrast: 2.0,
            blur_metric: 3.0,
            no_contour: false,
            contour_area: 10.0,
            contour_perimeter: 60.0,
            channel_std: [2.0, 2.0, 2.0],
        }
    }

    fn no_contour() -> FeatureVector {
        FeatureVector {
            solidity: 0.0,
            circularity: 0.0,
            aspect_ratio: 0.0,
            contour_area: 0.0,
            contour_perimeter: 0.0,
            no_contour: true,
            ..flat_gray()
        }
    }

    #[test]
    fn default_policy_is_weighted() {
        assert_eq!(RejectionPolicyKind::default(), RejectionPolicyKind::Weighted);
    }

    #[test]
    fn weighted_full_score_clamps_to_one() {
        let v = RejectionPolicyKind::Weighted.evaluate(&leafy(), &Thresholds::default());
        assert!(v.is_leaf);
        assert!((v.leaf_score - 1.0).abs() < f64::EPSILON);
        assert_eq!(v.reason, GateReason::Accepted);
    }

    #[test]
    fn weighted_prior_alone_passes() {
        let v = RejectionPolicyKind::Weighted.evaluate(&flat_gray(), &Thresholds::default());
        assert!((v.leaf_score - 0.5).abs() < f64::EPSILON);
        assert!(v.is_leaf);
    }

    #[test]
    fn weighted_individual_bonuses() {
        let mut f = flat_gray();
        f.avg_saturation = 60.0;
        assert!((leaf_score(&f) - 0.65).abs() < 1e-12);
        f.vein_count = 6;
        assert!((leaf_score(&f) - 0.85).abs() < 1e-12);
        f.vein_count = 50;
        assert!((leaf_score(&f) - 0.65).abs() < 1e-12);
    }

    #[test]
    fn weighted_reject_threshold_is_configurable() {
        let thresholds = Thresholds {
            leaf_score_reject: 0.6,
            ..Thresholds::default()
        };
        let v = RejectionPolicyKind::Weighted.evaluate(&flat_gray(), &thresholds);
        assert!(!v.is_leaf);
        assert_eq!(v.reason, GateReason::LowLeafScore);
    }

    #[test]
    fn missing_contour_rejects_under_both_policies() {
        for kind in [RejectionPolicyKind::Weighted, RejectionPolicyKind::Binary] {
            let v = kind.evaluate(&no_contour(), &Thresholds::default());
            assert!(!v.is_leaf, "{kind}");
            assert!(v.leaf_score < 0.3);
            assert_eq!(v.reason, GateReason::NoContour);
        }
    }

    #[test]
    fn binary_rejects_flat_colorless_frame() {
        let v = RejectionPolicyKind::Binary.evaluate(&flat_gray(), &Thresholds::default());
        assert!(!v.is_leaf);
        assert_eq!(v.reason, GateReason::NonFoliage);
        assert!(v.leaf_score.abs() < f64::EPSILON);
    }

    #[test]
    fn binary_keeps_green_images() {
        let mut f = flat_gray();
        f.green_ratio = 0.25;
        let v = RejectionPolicyKind::Binary.evaluate(&f, &Thresholds::default());
        assert!(v.is_leaf);
        assert!((v.leaf_score - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn binary_keeps_leaf_like_outline() {
        let mut f = flat_gray();
        f.aspect_ratio = 2.0;
        f.contour_area = 1000.0;
        f.contour_perimeter = 130.0;
        assert!(RejectionPolicyKind::Binary.evaluate(&f, &Thresholds::default()).is_leaf);
    }

    #[test]
    fn binary_keeps_textured_mid_exposure() {
        let mut f = flat_gray();
        f.brightness = 0.5;
        f.channel_std = [20.0, 5.0, 5.0];
        assert!(RejectionPolicyKind::Binary.evaluate(&f, &Thresholds::default()).is_leaf);
    }

    #[test]
    fn kind_deserializes_by_name() {
        let kind: RejectionPolicyKind = serde_json::from_str("\"Binary\"").unwrap_or_default();
        assert_eq!(kind, RejectionPolicyKind::Binary);
    }
}
