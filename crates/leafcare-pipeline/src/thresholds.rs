//! Adaptive stage-1 thresholds and the coffee/not-coffee screening rule.
//!
//! [`Thresholds`] is an immutable value passed into every call. The
//! cutoff for rejecting an image as "not coffee" tightens when image
//! quality is poor or the background is cluttered, since both make the
//! binary classifier's probability less trustworthy.

use serde::{Deserialize, Serialize};

use crate::types::{PipelineError, ensure_range};

/// Decision thresholds for the cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Cutoff on `prob_not_coffee` for a good-quality image.
    pub base_not_coffee: f64,
    /// Quality score below which the raised cutoff applies.
    pub quality_penalty_threshold: f64,
    /// Cutoff used for low-quality images.
    pub raised_threshold: f64,
    /// Cutoff used when the background is complex (takes precedence).
    pub complex_bg_threshold: f64,
    /// Exclusive lower edge of the ambiguous band.
    pub ambiguous_low: f64,
    /// Inclusive upper edge of the ambiguous band.
    pub ambiguous_high: f64,
    /// Weighted leaf score below which the gate rejects.
    pub leaf_score_reject: f64,
    /// Leaf score at or above which a likely-not-coffee image is kept.
    pub leaf_score_keep: f64,
}

impl Thresholds {
    /// Default base cutoff.
    pub const DEFAULT_BASE_NOT_COFFEE: f64 = 0.85;
    /// Default quality penalty threshold.
    pub const DEFAULT_QUALITY_PENALTY_THRESHOLD: f64 = 0.7;
    /// Default raised cutoff.
    pub const DEFAULT_RAISED_THRESHOLD: f64 = 0.90;
    /// Default complex-background cutoff.
    pub const DEFAULT_COMPLEX_BG_THRESHOLD: f64 = 0.88;

    /// Check every value is a probability and the band is ordered.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first bad
    /// field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (name, value) in [
            ("base_not_coffee", self.base_not_coffee),
            ("quality_penalty_threshold", self.quality_penalty_threshold),
            ("raised_threshold", self.raised_threshold),
            ("complex_bg_threshold", self.complex_bg_threshold),
            ("ambiguous_low", self.ambiguous_low),
            ("ambiguous_high", self.ambiguous_high),
            ("leaf_score_reject", self.leaf_score_reject),
            ("leaf_score_keep", self.leaf_score_keep),
        ] {
            ensure_range(&format!("thresholds.{name}"), value, 0.0, 1.0)?;
        }
        ensure_range(
            "thresholds.ambiguous_high",
            self.ambiguous_high,
            self.ambiguous_low,
            1.0,
        )
    }

    /// Cutoff to apply for an image of the given quality and background.
    #[must_use]
    pub fn effective_cutoff(&self, quality_score: f64, complex_background: bool) -> CutoffChoice {
        if complex_background {
            CutoffChoice {
                value: self.complex_bg_threshold,
                reason: CutoffReason::ComplexBackground,
            }
        } else if quality_score < self.quality_penalty_threshold {
            CutoffChoice {
                value: self.raised_threshold,
                reason: CutoffReason::LowQuality,
            }
        } else {
            CutoffChoice {
                value: self.base_not_coffee,
                reason: CutoffReason::Base,
            }
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            base_not_coffee: Self::DEFAULT_BASE_NOT_COFFEE,
            quality_penalty_threshold: Self::DEFAULT_QUALITY_PENALTY_THRESHOLD,
            raised_threshold: Self::DEFAULT_RAISED_THRESHOLD,
            complex_bg_threshold: Self::DEFAULT_COMPLEX_BG_THRESHOLD,
            ambiguous_low: 0.75,
            ambiguous_high: 0.85,
            leaf_score_reject: 0.3,
            leaf_score_keep: 0.6,
        }
    }
}

/// Which rule picked the stage-1 cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CutoffReason {
    /// Good quality, plain background.
    Base,
    /// Quality score under the penalty threshold.
    LowQuality,
    /// Environment analysis flagged a complex background.
    ComplexBackground,
}

/// The stage-1 cutoff and why it was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CutoffChoice {
    /// Cutoff on `prob_not_coffee`.
    pub value: f64,
    /// Rule that selected it.
    pub reason: CutoffReason,
}

/// Why a stage-1 result is ambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmbiguityCause {
    /// `prob_not_coffee` fell inside the ambiguous band.
    InBand,
    /// `prob_not_coffee` exceeded the cutoff but the leaf score kept
    /// the image.
    KeptByLeafScore,
}

/// Outcome of stage-1 screening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreeningVerdict {
    /// Terminal: the image is not a coffee leaf.
    NotCoffee,
    /// Proceed to disease classification with its own confidence.
    Coffee,
    /// Proceed to disease classification with a hedged confidence.
    Ambiguous(AmbiguityCause),
}

/// Record of the stage-1 decision, kept on the final decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Screening {
    /// Probability that the image is not a coffee leaf.
    pub prob_not_coffee: f64,
    /// Cutoff that was applied.
    pub cutoff: CutoffChoice,
    /// `0.7·(1 − prob_not_coffee) + 0.3·leaf_score`.
    pub combined_score: f64,
    /// Resulting verdict.
    pub verdict: ScreeningVerdict,
}

impl Screening {
    /// Reported confidence (percent) when the verdict is ambiguous.
    #[must_use]
    pub fn hedged_confidence(&self) -> f64 {
        (1.0 - self.prob_not_coffee) * 100.0
    }
}

/// Apply the stage-1 screening rule.
///
/// Rejects as not-coffee only when `prob_not_coffee` exceeds the
/// effective cutoff and the leaf score is below `leaf_score_keep`.
#[must_use]
pub fn screen(
    prob_not_coffee: f64,
    quality_score: f64,
    leaf_score: f64,
    complex_background: bool,
    thresholds: &Thresholds,
) -> Screening {
    let cutoff = thresholds.effective_cutoff(quality_score, complex_background);
    let combined_score = 0.7f64.mul_add(1.0 - prob_not_coffee, 0.3 * leaf_score);
    let over_cutoff = prob_not_coffee > cutoff.value;
    let in_band =
        prob_not_coffee > thresholds.ambiguous_low && prob_not_coffee <= thresholds.ambiguous_high;

    let verdict = if over_cutoff && leaf_score < thresholds.leaf_score_keep {
        ScreeningVerdict::NotCoffee
    } else if over_cutoff {
        ScreeningVerdict::Ambiguous(AmbiguityCause::KeptByLeafScore)
    } else if in_band {
        ScreeningVerdict::Ambiguous(AmbiguityCause::InBand)
    } else {
        ScreeningVerdict::Coffee
    };

    log::debug!(
        "screening: p_not_coffee={prob_not_coffee:.4} cutoff={:.2} ({:?}) combined={combined_score:.3} -> {verdict:?}",
        cutoff.value,
        cutoff.reason,
    );

    Screening {
        prob_not_coffee,
        cutoff,
        combined_score,
        verdict,
    }
}
