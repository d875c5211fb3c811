//! Cascade diagnostics: per-stage timing and the values each stage
//! decided on.
//!
//! Time is read through an injected [`Clock`] so the cascade stays a
//! pure function of its inputs. [`SystemClock`] measures wall time;
//! [`NoClock`] records zero durations and is what
//! [`CascadeOrchestrator::classify`](crate::CascadeOrchestrator::classify)
//! uses.
//!
//! Durations are serialized as fractional seconds (`f64`) because
//! `std::time::Duration` does not implement serde traits.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cascade::{ErrorKind, Stage};
use crate::gate::RejectionPolicyKind;
use crate::thresholds::{CutoffReason, ScreeningVerdict};

/// Source of timestamps for stage timing.
pub trait Clock {
    /// Opaque timestamp.
    type Instant: Copy;

    /// Current timestamp.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: Self::Instant) -> Duration;
}

/// Wall-clock time from [`std::time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: Instant) -> Duration {
        since.elapsed()
    }
}

/// A clock that never advances.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClock;

impl Clock for NoClock {
    type Instant = ();

    fn now(&self) -> Self::Instant {}

    fn elapsed(&self, _since: Self::Instant) -> Duration {
        Duration::ZERO
    }
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| serde::de::Error::custom("duration must be finite and non-negative"))
    }
}

/// Diagnostics collected from one cascade run.
///
/// Stages after the terminal one are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeDiagnostics {
    /// Quality, features, and environment on the shared rasters.
    pub analysis: StageDiagnostics,
    /// Rejection gate.
    pub gate: StageDiagnostics,
    /// Stage-1 classifier and threshold decision.
    pub screening: Option<StageDiagnostics>,
    /// Stage-2 disease classifier.
    pub disease: Option<StageDiagnostics>,
    /// Stage that produced the decision.
    pub terminal: Stage,
    /// Wall-clock duration of the whole run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// What the stage computed.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Pixel analysis.
    Analysis {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
        /// Pixels set in the shared edge map.
        edge_pixel_count: u64,
        /// Multiplicative quality score.
        quality_score: f64,
        /// Whether a usable external contour was found.
        contour_found: bool,
        /// Straight segments on the edge map.
        vein_count: u32,
    },
    /// Rejection gate.
    Gate {
        /// Policy that was applied.
        policy: RejectionPolicyKind,
        /// Resulting leaf score.
        leaf_score: f64,
        /// Whether the image passed.
        is_leaf: bool,
    },
    /// Stage-1 threshold decision.
    Screening {
        /// Probability that the image is not coffee.
        prob_not_coffee: f64,
        /// Cutoff that was applied.
        cutoff: f64,
        /// Why that cutoff was chosen.
        cutoff_reason: CutoffReason,
        /// Verdict.
        verdict: ScreeningVerdict,
    },
    /// Stage-2 classification.
    Disease {
        /// Number of classes.
        class_count: usize,
        /// Winning class index.
        argmax_index: usize,
        /// Winning probability.
        argmax_confidence: f64,
    },
    /// A classifier stage that ended in an error.
    Failed {
        /// Error category.
        kind: ErrorKind,
    },
}

impl CascadeDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Cascade Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Total duration: {:.3}ms  |  Terminal stage: {}",
            duration_ms(self.total_duration),
            self.terminal,
        ));
        lines.push(String::new());
        lines.push(format!(
            "{:<12} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let stages = [
            ("Analysis", Some(&self.analysis)),
            ("Gate", Some(&self.gate)),
            ("Screening", self.screening.as_ref()),
            ("Disease", self.disease.as_ref()),
        ];
        for (name, diag) in stages {
            let Some(diag) = diag else {
                lines.push(format!("{name:<12} {:>10} {:>10}  skipped", "-", "-"));
                continue;
            };
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 { ms / total_ms * 100.0 } else { 0.0 };
            lines.push(format!(
                "{name:<12} {ms:>8.3}ms {pct:>9.1}%  {}",
                format_metrics(&diag.metrics)
            ));
        }

        lines.join("\n")
    }
}

impl fmt::Display for CascadeDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.report())
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Analysis {
            width,
            height,
            edge_pixel_count,
            quality_score,
            contour_found,
            vein_count,
        } => format!(
            "{width}x{height} edges={edge_pixel_count} veins={vein_count} quality={quality_score:.3} contour={contour_found}"
        ),
        StageMetrics::Gate {
            policy,
            leaf_score,
            is_leaf,
        } => format!("{policy} leaf_score={leaf_score:.3} is_leaf={is_leaf}"),
        StageMetrics::Screening {
            prob_not_coffee,
            cutoff,
            cutoff_reason,
            verdict,
        } => format!(
            "p_not_coffee={prob_not_coffee:.4} cutoff={cutoff:.2} ({cutoff_reason:?}) -> {verdict:?}"
        ),
        StageMetrics::Disease {
            class_count,
            argmax_index,
            argmax_confidence,
        } => format!("class {argmax_index}/{class_count} p={argmax_confidence:.4}"),
        StageMetrics::Failed { kind } => format!("failed: {kind}"),
    }
}
