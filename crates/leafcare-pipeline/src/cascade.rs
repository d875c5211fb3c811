//! The classification cascade: analysis, rejection gate, coffee
//! screening, disease classification.
//!
//! [`CascadeOrchestrator`] owns the injected classifier handles and the
//! analysis configuration; everything request-specific (the image and
//! the [`Thresholds`]) is passed per call. A run can be driven in one
//! call with [`classify`](CascadeOrchestrator::classify) or stage by
//! stage:
//!
//! ```rust
//! # use leafcare_pipeline::{CascadeConfig, CascadeOrchestrator, LabelMap, Thresholds, Transition};
//! # fn run(image: &image::RgbImage) -> Result<(), leafcare_pipeline::PipelineError> {
//! let labels = LabelMap::new(vec!["healthy".into(), "rust".into()])?;
//! let cascade = CascadeOrchestrator::new(None, None, labels, CascadeConfig::default())?;
//! let thresholds = Thresholds::default();
//!
//! let analyzed = cascade.begin(image, &thresholds).analyze();
//! println!("quality {:.2}", analyzed.analysis().quality.quality_score);
//! let decision = match analyzed.gate() {
//!     Transition::Terminal(decision) => decision,
//!     Transition::Next(gated) => match gated.screen() {
//!         Transition::Terminal(decision) => decision,
//!         Transition::Next(screened) => screened.diagnose(),
//!     },
//! };
//! # let _ = decision;
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self`. Stages that can end the run return
//! a [`Transition`]: either the next stage or the terminal
//! [`CascadeDecision`].

use std::fmt;
use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::classifier::{ClassifierError, ClassifierPort, ClassifierResult, ClassifierSpec, LabelMap};
use crate::diagnostics::{CascadeDiagnostics, Clock, NoClock, StageDiagnostics, StageMetrics};
use crate::edge::{canny, count_edge_pixels};
use crate::environment::{self, EnvironmentReport};
use crate::gate::{GateVerdict, RejectionPolicy};
use crate::grayscale::{decode, to_gray};
use crate::quality::{QualityReport, assess};
use crate::tensor::InputTensor;
use crate::thresholds::{AmbiguityCause, Screening, ScreeningVerdict, Thresholds, screen};
use crate::types::{AnalysisConfig, FeatureVector, PipelineError, ensure_range};

/// Number of outputs of the coffee/not-coffee classifier.
const STAGE1_CLASSES: usize = 2;

/// Everything the orchestrator needs besides the classifier handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Pixel analysis and gate configuration.
    pub analysis: AnalysisConfig,
    /// Coffee/not-coffee classifier preprocessing.
    pub stage1: ClassifierSpec,
    /// Disease classifier preprocessing.
    pub stage2: ClassifierSpec,
    /// Skip stage 1 when its classifier is missing instead of failing.
    pub allow_degraded: bool,
    /// Allowed distance of a probability sum from 1.
    pub sum_tolerance: f64,
}

impl CascadeConfig {
    /// Check the nested configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first
    /// offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.analysis.validate()?;
        ensure_range("sum_tolerance", self.sum_tolerance, 0.0, 1.0)
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            analysis: AnalysisConfig::default(),
            stage1: ClassifierSpec::STAGE1,
            stage2: ClassifierSpec::STAGE2,
            allow_degraded: false,
            sum_tolerance: ClassifierResult::DEFAULT_SUM_TOLERANCE,
        }
    }
}

/// Category of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The input bytes are not a decodable image.
    DecodeError,
    /// A required classifier handle is absent or unreachable.
    ModelUnavailable,
    /// A classifier failed or returned a malformed vector.
    InferenceError,
    /// A classifier call exceeded its time bound.
    InferenceTimeout,
    /// The inference queue refused the call.
    Overloaded,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DecodeError => "decode_error",
            Self::ModelUnavailable => "model_unavailable",
            Self::InferenceError => "inference_error",
            Self::InferenceTimeout => "inference_timeout",
            Self::Overloaded => "overloaded",
        })
    }
}

impl From<&ClassifierError> for ErrorKind {
    fn from(err: &ClassifierError) -> Self {
        match err {
            ClassifierError::Unavailable(_) => Self::ModelUnavailable,
            ClassifierError::Failed(_) => Self::InferenceError,
            ClassifierError::Timeout(_) => Self::InferenceTimeout,
            ClassifierError::Overloaded => Self::Overloaded,
        }
    }
}

/// Stage at which a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Before analysis: the input could not be decoded.
    Decode,
    /// The rejection gate.
    Gate,
    /// The coffee/not-coffee classifier and threshold decision.
    Screening,
    /// The disease classifier.
    Disease,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Decode => "decode",
            Self::Gate => "gate",
            Self::Screening => "screening",
            Self::Disease => "disease",
        })
    }
}

/// The terminal result of a run.
///
/// Confidences are percentages in `[0, 100]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    /// The gate rejected the image.
    NotLeaf {
        /// Leaf score reported by the gate.
        leaf_score: f64,
    },
    /// Stage 1 judged the leaf not to be coffee.
    NotCoffee {
        /// `prob_not_coffee × 100`.
        confidence: f64,
    },
    /// A disease label from stage 2.
    Disease {
        /// Class name from the label map.
        label: String,
        /// Stage-2 confidence, or the hedged stage-1 confidence when
        /// `warning` is set.
        confidence: f64,
        /// Set when stage 1 was not confident the leaf is coffee.
        warning: Option<AmbiguityCause>,
    },
    /// The run could not produce a classification.
    Error {
        /// Error category.
        kind: ErrorKind,
        /// Human-readable cause.
        message: String,
    },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotLeaf { leaf_score } => write!(f, "not a leaf (leaf_score={leaf_score:.3})"),
            Self::NotCoffee { confidence } => write!(f, "not coffee ({confidence:.2}%)"),
            Self::Disease {
                label,
                confidence,
                warning,
            } => {
                write!(f, "{label} ({confidence:.2}%)")?;
                if let Some(cause) = warning {
                    write!(f, " [ambiguous: {cause:?}]")?;
                }
                Ok(())
            }
            Self::Error { kind, message } => write!(f, "{kind}: {message}"),
        }
    }
}

/// Pixel analysis shared by every later stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Sharpness, brightness, and contrast.
    pub quality: QualityReport,
    /// Heuristic features for the gate.
    pub features: FeatureVector,
    /// Lighting and background advisories.
    pub environment: EnvironmentReport,
}

impl Analysis {
    /// Compute quality, features, and environment from one grayscale
    /// conversion and one shared edge map.
    #[must_use = "returns the analysis"]
    pub fn of(image: &RgbImage, config: &AnalysisConfig) -> Self {
        Self::with_edge_count(image, config).0
    }

    fn with_edge_count(image: &RgbImage, config: &AnalysisConfig) -> (Self, u64) {
        let gray = to_gray(image);
        let edges = canny(&gray, &config.features.edges);
        let analysis = Self {
            quality: assess(&gray, &config.quality),
            features: crate::features::extract(image, &gray, &edges, &config.features),
            environment: environment::analyze(image, &edges, &config.environment),
        };
        (analysis, count_edge_pixels(&edges))
    }
}

/// Immutable record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeDecision {
    /// What the cascade concluded.
    pub outcome: Outcome,
    /// Stage that produced the outcome.
    pub stage: Stage,
    /// Pixel analysis; `None` only when decoding failed.
    pub analysis: Option<Analysis>,
    /// Gate verdict; `None` only when decoding failed.
    pub gate: Option<GateVerdict>,
    /// Stage-1 record, when stage 1 produced a probability.
    pub screening: Option<Screening>,
    /// Stage-2 output, when stage 2 produced a valid vector.
    pub disease: Option<ClassifierResult>,
    /// Stage 1 was skipped because its classifier is missing.
    pub degraded: bool,
}

impl CascadeDecision {
    /// Decision for input bytes that could not be decoded.
    #[must_use]
    pub fn decode_failure(err: &PipelineError) -> Self {
        let decision = Self {
            outcome: Outcome::Error {
                kind: ErrorKind::DecodeError,
                message: err.to_string(),
            },
            stage: Stage::Decode,
            analysis: None,
            gate: None,
            screening: None,
            disease: None,
            degraded: false,
        };
        log::warn!("cascade: {}", decision.outcome);
        decision
    }

    /// Gate leaf score, if the gate ran.
    #[must_use]
    pub fn leaf_score(&self) -> Option<f64> {
        self.gate.map(|g| g.leaf_score)
    }

    /// Whether the gate accepted the image.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.gate.is_some_and(|g| g.is_leaf)
    }

    /// Quality report, if analysis ran.
    #[must_use]
    pub fn quality(&self) -> Option<&QualityReport> {
        self.analysis.as_ref().map(|a| &a.quality)
    }

    /// Environment report, if analysis ran.
    #[must_use]
    pub fn environment(&self) -> Option<&EnvironmentReport> {
        self.analysis.as_ref().map(|a| &a.environment)
    }

    /// Error category, for error outcomes.
    #[must_use]
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        match self.outcome {
            Outcome::Error { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

/// Result of a stage that can end the run.
#[must_use = "a transition is either the next stage or the final decision"]
#[derive(Debug)]
pub enum Transition<T> {
    /// The run continues with this stage.
    Next(T),
    /// The run ended.
    Terminal(CascadeDecision),
}

/// Runs the cascade against injected classifiers.
///
/// Holds no per-request state; share it behind an `Arc` to serve
/// requests in parallel.
pub struct CascadeOrchestrator {
    stage1: Option<Arc<dyn ClassifierPort>>,
    stage2: Option<Arc<dyn ClassifierPort>>,
    labels: LabelMap,
    config: CascadeConfig,
}

impl fmt::Debug for CascadeOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CascadeOrchestrator")
            .field("stage1", &self.stage1.is_some())
            .field("stage2", &self.stage2.is_some())
            .field("labels", &self.labels)
            .field("config", &self.config)
            .finish()
    }
}

impl CascadeOrchestrator {
    /// Build an orchestrator from classifier handles and a label map.
    ///
    /// Either handle may be absent; runs that need it end in
    /// [`ErrorKind::ModelUnavailable`] (or skip stage 1 in degraded
    /// mode).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `config` fails
    /// validation, or [`PipelineError::DeploymentConfig`] if the stage-2
    /// classifier declares labels that differ from `labels`.
    pub fn new(
        stage1: Option<Arc<dyn ClassifierPort>>,
        stage2: Option<Arc<dyn ClassifierPort>>,
        labels: LabelMap,
        config: CascadeConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        if let Some(declared) = stage2.as_ref().and_then(|port| port.labels()) {
            labels.check_matches(&declared)?;
        }
        log::info!(
            "cascade ready: stage1={} stage2={} classes={} policy={} degraded_allowed={}",
            stage1.is_some(),
            stage2.is_some(),
            labels.len(),
            config.analysis.rejection_policy,
            config.allow_degraded,
        );
        Ok(Self {
            stage1,
            stage2,
            labels,
            config,
        })
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &CascadeConfig {
        &self.config
    }

    /// Disease labels in output order.
    #[must_use]
    pub const fn labels(&self) -> &LabelMap {
        &self.labels
    }

    /// Whether a stage-1 classifier is configured.
    #[must_use]
    pub const fn has_stage1(&self) -> bool {
        self.stage1.is_some()
    }

    /// Whether a stage-2 classifier is configured.
    #[must_use]
    pub const fn has_stage2(&self) -> bool {
        self.stage2.is_some()
    }

    /// Start a stage-by-stage run.
    pub const fn begin<'a>(&'a self, image: &'a RgbImage, thresholds: &'a Thresholds) -> Started<'a> {
        Started {
            run: Run {
                cascade: self,
                image,
                thresholds,
            },
        }
    }

    /// Classify a decoded image.
    #[must_use = "returns the cascade decision"]
    pub fn classify(&self, image: &RgbImage, thresholds: &Thresholds) -> CascadeDecision {
        self.classify_with_diagnostics(image, thresholds, &NoClock).0
    }

    /// Decode raw bytes, then classify.
    ///
    /// Decode failures become an [`ErrorKind::DecodeError`] decision.
    #[must_use = "returns the cascade decision"]
    pub fn classify_bytes(&self, bytes: &[u8], thresholds: &Thresholds) -> CascadeDecision {
        match decode(bytes) {
            Ok(image) => self.classify(&image, thresholds),
            Err(err) => CascadeDecision::decode_failure(&err),
        }
    }

    /// Classify a decoded image, timing each stage with `clock`.
    pub fn classify_with_diagnostics<C: Clock>(
        &self,
        image: &RgbImage,
        thresholds: &Thresholds,
        clock: &C,
    ) -> (CascadeDecision, CascadeDiagnostics) {
        let start = clock.now();

        let t = clock.now();
        let analyzed = self.begin(image, thresholds).analyze();
        let analysis = StageDiagnostics {
            duration: clock.elapsed(t),
            metrics: analyzed.metrics(),
        };

        let t = clock.now();
        let gated = analyzed.gate();
        let gate = StageDiagnostics {
            duration: clock.elapsed(t),
            metrics: match &gated {
                Transition::Next(g) => gate_metrics(g.verdict),
                Transition::Terminal(d) => StageMetrics::Gate {
                    policy: self.config.analysis.rejection_policy,
                    leaf_score: d.leaf_score().unwrap_or(0.0),
                    is_leaf: false,
                },
            },
        };
        let mut diagnostics = CascadeDiagnostics {
            analysis,
            gate,
            screening: None,
            disease: None,
            terminal: Stage::Gate,
            total_duration: std::time::Duration::ZERO,
        };
        let gated = match gated {
            Transition::Next(g) => g,
            Transition::Terminal(decision) => {
                return finish(decision, diagnostics, clock, start);
            }
        };

        let t = clock.now();
        let screened = gated.screen();
        let metrics = match &screened {
            Transition::Next(s) => s.screening.as_ref().map(screening_metrics),
            Transition::Terminal(d) => {
                failure_metrics(d).or_else(|| d.screening.as_ref().map(screening_metrics))
            }
        };
        diagnostics.screening = metrics.map(|metrics| StageDiagnostics {
            duration: clock.elapsed(t),
            metrics,
        });
        let screened = match screened {
            Transition::Next(s) => s,
            Transition::Terminal(decision) => {
                return finish(decision, diagnostics, clock, start);
            }
        };

        let t = clock.now();
        let decision = screened.diagnose();
        let metrics = failure_metrics(&decision).or_else(|| {
            decision.disease.as_ref().map(|r| StageMetrics::Disease {
                class_count: r.probabilities.len(),
                argmax_index: r.argmax_index,
                argmax_confidence: r.argmax_confidence,
            })
        });
        diagnostics.disease = metrics.map(|metrics| StageDiagnostics {
            duration: clock.elapsed(t),
            metrics,
        });
        finish(decision, diagnostics, clock, start)
    }
}

fn finish<C: Clock>(
    decision: CascadeDecision,
    mut diagnostics: CascadeDiagnostics,
    clock: &C,
    start: C::Instant,
) -> (CascadeDecision, CascadeDiagnostics) {
    diagnostics.terminal = decision.stage;
    diagnostics.total_duration = clock.elapsed(start);
    (decision, diagnostics)
}

const fn gate_metrics(verdict: GateVerdict) -> StageMetrics {
    StageMetrics::Gate {
        policy: verdict.policy,
        leaf_score: verdict.leaf_score,
        is_leaf: verdict.is_leaf,
    }
}

const fn screening_metrics(screening: &Screening) -> StageMetrics {
    StageMetrics::Screening {
        prob_not_coffee: screening.prob_not_coffee,
        cutoff: screening.cutoff.value,
        cutoff_reason: screening.cutoff.reason,
        verdict: screening.verdict,
    }
}

fn failure_metrics(decision: &CascadeDecision) -> Option<StageMetrics> {
    decision.error_kind().map(|kind| StageMetrics::Failed { kind })
}

/// Request-scoped inputs carried through every stage.
#[derive(Clone, Copy)]
struct Run<'a> {
    cascade: &'a CascadeOrchestrator,
    image: &'a RgbImage,
    thresholds: &'a Thresholds,
}

impl Run<'_> {
    /// Call a classifier and validate its output.
    fn infer(
        &self,
        port: &dyn ClassifierPort,
        spec: &ClassifierSpec,
        expected_len: usize,
    ) -> Result<ClassifierResult, (ErrorKind, String)> {
        let tensor = InputTensor::from_image(self.image, spec.normalization, spec.resize_filter);
        let raw = port
            .predict(&tensor)
            .map_err(|err| (ErrorKind::from(&err), err.to_string()))?;
        ClassifierResult::from_output(
            &spec.activation.expand(raw),
            expected_len,
            self.cascade.config.sum_tolerance,
        )
        .map_err(|err| (ErrorKind::InferenceError, err.to_string()))
    }
}

/// Annotations accumulated as the run advances.
struct Trail {
    analysis: Analysis,
    gate: GateVerdict,
    screening: Option<Screening>,
    degraded: bool,
}

impl Trail {
    fn conclude(
        self,
        stage: Stage,
        outcome: Outcome,
        disease: Option<ClassifierResult>,
    ) -> CascadeDecision {
        if matches!(outcome, Outcome::Error { .. }) {
            log::warn!("cascade: terminal at {stage}: {outcome}");
        } else {
            log::info!("cascade: terminal at {stage}: {outcome}");
        }
        CascadeDecision {
            outcome,
            stage,
            analysis: Some(self.analysis),
            gate: Some(self.gate),
            screening: self.screening,
            disease,
            degraded: self.degraded,
        }
    }

    fn fail(self, stage: Stage, (kind, message): (ErrorKind, String)) -> CascadeDecision {
        self.conclude(stage, Outcome::Error { kind, message }, None)
    }
}

// ───────────────────────── Stage 0: Started ──────────────────────────

/// A run before any pixel has been read.
#[must_use = "cascade stages are consumed by advancing; call .analyze() to continue"]
pub struct Started<'a> {
    run: Run<'a>,
}

impl<'a> Started<'a> {
    /// Read the pixels: quality, features, and environment.
    pub fn analyze(self) -> Analyzed<'a> {
        let (analysis, edge_pixel_count) =
            Analysis::with_edge_count(self.run.image, &self.run.cascade.config.analysis);
        let f = &analysis.features;
        log::debug!(
            "features: green={:.3} brown={:.3} sat={:.1} texture={:.2} veins={} solidity={:.3} circularity={:.3} aspect={:.2} no_contour={}",
            f.green_ratio,
            f.brown_ratio,
            f.avg_saturation,
            f.texture_score,
            f.vein_count,
            f.solidity,
            f.circularity,
            f.aspect_ratio,
            f.no_contour,
        );
        Analyzed {
            run: self.run,
            edge_pixel_count,
            analysis,
        }
    }
}

// ───────────────────────── Stage 1: Analyzed ─────────────────────────

/// A run after pixel analysis.
#[must_use = "cascade stages are consumed by advancing; call .gate() to continue"]
pub struct Analyzed<'a> {
    run: Run<'a>,
    edge_pixel_count: u64,
    analysis: Analysis,
}

impl<'a> Analyzed<'a> {
    /// Quality, features, and environment.
    #[must_use]
    pub const fn analysis(&self) -> &Analysis {
        &self.analysis
    }

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Analysis {
            width: self.run.image.width(),
            height: self.run.image.height(),
            edge_pixel_count: self.edge_pixel_count,
            quality_score: self.analysis.quality.quality_score,
            contour_found: !self.analysis.features.no_contour,
            vein_count: self.analysis.features.vein_count,
        }
    }

    /// Apply the configured rejection policy.
    pub fn gate(self) -> Transition<Gated<'a>> {
        let policy = self.run.cascade.config.analysis.rejection_policy;
        let verdict = policy.evaluate(&self.analysis.features, self.run.thresholds);
        let trail = Trail {
            analysis: self.analysis,
            gate: verdict,
            screening: None,
            degraded: false,
        };
        if verdict.is_leaf {
            Transition::Next(Gated {
                run: self.run,
                verdict,
                trail,
            })
        } else {
            Transition::Terminal(trail.conclude(
                Stage::Gate,
                Outcome::NotLeaf {
                    leaf_score: verdict.leaf_score,
                },
                None,
            ))
        }
    }
}

// ───────────────────────── Stage 2: Gated ────────────────────────────

/// A run whose image passed the rejection gate.
#[must_use = "cascade stages are consumed by advancing; call .screen() to continue"]
pub struct Gated<'a> {
    run: Run<'a>,
    verdict: GateVerdict,
    trail: Trail,
}

impl<'a> Gated<'a> {
    /// The gate verdict.
    #[must_use]
    pub const fn verdict(&self) -> &GateVerdict {
        &self.verdict
    }

    /// Run the coffee/not-coffee classifier and apply the adaptive
    /// cutoff.
    pub fn screen(mut self) -> Transition<Screened<'a>> {
        let cascade = self.run.cascade;
        let Some(port) = cascade.stage1.as_deref() else {
            if cascade.config.allow_degraded {
                log::warn!("stage-1 classifier missing; skipping coffee screening");
                self.trail.degraded = true;
                return Transition::Next(Screened {
                    run: self.run,
                    screening: None,
                    trail: self.trail,
                });
            }
            return Transition::Terminal(self.trail.fail(
                Stage::Screening,
                (
                    ErrorKind::ModelUnavailable,
                    "coffee screening classifier is not loaded".to_string(),
                ),
            ));
        };

        let result = match self
            .run
            .infer(port, &cascade.config.stage1, STAGE1_CLASSES)
        {
            Ok(result) => result,
            Err(failure) => {
                return Transition::Terminal(self.trail.fail(Stage::Screening, failure));
            }
        };

        let prob_not_coffee = result.probabilities[0];
        let screening = screen(
            prob_not_coffee,
            self.trail.analysis.quality.quality_score,
            self.verdict.leaf_score,
            self.trail.analysis.environment.complex_background,
            self.run.thresholds,
        );
        self.trail.screening = Some(screening);

        if screening.verdict == ScreeningVerdict::NotCoffee {
            return Transition::Terminal(self.trail.conclude(
                Stage::Screening,
                Outcome::NotCoffee {
                    confidence: prob_not_coffee * 100.0,
                },
                None,
            ));
        }
        Transition::Next(Screened {
            run: self.run,
            screening: Some(screening),
            trail: self.trail,
        })
    }
}

// ───────────────────────── Stage 3: Screened ─────────────────────────

/// A run cleared for disease classification.
#[must_use = "cascade stages are consumed by advancing; call .diagnose() to finish"]
pub struct Screened<'a> {
    run: Run<'a>,
    screening: Option<Screening>,
    trail: Trail,
}

impl Screened<'_> {
    /// The stage-1 record; `None` when stage 1 was skipped.
    #[must_use]
    pub const fn screening(&self) -> Option<&Screening> {
        self.screening.as_ref()
    }

    /// Run the disease classifier and produce the final decision.
    #[must_use = "returns the cascade decision"]
    pub fn diagnose(self) -> CascadeDecision {
        let cascade = self.run.cascade;
        let Some(port) = cascade.stage2.as_deref() else {
            return self.trail.fail(
                Stage::Disease,
                (
                    ErrorKind::ModelUnavailable,
                    "disease classifier is not loaded".to_string(),
                ),
            );
        };

        let result = match self
            .run
            .infer(port, &cascade.config.stage2, cascade.labels.len())
        {
            Ok(result) => result,
            Err(failure) => return self.trail.fail(Stage::Disease, failure),
        };
        let Some(label) = cascade.labels.get(result.argmax_index) else {
            return self.trail.fail(
                Stage::Disease,
                (
                    ErrorKind::InferenceError,
                    format!("class index {} has no label", result.argmax_index),
                ),
            );
        };

        let (confidence, warning) = match self.screening.map(|s| (s, s.verdict)) {
            Some((s, ScreeningVerdict::Ambiguous(cause))) => (s.hedged_confidence(), Some(cause)),
            _ => (result.argmax_confidence * 100.0, None),
        };
        let outcome = Outcome::Disease {
            label: label.to_string(),
            confidence,
            warning,
        };
        self.trail.conclude(Stage::Disease, outcome, Some(result))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::Rgb;

    use super::*;
    use crate::diagnostics::SystemClock;
    use crate::gate::RejectionPolicyKind;

    /// Returns a fixed output and counts calls.
    struct Scripted {
        output: Result<Vec<f32>, ClassifierError>,
        labels: Option<Vec<String>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn ok(output: &[f32]) -> Arc<Self> {
            Arc::new(Self {
                output: Ok(output.to_vec()),
                labels: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn err(err: ClassifierError) -> Arc<Self> {
            Arc::new(Self {
                output: Err(err),
                labels: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ClassifierPort for Scripted {
        fn predict(&self, input: &InputTensor) -> Result<Vec<f32>, ClassifierError> {
            assert_eq!(input.as_slice().len(), InputTensor::LEN);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.output.clone()
        }

        fn labels(&self) -> Option<Vec<String>> {
            self.labels.clone()
        }
    }

    fn labels() -> LabelMap {
        LabelMap::new(["A", "B", "C", "D", "E"].map(String::from).to_vec()).unwrap()
    }

    fn green_ellipse() -> RgbImage {
        RgbImage::from_fn(200, 120, |x, y| {
            let dx = (f64::from(x) - 100.0) / 70.0;
            let dy = (f64::from(y) - 60.0) / 35.0;
            if dx * dx + dy * dy <= 1.0 {
                Rgb([60, 180, 50])
            } else {
                Rgb([10, 40, 10])
            }
        })
    }

    fn cascade(
        stage1: Option<Arc<Scripted>>,
        stage2: Option<Arc<Scripted>>,
        config: CascadeConfig,
    ) -> CascadeOrchestrator {
        CascadeOrchestrator::new(
            stage1.map(|p| p as Arc<dyn ClassifierPort>),
            stage2.map(|p| p as Arc<dyn ClassifierPort>),
            labels(),
            config,
        )
        .unwrap()
    }

    const DISEASE_C: [f32; 5] = [0.05, 0.05, 0.8, 0.05, 0.05];

    #[test]
    fn black_image_stops_at_gate() {
        let s1 = Scripted::ok(&[0.1, 0.9]);
        let c = cascade(Some(s1.clone()), None, CascadeConfig::default());
        let d = c.classify(&RgbImage::new(64, 64), &Thresholds::default());
        assert_eq!(d.stage, Stage::Gate);
        assert!(matches!(d.outcome, Outcome::NotLeaf { leaf_score } if leaf_score < 0.3));
        assert!(!d.is_leaf());
        assert_eq!(s1.calls(), 0);
    }

    #[test]
    fn coffee_leaf_gets_disease_label() {
        let s1 = Scripted::ok(&[0.1, 0.9]);
        let s2 = Scripted::ok(&DISEASE_C);
        let c = cascade(Some(s1), Some(s2), CascadeConfig::default());
        let d = c.classify(&green_ellipse(), &Thresholds::default());
        match &d.outcome {
            Outcome::Disease {
                label,
                confidence,
                warning,
            } => {
                assert_eq!(label, "C");
                assert!((confidence - 80.0).abs() < 1e-4);
                assert!(warning.is_none());
            }
            other => unreachable!("unexpected outcome {other:?}"),
        }
        assert!(d.is_leaf());
        assert_eq!(d.disease.as_ref().unwrap().argmax_index, 2);
    }

    fn binary_config() -> CascadeConfig {
        CascadeConfig {
            analysis: AnalysisConfig {
                rejection_policy: RejectionPolicyKind::Binary,
                ..AnalysisConfig::default()
            },
            ..CascadeConfig::default()
        }
    }

    #[test]
    fn confident_not_coffee_stops_before_stage2() {
        // The binary policy reports a 0.5 leaf score, under the 0.6 keep bar.
        let s1 = Scripted::ok(&[0.99, 0.01]);
        let s2 = Scripted::ok(&DISEASE_C);
        let c = cascade(Some(s1), Some(s2.clone()), binary_config());
        let d = c.classify(&green_ellipse(), &Thresholds::default());
        assert_eq!(d.stage, Stage::Screening);
        assert!(
            matches!(d.outcome, Outcome::NotCoffee { confidence } if (confidence - 99.0).abs() < 1e-3)
        );
        assert!(d.is_leaf());
        assert_eq!(s2.calls(), 0);
    }

    #[test]
    fn stage1_index_zero_is_not_coffee() {
        let thresholds = Thresholds::default();
        let screen = |output: &[f32]| {
            cascade(Some(Scripted::ok(output)), Some(Scripted::ok(&DISEASE_C)), binary_config())
                .classify(&green_ellipse(), &thresholds)
        };

        let rejected = screen(&[0.95, 0.05]);
        assert!(matches!(rejected.outcome, Outcome::NotCoffee { .. }));
        assert!((rejected.screening.unwrap().prob_not_coffee - 0.95).abs() < 1e-6);

        let accepted = screen(&[0.05, 0.95]);
        assert_eq!(accepted.stage, Stage::Disease);
        assert!((accepted.screening.unwrap().prob_not_coffee - 0.05).abs() < 1e-6);
    }

    #[test]
    fn high_leaf_score_overrides_not_coffee() {
        let s1 = Scripted::ok(&[0.99, 0.01]);
        let c = cascade(Some(s1), Some(Scripted::ok(&DISEASE_C)), binary_config());
        let lenient = Thresholds {
            leaf_score_keep: 0.5,
            ..Thresholds::default()
        };
        let d = c.classify(&green_ellipse(), &lenient);
        assert!(matches!(
            d.outcome,
            Outcome::Disease {
                warning: Some(AmbiguityCause::KeptByLeafScore),
                ..
            }
        ));
    }

    #[test]
    fn ambiguous_band_hedges_confidence() {
        let s1 = Scripted::ok(&[0.8, 0.2]);
        let s2 = Scripted::ok(&DISEASE_C);
        let c = cascade(Some(s1), Some(s2), CascadeConfig::default());
        let d = c.classify(&green_ellipse(), &Thresholds::default());
        match d.outcome {
            Outcome::Disease {
                confidence,
                warning,
                ..
            } => {
                assert!((confidence - 20.0).abs() < 1e-3);
                assert_eq!(warning, Some(AmbiguityCause::InBand));
            }
            other => unreachable!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn missing_stage1_is_model_unavailable() {
        let s2 = Scripted::ok(&DISEASE_C);
        let c = cascade(None, Some(s2.clone()), CascadeConfig::default());
        let d = c.classify(&green_ellipse(), &Thresholds::default());
        assert_eq!(d.error_kind(), Some(ErrorKind::ModelUnavailable));
        assert!(d.disease.is_none());
        assert_eq!(s2.calls(), 0);
    }

    #[test]
    fn degraded_mode_skips_stage1() {
        let s2 = Scripted::ok(&DISEASE_C);
        let config = CascadeConfig {
            allow_degraded: true,
            ..CascadeConfig::default()
        };
        let c = cascade(None, Some(s2), config);
        let d = c.classify(&green_ellipse(), &Thresholds::default());
        assert!(d.degraded);
        assert!(d.screening.is_none());
        assert!(matches!(d.outcome, Outcome::Disease { ref label, .. } if label == "C"));
    }

    #[test]
    fn classifier_errors_map_to_kinds() {
        for (err, kind) in [
            (
                ClassifierError::Timeout(std::time::Duration::from_millis(5)),
                ErrorKind::InferenceTimeout,
            ),
            (ClassifierError::Overloaded, ErrorKind::Overloaded),
            (ClassifierError::Failed("boom".into()), ErrorKind::InferenceError),
            (
                ClassifierError::Unavailable("gone".into()),
                ErrorKind::ModelUnavailable,
            ),
        ] {
            let c = cascade(Some(Scripted::err(err)), None, CascadeConfig::default());
            let d = c.classify(&green_ellipse(), &Thresholds::default());
            assert_eq!(d.error_kind(), Some(kind));
            assert_eq!(d.stage, Stage::Screening);
        }
    }

    #[test]
    fn malformed_output_is_inference_error() {
        for bad in [vec![0.5, 0.6], vec![f32::NAN, 0.5], vec![1.0]] {
            let s1 = Scripted::ok(&bad);
            let c = cascade(Some(s1), None, CascadeConfig::default());
            let d = c.classify(&green_ellipse(), &Thresholds::default());
            assert_eq!(d.error_kind(), Some(ErrorKind::InferenceError), "{bad:?}");
        }
        let s2 = Scripted::ok(&[0.5, 0.5]);
        let c = cascade(Some(Scripted::ok(&[0.1, 0.9])), Some(s2), CascadeConfig::default());
        let d = c.classify(&green_ellipse(), &Thresholds::default());
        assert_eq!(d.error_kind(), Some(ErrorKind::InferenceError));
        assert_eq!(d.stage, Stage::Disease);
    }

    #[test]
    fn mismatched_declared_labels_are_rejected() {
        let s2 = Arc::new(Scripted {
            output: Ok(DISEASE_C.to_vec()),
            labels: Some(["A", "B", "D", "C", "E"].map(String::from).to_vec()),
            calls: AtomicUsize::new(0),
        });
        let stage2: Arc<dyn ClassifierPort> = s2;
        let err = CascadeOrchestrator::new(None, Some(stage2), labels(), CascadeConfig::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::DeploymentConfig(_)), "{err}");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = CascadeConfig {
            sum_tolerance: -1.0,
            ..CascadeConfig::default()
        };
        assert!(CascadeOrchestrator::new(None, None, labels(), config).is_err());
    }

    #[test]
    fn undecodable_bytes_are_decode_errors() {
        let c = cascade(None, None, CascadeConfig::default());
        let d = c.classify_bytes(b"not an image", &Thresholds::default());
        assert_eq!(d.error_kind(), Some(ErrorKind::DecodeError));
        assert_eq!(d.stage, Stage::Decode);
        assert!(d.analysis.is_none());
        let d = c.classify_bytes(&[], &Thresholds::default());
        assert_eq!(d.error_kind(), Some(ErrorKind::DecodeError));
    }

    #[test]
    fn diagnostics_follow_the_run() {
        let c = cascade(
            Some(Scripted::ok(&[0.1, 0.9])),
            Some(Scripted::ok(&DISEASE_C)),
            CascadeConfig::default(),
        );
        let (d, diag) = c.classify_with_diagnostics(&green_ellipse(), &Thresholds::default(), &SystemClock);
        assert_eq!(diag.terminal, d.stage);
        assert!(diag.screening.is_some());
        assert!(matches!(
            diag.disease.as_ref().unwrap().metrics,
            StageMetrics::Disease { argmax_index: 2, .. }
        ));

        let (_, diag) = c.classify_with_diagnostics(&RgbImage::new(32, 32), &Thresholds::default(), &SystemClock);
        assert_eq!(diag.terminal, Stage::Gate);
        assert!(diag.screening.is_none() && diag.disease.is_none());
    }

    #[test]
    fn stepwise_run_matches_classify() {
        let c = cascade(
            Some(Scripted::ok(&[0.1, 0.9])),
            Some(Scripted::ok(&DISEASE_C)),
            CascadeConfig::default(),
        );
        let img = green_ellipse();
        let thresholds = Thresholds::default();
        let stepwise = match c.begin(&img, &thresholds).analyze().gate() {
            Transition::Terminal(d) => d,
            Transition::Next(g) => match g.screen() {
                Transition::Terminal(d) => d,
                Transition::Next(s) => s.diagnose(),
            },
        };
        assert_eq!(stepwise, c.classify(&img, &thresholds));
    }

    #[test]
    fn binary_policy_is_applied() {
        let c = cascade(None, None, binary_config());
        let d = c.classify(&green_ellipse(), &Thresholds::default());
        assert_eq!(d.gate.unwrap().policy, RejectionPolicyKind::Binary);
        assert!((d.leaf_score().unwrap() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InferenceTimeout).unwrap();
        assert_eq!(json, "\"inference_timeout\"");
        assert_eq!(ErrorKind::ModelUnavailable.to_string(), "model_unavailable");
    }
}
