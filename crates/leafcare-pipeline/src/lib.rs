//! leafcare-pipeline: Pure leaf classification cascade (sans-IO).
//!
//! Classifies a decoded photo through:
//! quality assessment + feature extraction + environment analysis ->
//! rejection gate -> coffee screening (stage 1) -> disease
//! classification (stage 2).
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! pixel grids and returns structured data. The two pretrained models
//! are reached only through [`ClassifierPort`]; serving them (threads,
//! timeouts) lives in `leafcare-worker`, and response shaping lives in
//! `leafcare-response`.

pub mod cascade;
pub mod classifier;
pub mod color;
pub mod contour;
pub mod diagnostics;
pub mod edge;
pub mod environment;
pub mod features;
pub mod gate;
pub mod grayscale;
pub mod lines;
pub mod quality;
pub mod tensor;
pub mod texture;
pub mod thresholds;
pub mod types;

pub use cascade::{
    Analysis, CascadeConfig, CascadeDecision, CascadeOrchestrator, ErrorKind, Outcome, Stage,
    Transition,
};
pub use classifier::{
    ClassifierError, ClassifierPort, ClassifierResult, ClassifierSpec, InferenceError, LabelMap,
    OutputActivation,
};
pub use diagnostics::{CascadeDiagnostics, Clock, NoClock, SystemClock};
pub use environment::{EnvironmentConfig, EnvironmentReport};
pub use features::FeatureConfig;
pub use gate::{GateReason, GateVerdict, RejectionPolicy, RejectionPolicyKind};
pub use quality::{QualityConfig, QualityReport};
pub use tensor::{InputTensor, Normalization, ResizeFilter};
pub use thresholds::{AmbiguityCause, Screening, ScreeningVerdict, Thresholds};
pub use types::{AnalysisConfig, Dimensions, FeatureVector, PipelineError, Point};

/// Run the analysis half of the cascade on a decoded image.
///
/// Returns the same [`Analysis`] the orchestrator computes before its
/// gate, without needing any classifier. Useful for tuning detector
/// parameters.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` fails
/// validation.
pub fn analyze(image: &image::RgbImage, config: &AnalysisConfig) -> Result<Analysis, PipelineError> {
    config.validate()?;
    Ok(Analysis::of(image, config))
}
