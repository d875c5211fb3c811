//! Boundary to the external pretrained classifiers.
//!
//! [`ClassifierPort`] is the only way the cascade reaches a model. Raw
//! outputs are never trusted: [`ClassifierResult::from_output`] checks
//! shape, finiteness, range, and normalization before anything reads
//! an argmax.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tensor::{InputTensor, Normalization, ResizeFilter};
use crate::types::PipelineError;

/// Errors reported by a classifier implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifierError {
    /// The model is not loaded or cannot be reached.
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    /// The model ran and failed.
    #[error("classifier failed: {0}")]
    Failed(String),

    /// The call did not finish within the allowed time.
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),

    /// The call was refused because the job queue is full.
    #[error("classifier queue is full")]
    Overloaded,
}

/// A pretrained classifier reachable through a fixed prediction call.
///
/// Implementations must not retry internally.
pub trait ClassifierPort: Send + Sync {
    /// Run the model on one input and return its raw output vector.
    ///
    /// # Errors
    ///
    /// Returns a [`ClassifierError`] when no output could be produced.
    fn predict(&self, input: &InputTensor) -> Result<Vec<f32>, ClassifierError>;

    /// Class names in output order, if the model artifact declares them.
    fn labels(&self) -> Option<Vec<String>> {
        None
    }
}

/// How raw model outputs map to class probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputActivation {
    /// Outputs are already a probability distribution.
    #[default]
    Softmax,
    /// A single output `p` is read as `[p, 1 - p]`.
    Sigmoid,
}

impl OutputActivation {
    /// Expand raw outputs into a probability vector.
    #[must_use]
    pub fn expand(self, raw: Vec<f32>) -> Vec<f32> {
        if let (Self::Sigmoid, &[p]) = (self, raw.as_slice()) {
            return vec![p, 1.0 - p];
        }
        raw
    }
}

/// Input preparation and output interpretation for one classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSpec {
    /// Pixel normalization the model was trained with.
    pub normalization: Normalization,
    /// How to read the output vector.
    pub activation: OutputActivation,
    /// Resampling filter for the resize to the input size.
    pub resize_filter: ResizeFilter,
}

impl ClassifierSpec {
    /// Coffee/not-coffee screen: unit-range input, two outputs.
    pub const STAGE1: Self = Self {
        normalization: Normalization::UnitRange,
        activation: OutputActivation::Softmax,
        resize_filter: ResizeFilter::Triangle,
    };

    /// Disease classifier: caffe-style mean subtraction.
    pub const STAGE2: Self = Self {
        normalization: Normalization::CAFFE,
        activation: OutputActivation::Softmax,
        resize_filter: ResizeFilter::Triangle,
    };
}

/// Ways a classifier output can be malformed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    /// The output vector was empty.
    #[error("classifier returned an empty output")]
    Empty,

    /// The output length does not match the class count.
    #[error("expected {expected} outputs, got {actual}")]
    ShapeMismatch {
        /// Configured class count.
        expected: usize,
        /// Returned output length.
        actual: usize,
    },

    /// An output was NaN or infinite.
    #[error("output {index} is not finite")]
    NonFinite {
        /// Offending position.
        index: usize,
    },

    /// An output lies outside `[0, 1]`.
    #[error("output {index} is outside [0, 1]: {value}")]
    OutOfRange {
        /// Offending position.
        index: usize,
        /// Offending value.
        value: f32,
    },

    /// Outputs do not sum to 1 within tolerance.
    #[error("outputs sum to {sum}, not 1")]
    NotNormalized {
        /// Actual sum.
        sum: f64,
    },
}

/// A validated probability vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierResult {
    /// Class probabilities in model output order.
    pub probabilities: Vec<f64>,
    /// Index of the largest probability (first on ties).
    pub argmax_index: usize,
    /// The largest probability.
    pub argmax_confidence: f64,
}

impl ClassifierResult {
    /// Default tolerance on the probability sum.
    pub const DEFAULT_SUM_TOLERANCE: f64 = 1e-3;

    /// Validate a raw output vector.
    ///
    /// # Errors
    ///
    /// Returns the first [`InferenceError`] found, checking in order:
    /// emptiness, length, finiteness, range, then the sum.
    pub fn from_output(
        output: &[f32],
        expected_len: usize,
        sum_tolerance: f64,
    ) -> Result<Self, InferenceError> {
        if output.is_empty() {
            return Err(InferenceError::Empty);
        }
        if output.len() != expected_len {
            return Err(InferenceError::ShapeMismatch {
                expected: expected_len,
                actual: output.len(),
            });
        }
        if let Some(index) = output.iter().position(|v| !v.is_finite()) {
            return Err(InferenceError::NonFinite { index });
        }
        if let Some((index, &value)) = output
            .iter()
            .enumerate()
            .find(|(_, v)| !(0.0..=1.0).contains(*v))
        {
            return Err(InferenceError::OutOfRange { index, value });
        }

        let probabilities: Vec<f64> = output.iter().map(|&v| f64::from(v)).collect();
        let sum: f64 = probabilities.iter().sum();
        if (sum - 1.0).abs() > sum_tolerance {
            return Err(InferenceError::NotNormalized { sum });
        }

        let (argmax_index, argmax_confidence) = probabilities.iter().copied().enumerate().fold(
            (0, f64::NEG_INFINITY),
            |best, (i, p)| if p > best.1 { (i, p) } else { best },
        );
        Ok(Self {
            probabilities,
            argmax_index,
            argmax_confidence,
        })
    }
}

/// Ordered class names for the disease classifier.
///
/// Loaded from the training artifact's class-index mapping
/// (`{"label": index, ...}`); indices must cover `0..n` exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, usize>", into = "BTreeMap<String, usize>")]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    /// Build from labels already in output order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DeploymentConfig`] for an empty list or
    /// duplicate names.
    pub fn new(labels: Vec<String>) -> Result<Self, PipelineError> {
        if labels.is_empty() {
            return Err(PipelineError::DeploymentConfig(
                "label map is empty".to_string(),
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        if let Some(dup) = labels.iter().find(|l| !seen.insert(l.as_str())) {
            return Err(PipelineError::DeploymentConfig(format!(
                "label {dup:?} appears more than once"
            )));
        }
        Ok(Self { labels })
    }

    /// Label at an output index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always `false` for a constructed map.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels in output order.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Fail unless `declared` lists exactly these labels in this order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DeploymentConfig`] describing the first
    /// difference.
    pub fn check_matches(&self, declared: &[String]) -> Result<(), PipelineError> {
        if declared.len() != self.labels.len() {
            return Err(PipelineError::DeploymentConfig(format!(
                "label map has {} classes but the classifier declares {}",
                self.labels.len(),
                declared.len()
            )));
        }
        if let Some((i, (ours, theirs))) = self
            .labels
            .iter()
            .zip(declared)
            .enumerate()
            .find(|(_, (a, b))| a != b)
        {
            return Err(PipelineError::DeploymentConfig(format!(
                "class {i} is {ours:?} in the label map but {theirs:?} in the classifier"
            )));
        }
        Ok(())
    }
}

impl TryFrom<BTreeMap<String, usize>> for LabelMap {
    type Error = PipelineError;

    fn try_from(map: BTreeMap<String, usize>) -> Result<Self, Self::Error> {
        let n = map.len();
        let mut slots: Vec<Option<String>> = vec![None; n];
        for (label, index) in map {
            let Some(slot) = slots.get_mut(index) else {
                return Err(PipelineError::DeploymentConfig(format!(
                    "class index {index} for {label:?} is out of range for {n} classes"
                )));
            };
            if let Some(existing) = slot.as_ref() {
                return Err(PipelineError::DeploymentConfig(format!(
                    "class index {index} is assigned to both {existing:?} and {label:?}"
                )));
            }
            *slot = Some(label);
        }
        // n distinct in-range indices fill every slot.
        Self::new(slots.into_iter().flatten().collect())
    }
}

impl From<LabelMap> for BTreeMap<String, usize> {
    fn from(map: LabelMap) -> Self {
        map.labels
            .into_iter()
            .enumerate()
            .map(|(i, l)| (l, i))
            .collect()
    }
}
