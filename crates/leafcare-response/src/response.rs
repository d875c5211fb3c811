//! Mapping from a [`CascadeDecision`] to the response contract.
//!
//! The JSON field names are fixed: clients match on `predicted_label`,
//! `confidence` (a `"NN.NN%"` string), and `is_leaf`. Optional fields
//! are omitted rather than sent as `null`.

use leafcare_pipeline::{CascadeDecision, ErrorKind, Outcome};
use serde::{Deserialize, Serialize};

use crate::messages::Messages;

/// Quality score under which the response carries a quality warning.
pub const QUALITY_WARNING_BELOW: f64 = 0.7;

/// A classification (or rejection) response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResponse {
    /// Disease label, or a rejection/uncertain label from [`Messages`].
    pub predicted_label: String,
    /// Confidence formatted as `"NN.NN%"`.
    pub confidence: String,
    /// Whether the gate accepted the image as a leaf.
    pub is_leaf: bool,
    /// Ambiguity, degradation, or inference problem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Background advice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Present only when below [`QUALITY_WARNING_BELOW`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    /// Present with `quality_score`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_warning: Option<String>,
    /// Shadow and/or highlight description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighting_issue: Option<String>,
    /// Present with `lighting_issue`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

/// A structured error. Carries no label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable cause.
    pub error: String,
    /// Error category in `snake_case`.
    pub kind: ErrorKind,
}

impl ErrorResponse {
    /// Whether the caller sent bad input rather than the service
    /// failing.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self.kind, ErrorKind::DecodeError)
    }
}

/// Either response shape; serializes as the inner object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    /// Label and confidence.
    Classification(ClassificationResponse),
    /// Structured error.
    Error(ErrorResponse),
}

/// Errors raised while rendering a response.
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    /// JSON serialization failed.
    #[error("failed to serialize response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Format a percentage the way clients expect: two decimals and `%`.
#[must_use]
pub fn format_confidence(percent: f64) -> String {
    format!("{percent:.2}%")
}

/// Map a decision to its response.
///
/// Inference errors fail closed to an "uncertain" classification; other
/// errors become an [`ErrorResponse`].
#[must_use]
pub fn build_response(decision: &CascadeDecision, messages: &Messages) -> Response {
    let is_leaf = decision.is_leaf();
    match &decision.outcome {
        Outcome::NotLeaf { leaf_score } => Response::Classification(ClassificationResponse::plain(
            messages.not_leaf.clone(),
            (1.0 - leaf_score) * 100.0,
            false,
        )),
        Outcome::NotCoffee { confidence } => Response::Classification(
            ClassificationResponse::plain(messages.not_coffee.clone(), *confidence, is_leaf),
        ),
        Outcome::Disease {
            label,
            confidence,
            warning,
        } => {
            let mut response = ClassificationResponse::plain(label.clone(), *confidence, is_leaf);
            response.warning = if warning.is_some() {
                Some(messages.ambiguous.clone())
            } else if decision.degraded {
                Some(messages.degraded.clone())
            } else {
                None
            };
            response.annotate(decision, messages);
            Response::Classification(response)
        }
        Outcome::Error {
            kind: ErrorKind::InferenceError,
            message,
        } => {
            let mut response = ClassificationResponse::plain(messages.uncertain.clone(), 0.0, is_leaf);
            response.warning = Some(format!("{}: {message}", messages.inference_problem));
            Response::Classification(response)
        }
        Outcome::Error { kind, message } => Response::Error(ErrorResponse {
            error: message.clone(),
            kind: *kind,
        }),
    }
}

/// Map a decision to its response and render it as JSON.
///
/// # Errors
///
/// Returns [`ResponseError::Json`] if serialization fails.
pub fn to_json(decision: &CascadeDecision, messages: &Messages) -> Result<String, ResponseError> {
    Ok(serde_json::to_string(&build_response(decision, messages))?)
}

impl ClassificationResponse {
    fn plain(predicted_label: String, confidence: f64, is_leaf: bool) -> Self {
        Self {
            predicted_label,
            confidence: format_confidence(confidence),
            is_leaf,
            warning: None,
            suggestion: None,
            quality_score: None,
            quality_warning: None,
            lighting_issue: None,
            recommendation: None,
        }
    }

    /// Attach quality, lighting, and background advice.
    fn annotate(&mut self, decision: &CascadeDecision, messages: &Messages) {
        if let Some(quality) = decision.quality()
            && quality.quality_score < QUALITY_WARNING_BELOW
        {
            self.quality_score = Some(quality.quality_score);
            self.quality_warning = Some(messages.low_quality.clone());
        }
        let Some(environment) = decision.environment() else {
            return;
        };
        let issues: Vec<&str> = [
            (environment.has_shadow, messages.shadow.as_str()),
            (environment.has_highlight, messages.highlight.as_str()),
        ]
        .into_iter()
        .filter_map(|(flag, text)| flag.then_some(text))
        .collect();
        if !issues.is_empty() {
            self.lighting_issue = Some(issues.join("; "));
            self.recommendation = Some(messages.lighting_recommendation.clone());
        }
        if environment.complex_background {
            self.suggestion = Some(messages.background_suggestion.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use leafcare_pipeline::{
        AmbiguityCause, Analysis, EnvironmentReport, FeatureVector, GateReason, GateVerdict,
        QualityReport, RejectionPolicyKind, Stage,
    };

    use super::*;

    fn analysis(quality_score: f64, shadow: bool, complex: bool) -> Analysis {
        Analysis {
            quality: QualityReport {
                quality_score,
                is_blurry: quality_score < 1.0,
                brightness_issue: false,
                low_contrast: false,
                sharpness: 50.0,
                brightness: 120.0,
                contrast: 40.0,
            },
            features: FeatureVector {
                green_ratio: 0.5,
                brown_ratio: 0.0,
                avg_saturation: 120.0,
                texture_score: 30.0,
                vein_count: 8,
                solidity: 0.9,
                circularity: 0.5,
                aspect_ratio: 2.0,
                brightness: 0.4,
                contrast: 40.0,
                blur_metric: 50.0,
                no_contour: false,
                contour_area: 100.0,
                contour_perimeter: 40.0,
                channel_std: [30.0, 30.0, 30.0],
            },
            environment: EnvironmentReport {
                shadow_ratio: if shadow { 0.3 } else { 0.0 },
                highlight_ratio: 0.0,
                edge_density: if complex { 0.4 } else { 0.1 },
                has_shadow: shadow,
                has_highlight: false,
                complex_background: complex,
            },
        }
    }

    fn decision(outcome: Outcome, analysis: Analysis) -> CascadeDecision {
        CascadeDecision {
            outcome,
            stage: Stage::Disease,
            analysis: Some(analysis),
            gate: Some(GateVerdict {
                is_leaf: true,
                leaf_score: 0.9,
                policy: RejectionPolicyKind::Weighted,
                reason: GateReason::Accepted,
            }),
            screening: None,
            disease: None,
            degraded: false,
        }
    }

    fn disease(label: &str, confidence: f64, warning: Option<AmbiguityCause>) -> Outcome {
        Outcome::Disease {
            label: label.to_string(),
            confidence,
            warning,
        }
    }

    #[test]
    fn confidence_has_two_decimals() {
        assert_eq!(format_confidence(80.0), "80.00%");
        assert_eq!(format_confidence(12.345_6), "12.35%");
        assert_eq!(format_confidence(0.0), "0.00%");
    }

    #[test]
    fn clean_disease_result_has_no_extras() {
        let d = decision(disease("C", 80.0, None), analysis(1.0, false, false));
        let json = to_json(&d, &Messages::default()).unwrap();
        assert_eq!(
            json,
            r#"{"predicted_label":"C","confidence":"80.00%","is_leaf":true}"#
        );
    }

    #[test]
    fn ambiguous_result_carries_warning() {
        let d = decision(
            disease("C", 20.0, Some(AmbiguityCause::InBand)),
            analysis(1.0, false, false),
        );
        let Response::Classification(r) = build_response(&d, &Messages::default()) else {
            unreachable!("expected a classification");
        };
        assert_eq!(r.confidence, "20.00%");
        assert_eq!(r.warning.as_deref(), Some(Messages::default().ambiguous.as_str()));
    }

    #[test]
    fn advisories_follow_flags() {
        let d = decision(disease("A", 90.0, None), analysis(0.5, true, true));
        let Response::Classification(r) = build_response(&d, &Messages::default()) else {
            unreachable!("expected a classification");
        };
        assert_eq!(r.quality_score, Some(0.5));
        assert!(r.quality_warning.is_some());
        assert_eq!(r.lighting_issue.as_deref(), Some("Strong shadows on the leaf"));
        assert!(r.recommendation.is_some());
        assert!(r.suggestion.is_some());
    }

    #[test]
    fn quality_at_limit_is_not_flagged() {
        let d = decision(disease("A", 90.0, None), analysis(0.7, false, false));
        let Response::Classification(r) = build_response(&d, &Messages::default()) else {
            unreachable!("expected a classification");
        };
        assert!(r.quality_score.is_none());
    }

    #[test]
    fn not_leaf_and_not_coffee_payloads() {
        let mut d = decision(Outcome::NotLeaf { leaf_score: 0.0 }, analysis(1.0, false, false));
        d.gate = Some(GateVerdict {
            is_leaf: false,
            leaf_score: 0.0,
            policy: RejectionPolicyKind::Weighted,
            reason: GateReason::NoContour,
        });
        let json: serde_json::Value =
            serde_json::from_str(&to_json(&d, &Messages::default()).unwrap()).unwrap();
        assert_eq!(json["predicted_label"], "Not a leaf");
        assert_eq!(json["confidence"], "100.00%");
        assert_eq!(json["is_leaf"], false);

        let d = decision(Outcome::NotCoffee { confidence: 92.5 }, analysis(1.0, true, true));
        let json: serde_json::Value =
            serde_json::from_str(&to_json(&d, &Messages::default()).unwrap()).unwrap();
        assert_eq!(json["predicted_label"], "Not a coffee leaf");
        assert_eq!(json["confidence"], "92.50%");
        assert_eq!(json["is_leaf"], true);
        assert!(json.get("suggestion").is_none());
    }

    #[test]
    fn inference_error_fails_closed_to_uncertain() {
        let d = decision(
            Outcome::Error {
                kind: ErrorKind::InferenceError,
                message: "outputs sum to 1.3, not 1".to_string(),
            },
            analysis(1.0, false, false),
        );
        let Response::Classification(r) = build_response(&d, &Messages::default()) else {
            unreachable!("expected a classification");
        };
        assert_eq!(r.predicted_label, "Uncertain");
        assert_eq!(r.confidence, "0.00%");
        assert!(r.warning.unwrap().contains("sum to 1.3"));
    }

    #[test]
    fn other_errors_have_no_label() {
        let d = decision(
            Outcome::Error {
                kind: ErrorKind::ModelUnavailable,
                message: "disease classifier is not loaded".to_string(),
            },
            analysis(1.0, false, false),
        );
        let json: serde_json::Value =
            serde_json::from_str(&to_json(&d, &Messages::default()).unwrap()).unwrap();
        assert_eq!(json["kind"], "model_unavailable");
        assert_eq!(json["error"], "disease classifier is not loaded");
        assert!(json.get("predicted_label").is_none());
        assert!(json.get("confidence").is_none());
    }

    #[test]
    fn decode_error_is_client_error() {
        let r = ErrorResponse {
            error: "bad bytes".to_string(),
            kind: ErrorKind::DecodeError,
        };
        assert!(r.is_client_error());
        assert!(
            !ErrorResponse {
                kind: ErrorKind::InferenceTimeout,
                ..r
            }
            .is_client_error()
        );
    }

    #[test]
    fn degraded_result_is_annotated() {
        let mut d = decision(disease("B", 70.0, None), analysis(1.0, false, false));
        d.degraded = true;
        let Response::Classification(r) = build_response(&d, &Messages::default()) else {
            unreachable!("expected a classification");
        };
        assert_eq!(r.warning.as_deref(), Some(Messages::default().degraded.as_str()));
    }
}
