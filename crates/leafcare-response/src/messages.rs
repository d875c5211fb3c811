//! User-facing strings.
//!
//! Every sentence a response can carry comes from [`Messages`], so a
//! deployment can translate them by loading JSON without touching the
//! mapping logic. Missing keys fall back to the English defaults.

use serde::{Deserialize, Serialize};

/// Table of user-facing strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    /// Label for images the gate rejected.
    pub not_leaf: String,
    /// Label for leaves stage 1 judged not to be coffee.
    pub not_coffee: String,
    /// Label used when the classifier output could not be trusted.
    pub uncertain: String,
    /// Warning attached to an ambiguous coffee screening.
    pub ambiguous: String,
    /// Warning prefix for an invalid classifier output.
    pub inference_problem: String,
    /// Warning attached when coffee screening was skipped.
    pub degraded: String,
    /// Shown when the quality score is low.
    pub low_quality: String,
    /// Lighting issue: large shadowed area.
    pub shadow: String,
    /// Lighting issue: blown-out highlights.
    pub highlight: String,
    /// Advice for any lighting issue.
    pub lighting_recommendation: String,
    /// Advice for a cluttered background.
    pub background_suggestion: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            not_leaf: "Not a leaf".to_string(),
            not_coffee: "Not a coffee leaf".to_string(),
            uncertain: "Uncertain".to_string(),
            ambiguous: "This plant may not be coffee, please check again".to_string(),
            inference_problem: "The classifier returned an unusable result".to_string(),
            degraded: "Coffee screening is unavailable; the label assumes a coffee leaf"
                .to_string(),
            low_quality: "Image quality is low; the result may be less accurate".to_string(),
            shadow: "Strong shadows on the leaf".to_string(),
            highlight: "Overexposed areas on the leaf".to_string(),
            lighting_recommendation: "Retake the photo in even, indirect light".to_string(),
            background_suggestion: "Photograph the leaf against a plain background".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_english_defaults() {
        let m: Messages = serde_json::from_str(r#"{"not_leaf": "Không phải lá cây"}"#).unwrap();
        assert_eq!(m.not_leaf, "Không phải lá cây");
        assert_eq!(m.not_coffee, Messages::default().not_coffee);
    }
}
