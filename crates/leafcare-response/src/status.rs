//! Service introspection payload.

use leafcare_pipeline::{CascadeOrchestrator, RejectionPolicyKind};
use serde::{Deserialize, Serialize};

/// Which classifiers are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStatus {
    /// Stage-1 coffee/not-coffee classifier.
    pub coffee_vs_not_coffee: bool,
    /// Stage-2 disease classifier.
    pub disease_classification: bool,
}

/// Which analysis features are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureStatus {
    /// Quality assessment adjusts the stage-1 cutoff.
    pub quality_detection: bool,
    /// Lighting and background advisories.
    pub environmental_analysis: bool,
    /// The weighted leaf score gate (the binary gate is the legacy rule
    /// set).
    pub advanced_leaf_features: bool,
}

/// The `/status` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    /// Always `"running"` while the cascade can be built.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Loaded classifiers.
    pub models: ModelStatus,
    /// Active features.
    pub features: FeatureStatus,
    /// Disease labels in classifier output order.
    pub disease_classes: Vec<String>,
}

/// Describe a running cascade.
#[must_use]
pub fn status(cascade: &CascadeOrchestrator, version: &str) -> StatusPayload {
    StatusPayload {
        status: "running".to_string(),
        version: version.to_string(),
        models: ModelStatus {
            coffee_vs_not_coffee: cascade.has_stage1(),
            disease_classification: cascade.has_stage2(),
        },
        features: FeatureStatus {
            quality_detection: true,
            environmental_analysis: true,
            advanced_leaf_features: cascade.config().analysis.rejection_policy
                == RejectionPolicyKind::Weighted,
        },
        disease_classes: cascade.labels().labels().to_vec(),
    }
}
