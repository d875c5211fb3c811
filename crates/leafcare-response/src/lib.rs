//! leafcare-response: Pure response serializers (sans-IO)
//!
//! Maps a [`CascadeDecision`](leafcare_pipeline::CascadeDecision) to the
//! JSON response contract and describes a running cascade for status
//! endpoints. No HTTP: callers own transport.

pub mod messages;
pub mod response;
pub mod status;

pub use messages::Messages;
pub use response::{
    ClassificationResponse, ErrorResponse, Response, ResponseError, build_response,
    format_confidence, to_json,
};
pub use status::{FeatureStatus, ModelStatus, StatusPayload, status};
