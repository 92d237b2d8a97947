// Relay response envelope
//
// Wire shapes returned by POST /generate. Field names are part of the
// public contract and stay camelCase (`mockUsed`, `durationMs`).

use serde::{Deserialize, Serialize};

pub const ERROR_EMPTY_INPUT: &str = "EMPTY_INPUT";
pub const ERROR_NO_API_KEY: &str = "NO_API_KEY";
pub const ERROR_GENERATION_FAILED: &str = "GENERATION_FAILED";

pub const REASON_MISSING_API_KEY: &str = "MISSING_API_KEY";
pub const REASON_FALLBACK_PREFIX: &str = "FALLBACK:";

/// Result of a generation call: exactly one of an image or a text block.
///
/// Serialized flattened into the success envelope as
/// `{"type":"image","mime":…,"data":…}` or `{"type":"text","text":…}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GenerationOutput {
    Image { mime: String, data: String },
    Text { text: String },
}

/// Successful envelope, genuine or substituted.
#[derive(Debug, Clone, Serialize)]
pub struct SuccessEnvelope {
    pub success: bool,
    #[serde(flatten)]
    pub output: GenerationOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(rename = "mockUsed", skip_serializing_if = "Option::is_none")]
    pub mock_used: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
}

impl SuccessEnvelope {
    /// Genuine upstream output.
    pub fn generated(output: GenerationOutput, model: String, duration_ms: u64) -> Self {
        Self {
            success: true,
            output,
            model: Some(model),
            mock_used: None,
            reason: None,
            duration_ms,
        }
    }

    /// Substituted placeholder image with the reason it was served.
    pub fn mock(
        fallback_image_b64: &str,
        reason: String,
        model: Option<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: true,
            output: GenerationOutput::Image {
                mime: "image/png".to_string(),
                data: fallback_image_b64.to_string(),
            },
            model,
            mock_used: Some(true),
            reason: Some(reason),
            duration_ms,
        }
    }
}

/// Failure envelope carrying an error code from the fixed taxonomy.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(error: &str, message: impl Into<String>, model: Option<String>) -> Self {
        Self {
            success: false,
            error: error.to_string(),
            message: message.into(),
            model,
        }
    }
}

/// Client-side view of either envelope shape, with every field optional
/// so a reply can be inspected the way a browser client would.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayReply {
    pub success: bool,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub mime: Option<String>,
    pub data: Option<String>,
    pub text: Option<String>,
    pub error: Option<String>,
    pub message: Option<String>,
    #[serde(rename = "mockUsed", default)]
    pub mock_used: bool,
    pub reason: Option<String>,
    pub model: Option<String>,
    #[serde(rename = "durationMs")]
    pub duration_ms: Option<u64>,
}
