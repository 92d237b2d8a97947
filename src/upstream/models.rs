// Gemini generateContent wire types
//
// Parts are an untagged union; shapes that are neither text nor inline
// data fall into `Other` and can never produce output (fail closed).

use serde::{Deserialize, Serialize};

use crate::relay::envelope::GenerationOutput;

/// A single content part: text, inline binary data, or something this
/// relay does not understand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData", alias = "inline_data")]
        inline_data: InlineData,
    },
    Other(serde_json::Value),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn inline_image(mime_type: impl Into<String>, data_b64: impl Into<String>) -> Self {
        Self::InlineData {
            inline_data: InlineData {
                mime_type: mime_type.into(),
                data: data_b64.into(),
            },
        }
    }
}

/// Base64 payload with its MIME type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
}

impl GenerateContentRequest {
    /// Single-turn user request from ordered parts.
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            contents: vec![Content {
                parts,
                role: Some("user".to_string()),
            }],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
}

/// Upstream error body, `{"error":{"code":…,"message":…,"status":…}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub message: String,
}

/// Scan candidates' parts in order. The first inline part with non-empty
/// data wins as an image; otherwise all text parts are concatenated.
/// Neither present means the response carried nothing usable.
pub fn extract_output(response: &GenerateContentResponse) -> Option<GenerationOutput> {
    let mut text_out = String::new();

    for candidate in &response.candidates {
        let Some(content) = &candidate.content else {
            continue;
        };
        for part in &content.parts {
            match part {
                Part::InlineData { inline_data } if !inline_data.data.is_empty() => {
                    let mime = if inline_data.mime_type.is_empty() {
                        "image/png".to_string()
                    } else {
                        inline_data.mime_type.clone()
                    };
                    return Some(GenerationOutput::Image {
                        mime,
                        data: inline_data.data.clone(),
                    });
                }
                Part::Text { text } => text_out.push_str(text),
                _ => {}
            }
        }
    }

    if text_out.is_empty() {
        None
    } else {
        Some(GenerationOutput::Text { text: text_out })
    }
}
