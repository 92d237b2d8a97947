// Upstream client for the Gemini generateContent API
//
// Wraps reqwest with the relay's timeouts and a fixed wire contract:
// prompt/image parts in, image-or-text out, or a classified error.

use reqwest::{header, Client};
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::relay::envelope::GenerationOutput;
use crate::upstream::models::{
    extract_output, ApiErrorResponse, GenerateContentRequest, Part,
};

const DEFAULT_USER_AGENT: &str = "image-relay/0.1";

const GENERATIVE_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Upstream call failure. `NoOutput` doubles as the internal signal for a
/// well-formed response with nothing usable in it.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("NO_OUTPUT")]
    NoOutput,
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl UpstreamError {
    /// Upstream HTTP status, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::NoOutput => None,
        }
    }
}

pub struct GeminiClient {
    client: Client,
    base_url: String,
}

impl GeminiClient {
    /// Build a client against the public Generative Language API, or
    /// against `base_url` when given (used to point tests at a stub).
    pub fn new(base_url: Option<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(Duration::from_secs(300))
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| GENERATIVE_API_BASE_URL.to_string()),
        })
    }

    fn build_url(base_url: &str, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", base_url, model, method)
    }

    /// Call `models/{model}:generateContent` and interpret the reply.
    ///
    /// The API key travels only in the request header; it is never logged.
    pub async fn generate_content(
        &self,
        api_key: &str,
        model: &str,
        parts: Vec<Part>,
    ) -> Result<GenerationOutput, UpstreamError> {
        let url = Self::build_url(&self.base_url, model, "generateContent");
        let body = GenerateContentRequest::user(parts);

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let raw = response
                .text()
                .await
                .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));
            let message = match serde_json::from_str::<ApiErrorResponse>(&raw) {
                Ok(parsed) => parsed.error.message,
                Err(_) => raw,
            };
            warn!("Upstream {} returned {} for {}", self.base_url, status, model);
            return Err(UpstreamError::Api {
                status: status.as_u16(),
                message,
            });
        }

        // Fail closed: a body this relay cannot read yields NO_OUTPUT,
        // not a transport error.
        let parsed = response
            .json()
            .await
            .map_err(|e| {
                debug!("Unreadable upstream response: {}", e);
                UpstreamError::NoOutput
            })?;

        extract_output(&parsed).ok_or(UpstreamError::NoOutput)
    }
}
