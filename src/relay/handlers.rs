// Relay handlers - /health and /generate
//
// /generate is the whole protocol: validate the multipart input, resolve
// an API key, call upstream once, classify the outcome, and answer with a
// normalized envelope. No retries, no state between requests.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::relay::classifier::{fallback_applies, is_quota_error};
use crate::relay::envelope::{
    ErrorEnvelope, SuccessEnvelope, ERROR_EMPTY_INPUT, ERROR_GENERATION_FAILED, ERROR_NO_API_KEY,
    REASON_FALLBACK_PREFIX, REASON_MISSING_API_KEY,
};
use crate::upstream::models::Part;
use crate::upstream::GeminiClient;

/// Shared application state for Axum handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub upstream: Arc<GeminiClient>,
}

impl AppState {
    pub fn new(config: Arc<RelayConfig>, upstream: Arc<GeminiClient>) -> Self {
        Self { config, upstream }
    }
}

/// GET /health
pub async fn handle_health(State(state): State<AppState>) -> Response {
    Json(json!({
        "ok": true,
        "model": state.config.default_model,
        "allowFallback": state.config.allow_fallback,
    }))
    .into_response()
}

struct UploadedImage {
    mime: String,
    bytes: Vec<u8>,
}

/// API key precedence: `x-api-key` header, then the `apiKey` form field,
/// then the configured default. Blank values do not count.
fn resolve_api_key(headers: &HeaderMap, body_key: &str, config: &RelayConfig) -> Option<String> {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .or_else(|| {
            let trimmed = body_key.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .or_else(|| config.default_api_key.clone())
}

/// POST /generate (multipart: prompt, image, model, apiKey)
pub async fn handle_generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, (StatusCode, String)> {
    let started = Instant::now();

    let mut prompt = String::new();
    let mut model_field = String::new();
    let mut body_api_key = String::new();
    let mut image: Option<UploadedImage> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "prompt" => {
                prompt = field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Prompt read error: {}", e)))?;
            }
            "model" => {
                model_field = field.text().await.unwrap_or_default();
            }
            "apiKey" => {
                body_api_key = field.text().await.unwrap_or_default();
            }
            "image" => {
                let mime = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| "image/png".to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Image read error: {}", e)))?
                    .to_vec();
                image = Some(UploadedImage { mime, bytes });
            }
            _ => {}
        }
    }

    if prompt.is_empty() && image.is_none() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ErrorEnvelope::new(
                ERROR_EMPTY_INPUT,
                "Missing prompt or image.",
                None,
            )),
        )
            .into_response());
    }

    let Some(api_key) = resolve_api_key(&headers, &body_api_key, &state.config) else {
        if state.config.allow_fallback {
            info!("No API key resolvable, serving fallback image");
            return Ok(Json(SuccessEnvelope::mock(
                &state.config.fallback_image_b64,
                REASON_MISSING_API_KEY.to_string(),
                None,
                started.elapsed().as_millis() as u64,
            ))
            .into_response());
        }
        return Ok((
            StatusCode::UNAUTHORIZED,
            Json(ErrorEnvelope::new(
                ERROR_NO_API_KEY,
                "Missing API key (x-api-key header or GEMINI_API_KEY).",
                None,
            )),
        )
            .into_response());
    };

    let model = {
        let trimmed = model_field.trim();
        if trimmed.is_empty() {
            state.config.default_model.clone()
        } else {
            trimmed.to_string()
        }
    };

    let mut parts = Vec::new();
    if !prompt.is_empty() {
        parts.push(Part::text(prompt.clone()));
    }
    if let Some(img) = &image {
        parts.push(Part::inline_image(img.mime.clone(), BASE64.encode(&img.bytes)));
    }

    info!(
        "Generate: model={}, prompt_len={}, has_image={}",
        model,
        prompt.len(),
        image.is_some()
    );

    match state.upstream.generate_content(&api_key, &model, parts).await {
        Ok(output) => Ok(Json(SuccessEnvelope::generated(
            output,
            model,
            started.elapsed().as_millis() as u64,
        ))
        .into_response()),
        Err(err) => {
            let message = err.to_string();
            let status = err.status();
            let is_quota = is_quota_error(status, &message);

            if state.config.allow_fallback && fallback_applies(status, &message) {
                warn!("Generation failed ({}), serving fallback image", message);
                return Ok(Json(SuccessEnvelope::mock(
                    &state.config.fallback_image_b64,
                    format!("{}{}", REASON_FALLBACK_PREFIX, message),
                    Some(model),
                    started.elapsed().as_millis() as u64,
                ))
                .into_response());
            }

            warn!("Generation failed: {}", message);
            let http_status = if is_quota {
                StatusCode::TOO_MANY_REQUESTS
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            Ok((
                http_status,
                Json(ErrorEnvelope::new(
                    ERROR_GENERATION_FAILED,
                    message,
                    Some(model),
                )),
            )
                .into_response())
        }
    }
}
