// Relay client session
//
// One in-flight request at a time, validated locally before any network
// traffic, bounded by a timeout that is reported distinctly from other
// failures. Per request the session moves idle → submitting → outcome →
// idle; there are no partial results and no automatic retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::multipart;
use tracing::{info, warn};

use crate::client::key_store::KeyStore;
use crate::client::render::{render_reply, Rendered};
use crate::relay::envelope::RelayReply;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_FILE_MB: usize = 10;

/// Local rejection, raised before any network call is made.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a request is already in flight")]
    Busy,
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("file {name} exceeds the {limit_mb} MB limit")]
    FileTooLarge { name: String, limit_mb: usize },
    #[error("file {name} is not an image ({mime})")]
    NotAnImage { name: String, mime: String },
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Submitting,
}

/// Terminal outcome of one submission.
#[derive(Debug)]
pub enum SubmitOutcome {
    Success(Rendered),
    Error { code: String, message: String },
    Timeout,
}

/// A file selected for upload, with its declared MIME type.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Clears the busy flag on every exit path.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct RelaySession {
    http: reqwest::Client,
    base_url: String,
    key_store: Box<dyn KeyStore>,
    busy: AtomicBool,
    max_file_mb: usize,
}

impl RelaySession {
    pub fn new(
        base_url: impl Into<String>,
        key_store: Box<dyn KeyStore>,
    ) -> Result<Self, reqwest::Error> {
        Self::with_timeout(base_url, key_store, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        key_store: Box<dyn KeyStore>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            key_store,
            busy: AtomicBool::new(false),
            max_file_mb: DEFAULT_MAX_FILE_MB,
        })
    }

    pub fn with_max_file_mb(mut self, max_file_mb: usize) -> Self {
        self.max_file_mb = max_file_mb;
        self
    }

    pub fn state(&self) -> SessionState {
        if self.busy.load(Ordering::SeqCst) {
            SessionState::Submitting
        } else {
            SessionState::Idle
        }
    }

    /// Persist a key. Blank input leaves the stored key untouched.
    pub fn remember_key(&mut self, value: &str) {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return;
        }
        if let Err(e) = self.key_store.set(trimmed) {
            warn!("Failed to persist API key: {}", e);
        }
    }

    pub fn stored_key(&self) -> Option<String> {
        self.key_store.get()
    }

    fn validate(&self, prompt: &str, image: Option<&ImageUpload>) -> Result<(), SessionError> {
        if prompt.trim().is_empty() {
            return Err(SessionError::EmptyPrompt);
        }
        if let Some(img) = image {
            if img.bytes.len() > self.max_file_mb * 1024 * 1024 {
                return Err(SessionError::FileTooLarge {
                    name: img.file_name.clone(),
                    limit_mb: self.max_file_mb,
                });
            }
            if !img.mime.starts_with("image/") {
                return Err(SessionError::NotAnImage {
                    name: img.file_name.clone(),
                    mime: img.mime.clone(),
                });
            }
        }
        Ok(())
    }

    /// Submit one generation request. Local validation failures and an
    /// already-busy session return `Err` without touching the network;
    /// everything that reached the relay comes back as an outcome.
    pub async fn submit(
        &self,
        prompt: &str,
        image: Option<ImageUpload>,
        model: Option<&str>,
    ) -> Result<SubmitOutcome, SessionError> {
        self.validate(prompt, image.as_ref())?;

        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SessionError::Busy)?;
        let _guard = BusyGuard(&self.busy);

        let mut form = multipart::Form::new().text("prompt", prompt.to_string());
        if let Some(m) = model {
            form = form.text("model", m.to_string());
        }
        if let Some(img) = image {
            let part = multipart::Part::bytes(img.bytes)
                .file_name(img.file_name)
                .mime_str(&img.mime)?;
            form = form.part("image", part);
        }

        let mut request = self
            .http
            .post(format!("{}/generate", self.base_url))
            .multipart(form);
        if let Some(key) = self.key_store.get() {
            request = request.header("x-api-key", key);
        }

        info!("Submitting generation request to {}", self.base_url);
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Ok(SubmitOutcome::Timeout),
            Err(e) => {
                return Ok(SubmitOutcome::Error {
                    code: "NETWORK_ERROR".to_string(),
                    message: e.to_string(),
                })
            }
        };

        let status = response.status();
        let raw = match response.text().await {
            Ok(t) => t,
            Err(e) if e.is_timeout() => return Ok(SubmitOutcome::Timeout),
            Err(e) => {
                return Ok(SubmitOutcome::Error {
                    code: "NETWORK_ERROR".to_string(),
                    message: e.to_string(),
                })
            }
        };

        let Ok(reply) = serde_json::from_str::<RelayReply>(&raw) else {
            return Ok(SubmitOutcome::Error {
                code: format!("HTTP {}", status.as_u16()),
                message: raw,
            });
        };

        if !reply.success {
            return Ok(SubmitOutcome::Error {
                code: reply
                    .error
                    .unwrap_or_else(|| "GENERATION_FAILED".to_string()),
                message: reply.message.unwrap_or_default(),
            });
        }

        match render_reply(&reply) {
            Ok(rendered) => Ok(SubmitOutcome::Success(rendered)),
            Err(message) => Ok(SubmitOutcome::Error {
                code: "INVALID_RESPONSE".to_string(),
                message,
            }),
        }
    }
}
