// Process-wide relay configuration
//
// Read once at startup from the environment and immutable afterwards.
// Nothing here is reloadable; a config change requires a restart.

use tracing::warn;

/// 1x1 transparent PNG used as the fallback substitute image.
const DUMMY_PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR4nGNgYAAAAAMAASsJTYQAAAAASUVORK5CYII=";

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";
const DEFAULT_MAX_FILE_MB: usize = 10;

/// Immutable relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen port for the relay server.
    pub port: u16,
    /// Allowed CORS origin; `*` means any.
    pub cors_origin: String,
    /// Model identifier used when the request does not name one.
    pub default_model: String,
    /// When set, certain upstream failures are substituted with the
    /// fallback image instead of being surfaced to the caller.
    pub allow_fallback: bool,
    /// Upload size ceiling in megabytes.
    pub max_file_mb: usize,
    /// Base64 PNG served when fallback mode substitutes a result.
    pub fallback_image_b64: String,
    /// API key used when the request carries none.
    pub default_api_key: Option<String>,
}

impl RelayConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let port = match var("RELAY_PORT").or_else(|| var("PORT")) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Invalid port {:?}, using {}", raw, DEFAULT_PORT);
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        let max_file_mb = match var("MAX_FILE_MB") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Invalid MAX_FILE_MB {:?}, using {}", raw, DEFAULT_MAX_FILE_MB);
                DEFAULT_MAX_FILE_MB
            }),
            None => DEFAULT_MAX_FILE_MB,
        };

        let default_api_key = var("GEMINI_API_KEY")
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        Self {
            port,
            cors_origin: var("CORS_ORIGIN").unwrap_or_else(|| "*".to_string()),
            default_model: var("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            allow_fallback: var("ALLOW_FALLBACK").as_deref() == Some("1"),
            max_file_mb,
            fallback_image_b64: var("DUMMY_IMAGE_BASE64")
                .unwrap_or_else(|| DUMMY_PNG_B64.to_string()),
            default_api_key,
        }
    }

    /// Request body ceiling in bytes, derived from `max_file_mb`.
    pub fn max_body_bytes(&self) -> usize {
        self.max_file_mb * 1024 * 1024
    }
}
