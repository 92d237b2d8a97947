// Relay server - route assembly, CORS, body limit, and lifecycle
//
// One router, two routes. Each accepted connection is served on its own
// task; a oneshot channel stops the accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::RelayConfig;
use crate::relay::handlers::{self, AppState};
use crate::upstream::GeminiClient;

/// Build the relay routes.
fn relay_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::handle_health))
        .route("/generate", post(handlers::handle_generate))
        .with_state(state)
}

/// CORS layer for the configured origin; `*` allows any origin.
fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origin == "*" {
        return layer.allow_origin(Any);
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => layer.allow_origin(value),
        Err(_) => {
            warn!("Invalid CORS_ORIGIN {:?}, allowing any origin", origin);
            layer.allow_origin(Any)
        }
    }
}

/// Running relay server instance.
#[derive(Clone)]
pub struct RelayServer {
    shutdown_tx: Arc<tokio::sync::Mutex<Option<oneshot::Sender<()>>>>,
    pub local_addr: SocketAddr,
}

impl RelayServer {
    /// Start the relay server. Port 0 picks a free port; the bound
    /// address is available as `local_addr`.
    pub async fn start(
        host: String,
        port: u16,
        config: Arc<RelayConfig>,
        upstream: Arc<GeminiClient>,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), String> {
        let state = AppState::new(config.clone(), upstream);

        let app = relay_routes(state)
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&config.cors_origin))
            .layer(DefaultBodyLimit::max(config.max_body_bytes()));

        let addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind {}: {}", addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| format!("Failed to read local addr: {}", e))?;

        info!("Relay server started at http://{}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let server_instance = Self {
            shutdown_tx: Arc::new(tokio::sync::Mutex::new(Some(shutdown_tx))),
            local_addr,
        };

        let handle = tokio::spawn(async move {
            use hyper::server::conn::http1;
            use hyper_util::rt::TokioIo;
            use hyper_util::service::TowerToHyperService;

            let app_service = app.into_service::<hyper::body::Incoming>();

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _remote_addr)) => {
                                let io = TokioIo::new(stream);
                                let hyper_svc = TowerToHyperService::new(app_service.clone());

                                tokio::task::spawn(async move {
                                    if let Err(err) = http1::Builder::new()
                                        .serve_connection(io, hyper_svc)
                                        .await
                                    {
                                        debug!("Connection ended: {:?}", err);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Accept connection failed: {:?}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("Relay server shutting down");
                        break;
                    }
                }
            }
        });

        Ok((server_instance, handle))
    }

    /// Stop the relay server.
    pub fn stop(&self) {
        let tx_mutex = self.shutdown_tx.clone();
        tokio::spawn(async move {
            let mut lock = tx_mutex.lock().await;
            if let Some(tx) = lock.take() {
                let _ = tx.send(());
                info!("Relay server stop signal sent");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::Request;
    use axum::Json;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde_json::{json, Value};

    async fn spawn_upstream(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1beta", addr)
    }

    async fn start_relay(config: RelayConfig, upstream_base: String) -> (RelayServer, String) {
        let upstream = Arc::new(GeminiClient::new(Some(upstream_base)).unwrap());
        let (server, _handle) =
            RelayServer::start("127.0.0.1".to_string(), 0, Arc::new(config), upstream)
                .await
                .unwrap();
        let base = format!("http://{}", server.local_addr);
        (server, base)
    }

    fn base_config() -> RelayConfig {
        RelayConfig::from_vars(|_| None)
    }

    /// Upstream stub that counts calls and returns a fixed body.
    fn counting_upstream(hits: Arc<AtomicUsize>, status: u16, body: Value) -> Router {
        Router::new().route(
            "/v1beta/models/:model_action",
            post(move || {
                let hits = hits.clone();
                let body = body.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (axum::http::StatusCode::from_u16(status).unwrap(), Json(body))
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let mut config = base_config();
        config.allow_fallback = true;
        let upstream = spawn_upstream(Router::new()).await;
        let (server, base) = start_relay(config, upstream).await;

        let body: Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(body["model"], "gemini-2.5-flash-image-preview");
        assert_eq!(body["allowFallback"], true);

        server.stop();
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_upstream_call() {
        let hits = Arc::new(AtomicUsize::new(0));
        let upstream = spawn_upstream(counting_upstream(hits.clone(), 200, json!({}))).await;
        let mut config = base_config();
        config.default_api_key = Some("key".to_string());
        let (server, base) = start_relay(config, upstream).await;

        let form = reqwest::multipart::Form::new().text("prompt", "");
        let resp = reqwest::Client::new()
            .post(format!("{}/generate", base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "EMPTY_INPUT");
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        server.stop();
    }

    #[tokio::test]
    async fn test_missing_key_without_fallback_is_401() {
        let hits = Arc::new(AtomicUsize::new(0));
        let upstream = spawn_upstream(counting_upstream(hits.clone(), 200, json!({}))).await;
        let (server, base) = start_relay(base_config(), upstream).await;

        let form = reqwest::multipart::Form::new().text("prompt", "draw a cat");
        let resp = reqwest::Client::new()
            .post(format!("{}/generate", base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "NO_API_KEY");
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        server.stop();
    }

    #[tokio::test]
    async fn test_missing_key_with_fallback_serves_mock() {
        let hits = Arc::new(AtomicUsize::new(0));
        let upstream = spawn_upstream(counting_upstream(hits.clone(), 200, json!({}))).await;
        let mut config = base_config();
        config.allow_fallback = true;
        config.fallback_image_b64 = "UExBQ0VIT0xERVI=".to_string();
        let (server, base) = start_relay(config, upstream).await;

        let form = reqwest::multipart::Form::new().text("prompt", "draw a cat");
        let resp = reqwest::Client::new()
            .post(format!("{}/generate", base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["type"], "image");
        assert_eq!(body["data"], "UExBQ0VIT0xERVI=");
        assert_eq!(body["mockUsed"], true);
        assert_eq!(body["reason"], "MISSING_API_KEY");
        assert!(body["durationMs"].is_u64());
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        server.stop();
    }

    #[tokio::test]
    async fn test_image_round_trip_is_byte_identical() {
        // Upstream echoes the uploaded inline image back as its answer,
        // preceded by a text part the relay must ignore.
        let upstream_router = Router::new().route(
            "/v1beta/models/:model_action",
            post(|request: Request| async move {
                let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
                    .await
                    .unwrap();
                let body: Value = serde_json::from_slice(&bytes).unwrap();
                let inline = body["contents"][0]["parts"][1]["inlineData"].clone();
                Json(json!({
                    "candidates": [{
                        "content": {"parts": [
                            {"text": "here is your image"},
                            {"inlineData": inline}
                        ]}
                    }]
                }))
            }),
        );
        let upstream = spawn_upstream(upstream_router).await;
        let mut config = base_config();
        config.default_api_key = Some("key".to_string());
        let (server, base) = start_relay(config, upstream).await;

        let original: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
        let form = reqwest::multipart::Form::new().text("prompt", "edit this").part(
            "image",
            reqwest::multipart::Part::bytes(original.clone())
                .file_name("input.jpg")
                .mime_str("image/jpeg")
                .unwrap(),
        );
        let resp = reqwest::Client::new()
            .post(format!("{}/generate", base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["type"], "image");
        assert_eq!(body["mime"], "image/jpeg");
        assert!(body.get("mockUsed").is_none());
        let decoded = BASE64.decode(body["data"].as_str().unwrap()).unwrap();
        assert_eq!(decoded, original);

        server.stop();
    }

    #[tokio::test]
    async fn test_text_parts_are_concatenated() {
        let upstream = spawn_upstream(counting_upstream(
            Arc::new(AtomicUsize::new(0)),
            200,
            json!({
                "candidates": [{
                    "content": {"parts": [{"text": "Hello, "}, {"text": "world"}]}
                }]
            }),
        ))
        .await;
        let mut config = base_config();
        config.default_api_key = Some("key".to_string());
        let (server, base) = start_relay(config, upstream).await;

        let form = reqwest::multipart::Form::new()
            .text("prompt", "say hi")
            .text("model", "custom-model");
        let resp = reqwest::Client::new()
            .post(format!("{}/generate", base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["type"], "text");
        assert_eq!(body["text"], "Hello, world");
        assert_eq!(body["model"], "custom-model");

        server.stop();
    }

    #[tokio::test]
    async fn test_quota_failure_with_fallback_serves_mock() {
        let upstream = spawn_upstream(counting_upstream(
            Arc::new(AtomicUsize::new(0)),
            429,
            json!({"error": {"code": 429, "message": "RESOURCE_EXHAUSTED", "status": "RESOURCE_EXHAUSTED"}}),
        ))
        .await;
        let mut config = base_config();
        config.allow_fallback = true;
        config.default_api_key = Some("key".to_string());
        let (server, base) = start_relay(config, upstream).await;

        let form = reqwest::multipart::Form::new().text("prompt", "draw");
        let resp = reqwest::Client::new()
            .post(format!("{}/generate", base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["mockUsed"], true);
        assert!(body["reason"].as_str().unwrap().starts_with("FALLBACK:"));

        server.stop();
    }

    #[tokio::test]
    async fn test_quota_failure_without_fallback_is_429() {
        let upstream = spawn_upstream(counting_upstream(
            Arc::new(AtomicUsize::new(0)),
            429,
            json!({"error": {"code": 429, "message": "quota exceeded", "status": "RESOURCE_EXHAUSTED"}}),
        ))
        .await;
        let mut config = base_config();
        config.default_api_key = Some("key".to_string());
        let (server, base) = start_relay(config, upstream).await;

        let form = reqwest::multipart::Form::new().text("prompt", "draw");
        let resp = reqwest::Client::new()
            .post(format!("{}/generate", base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 429);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "GENERATION_FAILED");
        assert!(body["message"].as_str().unwrap().contains("quota exceeded"));
        assert_eq!(body["model"], "gemini-2.5-flash-image-preview");

        server.stop();
    }

    #[tokio::test]
    async fn test_unclassified_failure_ignores_fallback() {
        let upstream = spawn_upstream(counting_upstream(
            Arc::new(AtomicUsize::new(0)),
            400,
            json!({"error": {"code": 400, "message": "invalid argument", "status": "INVALID_ARGUMENT"}}),
        ))
        .await;
        let mut config = base_config();
        config.allow_fallback = true;
        config.default_api_key = Some("key".to_string());
        let (server, base) = start_relay(config, upstream).await;

        let form = reqwest::multipart::Form::new().text("prompt", "draw");
        let resp = reqwest::Client::new()
            .post(format!("{}/generate", base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 500);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "GENERATION_FAILED");

        server.stop();
    }

    #[tokio::test]
    async fn test_empty_upstream_response_falls_back_as_no_output() {
        let upstream = spawn_upstream(counting_upstream(
            Arc::new(AtomicUsize::new(0)),
            200,
            json!({}),
        ))
        .await;
        let mut config = base_config();
        config.allow_fallback = true;
        config.default_api_key = Some("key".to_string());
        let (server, base) = start_relay(config, upstream).await;

        let form = reqwest::multipart::Form::new().text("prompt", "draw");
        let resp = reqwest::Client::new()
            .post(format!("{}/generate", base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["mockUsed"], true);
        assert_eq!(body["reason"], "FALLBACK:NO_OUTPUT");

        server.stop();
    }

    #[tokio::test]
    async fn test_server_start_and_stop() {
        let upstream = spawn_upstream(Router::new()).await;
        let (server, handle) = {
            let upstream = Arc::new(GeminiClient::new(Some(upstream)).unwrap());
            RelayServer::start(
                "127.0.0.1".to_string(),
                0,
                Arc::new(base_config()),
                upstream,
            )
            .await
            .unwrap()
        };

        assert_ne!(server.local_addr.port(), 0);
        server.stop();
        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;
    }
}
