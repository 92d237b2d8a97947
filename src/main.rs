use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use image_relay::config::RelayConfig;
use image_relay::relay::RelayServer;
use image_relay::upstream::GeminiClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(RelayConfig::from_env());
    let upstream = Arc::new(GeminiClient::new(None)?);

    let (server, handle) = RelayServer::start(
        "0.0.0.0".to_string(),
        config.port,
        config.clone(),
        upstream,
    )
    .await
    .map_err(anyhow::Error::msg)?;

    info!(
        "Relay ready at http://{} (model={}, fallback={})",
        server.local_addr, config.default_model, config.allow_fallback
    );

    tokio::signal::ctrl_c().await?;
    server.stop();
    let _ = handle.await;
    info!("Relay stopped");

    Ok(())
}
