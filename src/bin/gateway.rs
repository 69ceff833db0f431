//! Gateway process entry point: loads configuration, wires the shared
//! HTTP client and persistence store, and starts the bridge server.

use std::path::PathBuf;
use std::sync::Arc;

use ada_voice_gateway::config::GatewayConfig;
use ada_voice_gateway::persistence::{HttpPersistence, PersistenceStore};
use ada_voice_gateway::router;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::var_os("GATEWAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(GatewayConfig::default_config_path);

    let mut config = if config_path.exists() {
        GatewayConfig::from_file(&config_path)?
    } else {
        tracing::warn!(path = ?config_path, "no config file found, using defaults");
        GatewayConfig::default()
    };
    config.apply_env_overrides();

    let http_client = reqwest::Client::builder()
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?;

    let persistence: Arc<dyn PersistenceStore> = Arc::new(HttpPersistence::new(
        http_client.clone(),
        config.persistence.clone(),
    ));

    router::serve(config, http_client, persistence).await
}
