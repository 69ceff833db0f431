//! Bridge-facing HTTP/WebSocket server (§4.8). Built on axum following the
//! same listener/route/state shape as the teacher's channel gateway.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::dispatch::{ChannelRegistry, DispatchTransport, HttpDispatchTransport};
use crate::persistence::PersistenceStore;
use crate::session::{self, SessionHandles};

#[derive(Clone)]
struct RouterState {
    config: GatewayConfig,
    dispatch_transport: Arc<dyn DispatchTransport>,
    dispatch_registry: Arc<ChannelRegistry>,
    persistence: Arc<dyn PersistenceStore>,
}

#[derive(Debug, Deserialize)]
struct CallQuery {
    call_id: String,
    #[serde(default)]
    caller_phone: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    sample_rate: Option<u32>,
}

/// Start the gateway HTTP server: `/health` plus the `/bridge` WebSocket
/// upgrade endpoint, one [`session::run`] actor per accepted connection.
///
/// # Errors
///
/// Returns an error if the configured address cannot be bound.
pub async fn serve(
    config: GatewayConfig,
    http_client: reqwest::Client,
    persistence: Arc<dyn PersistenceStore>,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let state = RouterState {
        dispatch_transport: Arc::new(HttpDispatchTransport::new(http_client)),
        dispatch_registry: Arc::new(ChannelRegistry::new()),
        persistence,
        config,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/bridge", get(bridge_upgrade))
        .with_state(state);

    info!("voice gateway listening on http://{local_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn bridge_upgrade(
    State(state): State<RouterState>,
    Query(query): Query<CallQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let call_id = query.call_id.clone();
        let upstream = match connect_upstream(&state.config).await {
            Ok(upstream) => upstream,
            Err(err) => {
                warn!(call_id = %call_id, %err, "failed to connect to upstream realtime API");
                return;
            }
        };

        let handles = SessionHandles {
            call_id: call_id.clone(),
            bridge: socket,
            upstream,
            dispatch_transport: state.dispatch_transport,
            dispatch_registry: state.dispatch_registry,
            persistence: state.persistence,
            config: state.config,
        };

        if let Err(err) = session::run(handles).await {
            warn!(call_id = %call_id, %err, "session ended with error");
        }
    })
}

async fn connect_upstream(
    config: &GatewayConfig,
) -> anyhow::Result<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
> {
    let mut request = config.upstream.ws_url.as_str().into_client_request()?;
    if let Some(api_key) = &config.upstream.api_key {
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {api_key}").parse()?,
        );
    }
    let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}
