//! Thin `async_trait` boundaries around the two WebSocket halves the engine
//! writes to, mirroring [`crate::dispatch::DispatchTransport`]'s shape: a
//! trait object at the I/O edge so tests substitute an in-memory double
//! instead of a live socket.

use async_trait::async_trait;
use axum::extract::ws::{Message as BridgeMessage, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{GatewayError, Result};

use super::messages::BridgeOutbound;

pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound half of the upstream Realtime API connection.
#[async_trait]
pub trait UpstreamSender: Send {
    async fn send_json(&mut self, value: &serde_json::Value) -> Result<()>;
}

#[async_trait]
impl UpstreamSender for SplitSink<UpstreamSocket, UpstreamMessage> {
    async fn send_json(&mut self, value: &serde_json::Value) -> Result<()> {
        let text = serde_json::to_string(value)
            .map_err(|e| GatewayError::Upstream(format!("serialize event: {e}")))?;
        self.send(UpstreamMessage::Text(text.into()))
            .await
            .map_err(|e| GatewayError::Upstream(format!("send failed: {e}")))
    }
}

/// Outbound half of the bridge WebSocket.
#[async_trait]
pub trait BridgeSender: Send {
    async fn send_frame(&mut self, frame: &BridgeOutbound) -> Result<()>;
}

#[async_trait]
impl BridgeSender for SplitSink<WebSocket, BridgeMessage> {
    async fn send_frame(&mut self, frame: &BridgeOutbound) -> Result<()> {
        let text = serde_json::to_string(frame)
            .map_err(|e| GatewayError::Bridge(format!("serialize outbound frame: {e}")))?;
        self.send(BridgeMessage::Text(text.into()))
            .await
            .map_err(|e| GatewayError::Bridge(format!("send failed: {e}")))
    }
}

#[cfg(test)]
pub mod test_doubles {
    use super::{BridgeOutbound, BridgeSender, Result, UpstreamSender};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Records every event the engine sends upstream, for assertions.
    #[derive(Default, Clone)]
    pub struct RecordingUpstreamSender(pub Arc<Mutex<Vec<serde_json::Value>>>);

    impl RecordingUpstreamSender {
        pub fn sent(&self) -> Vec<serde_json::Value> {
            self.0.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl UpstreamSender for RecordingUpstreamSender {
        async fn send_json(&mut self, value: &serde_json::Value) -> Result<()> {
            self.0.lock().expect("lock").push(value.clone());
            Ok(())
        }
    }

    /// Records every frame the engine sends to the bridge, for assertions.
    #[derive(Default, Clone)]
    pub struct RecordingBridgeSender(pub Arc<Mutex<Vec<BridgeOutbound>>>);

    impl RecordingBridgeSender {
        pub fn sent(&self) -> Vec<BridgeOutbound> {
            self.0.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl BridgeSender for RecordingBridgeSender {
        async fn send_frame(&mut self, frame: &BridgeOutbound) -> Result<()> {
            self.0.lock().expect("lock").push(frame.clone());
            Ok(())
        }
    }
}
