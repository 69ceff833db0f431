//! The [`PersistenceStore`] trait and its two implementations: the
//! production HTTP-backed store and an in-memory double for tests
//! (mirrors the teacher's `CredentialManager` trait-plus-stub shape).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::PersistenceConfig;
use crate::error::Result;

use super::snapshot::CallSnapshot;

/// Best-effort persistence of call snapshots. All methods are
/// fire-and-forget from the caller's point of view: persistence failures
/// never block or fail the dialog (§4.7, §7).
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Replace the in-memory snapshot for `call_id` and (re)start the
    /// debounce window before it is flushed.
    async fn upsert_call(&self, snapshot: CallSnapshot);

    /// Ensure a flush is scheduled for `call_id` if one isn't already
    /// pending, without resetting an in-flight debounce window.
    async fn schedule_flush(&self, call_id: &str);

    /// Flush `call_id` immediately, bypassing the debounce window (used on
    /// booking confirmation and call end).
    async fn immediate_flush(&self, call_id: &str);
}

struct PendingCall {
    snapshot: CallSnapshot,
    cancel_debounce: CancellationToken,
}

/// Production store: debounces writes per call, then POSTs the snapshot
/// as JSON to `{base_url}/calls/{call_id}`.
pub struct HttpPersistence {
    client: Client,
    config: PersistenceConfig,
    pending: Arc<Mutex<HashMap<String, PendingCall>>>,
}

impl HttpPersistence {
    #[must_use]
    pub fn new(client: Client, config: PersistenceConfig) -> Self {
        Self {
            client,
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn post(client: &Client, base_url: &str, snapshot: &CallSnapshot) -> Result<()> {
        let url = format!("{base_url}/calls/{}", snapshot.call_id);
        client
            .post(url)
            .json(snapshot)
            .send()
            .await
            .map_err(|e| crate::error::GatewayError::Persistence(e.to_string()))?
            .error_for_status()
            .map_err(|e| crate::error::GatewayError::Persistence(e.to_string()))?;
        Ok(())
    }

    fn spawn_debounced_flush(&self, call_id: String, token: CancellationToken) {
        let client = self.client.clone();
        let base_url = self.config.base_url.clone();
        let debounce = Duration::from_millis(self.config.debounce_ms);
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(debounce) => {
                    let snapshot = {
                        let mut guard = pending.lock().await;
                        guard.remove(&call_id).map(|p| p.snapshot)
                    };
                    if let Some(snapshot) = snapshot {
                        if let Err(err) = Self::post(&client, &base_url, &snapshot).await {
                            warn!(call_id = %call_id, %err, "debounced persistence flush failed");
                        }
                    }
                }
                () = token.cancelled() => {}
            }
        });
    }
}

#[async_trait]
impl PersistenceStore for HttpPersistence {
    async fn upsert_call(&self, snapshot: CallSnapshot) {
        let call_id = snapshot.call_id.clone();
        let mut guard = self.pending.lock().await;
        if let Some(existing) = guard.get_mut(&call_id) {
            existing.cancel_debounce.cancel();
            existing.snapshot = snapshot;
        } else {
            guard.insert(
                call_id.clone(),
                PendingCall {
                    snapshot,
                    cancel_debounce: CancellationToken::new(),
                },
            );
        }
        let token = CancellationToken::new();
        guard.get_mut(&call_id).expect("just inserted").cancel_debounce = token.clone();
        drop(guard);
        self.spawn_debounced_flush(call_id, token);
    }

    async fn schedule_flush(&self, call_id: &str) {
        let guard = self.pending.lock().await;
        if let Some(pending) = guard.get(call_id) {
            let snapshot = pending.snapshot.clone();
            let token = pending.cancel_debounce.clone();
            drop(guard);
            self.spawn_debounced_flush(snapshot.call_id.clone(), token);
        }
    }

    async fn immediate_flush(&self, call_id: &str) {
        let snapshot = {
            let mut guard = self.pending.lock().await;
            guard.remove(call_id).map(|p| {
                p.cancel_debounce.cancel();
                p.snapshot
            })
        };
        if let Some(snapshot) = snapshot {
            if let Err(err) = Self::post(&self.client, &self.config.base_url, &snapshot).await {
                warn!(call_id = %call_id, %err, "immediate persistence flush failed");
            }
        }
    }
}

/// In-memory test double: every upsert is visible immediately, no
/// debounce, no network.
#[derive(Default)]
pub struct InMemoryPersistence {
    calls: Mutex<HashMap<String, CallSnapshot>>,
}

impl InMemoryPersistence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, call_id: &str) -> Option<CallSnapshot> {
        self.calls.lock().await.get(call_id).cloned()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryPersistence {
    async fn upsert_call(&self, snapshot: CallSnapshot) {
        self.calls.lock().await.insert(snapshot.call_id.clone(), snapshot);
    }

    async fn schedule_flush(&self, _call_id: &str) {}

    async fn immediate_flush(&self, _call_id: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::{Booking, Step};

    fn snapshot(call_id: &str) -> CallSnapshot {
        CallSnapshot {
            call_id: call_id.to_owned(),
            step: Step::Pickup,
            booking: Booking::default(),
            transcripts: Vec::new(),
            quote: None,
            booking_confirmed: false,
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn in_memory_store_reflects_latest_upsert() {
        let store = InMemoryPersistence::new();
        store.upsert_call(snapshot("call-1")).await;
        let mut updated = snapshot("call-1");
        updated.booking_confirmed = true;
        store.upsert_call(updated).await;
        let found = store.get("call-1").await.unwrap();
        assert!(found.booking_confirmed);
    }
}
