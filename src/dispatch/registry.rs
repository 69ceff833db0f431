//! Per-call broadcast channels for dispatch callback events.
//!
//! Each call gets its own `dispatch_<call_id>` channel, created on first
//! subscribe and torn down on [`ChannelRegistry::remove`]. Keeping one
//! channel per call (rather than one shared bus with call-id filtering)
//! means cleanup is a single map removal and no subscriber ever sees
//! another call's events.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use super::webhook::CallbackEvent;

const CHANNEL_CAPACITY: usize = 32;

#[derive(Default)]
pub struct ChannelRegistry {
    channels: Mutex<HashMap<String, broadcast::Sender<CallbackEvent>>>,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `call_id`'s channel, creating it if this is the first
    /// subscriber.
    pub fn subscribe(&self, call_id: &str) -> broadcast::Receiver<CallbackEvent> {
        let mut channels = self.channels.lock().expect("channel registry poisoned");
        channels
            .entry(call_id.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish `event` on `call_id`'s channel. A send with no subscribers
    /// (call already cleaned up) is not an error.
    pub fn publish(&self, call_id: &str, event: CallbackEvent) {
        let channels = self.channels.lock().expect("channel registry poisoned");
        if let Some(tx) = channels.get(call_id) {
            let _ = tx.send(event);
        }
    }

    /// Drop `call_id`'s channel so it stops accumulating subscribers
    /// across the lifetime of the process.
    pub fn remove(&self, call_id: &str) {
        self.channels
            .lock()
            .expect("channel registry poisoned")
            .remove(call_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let registry = ChannelRegistry::new();
        let mut rx = registry.subscribe("call-1");
        registry.publish(
            "call-1",
            CallbackEvent::Say {
                message: "hello".to_owned(),
            },
        );
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, CallbackEvent::Say { message } if message == "hello"));
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let registry = ChannelRegistry::new();
        registry.publish("call-missing", CallbackEvent::Hangup { message: None });
    }

    #[tokio::test]
    async fn remove_drops_the_channel() {
        let registry = ChannelRegistry::new();
        let _rx = registry.subscribe("call-2");
        registry.remove("call-2");
        assert!(registry.channels.lock().unwrap().get("call-2").is_none());
    }
}
