//! Tracked, cancellable session timers (§5): a small owned wrapper around a
//! `HashMap<TimerId, CancellationToken>` plus the spawned `tokio::time::sleep`
//! tasks backing them, drained on call cleanup. Each started timer reports
//! back to the actor loop over an `mpsc` channel, the same shape
//! `dispatch::coordinator`'s fallback timer uses for its own
//! `tokio::select! { sleep, cancelled }` race.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Identifies one of the engine's tracked timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    GreetingFallback,
    Keepalive,
    MaxSession,
}

/// Delivered on the engine's timer channel when a tracked timer fires.
#[derive(Debug, Clone, Copy)]
pub struct TimerEvent(pub TimerId);

/// Owned registry of the cancellation tokens backing the engine's spawned
/// timer tasks.
#[derive(Default)]
pub struct TimerSet {
    tokens: HashMap<TimerId, CancellationToken>,
}

impl TimerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) a timer under `id` that fires on `tx` after
    /// `interval`, repeating every `interval` if `repeat` is set. Any
    /// previous timer registered under `id` is cancelled first.
    pub fn start(
        &mut self,
        id: TimerId,
        interval: Duration,
        repeat: bool,
        tx: UnboundedSender<TimerEvent>,
    ) {
        self.cancel(id);
        let token = CancellationToken::new();
        self.tokens.insert(id, token.clone());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        if tx.send(TimerEvent(id)).is_err() {
                            return;
                        }
                        if !repeat {
                            return;
                        }
                    }
                    () = token.cancelled() => return,
                }
            }
        });
    }

    /// Cancel the timer registered under `id`, if any.
    pub fn cancel(&mut self, id: TimerId) {
        if let Some(token) = self.tokens.remove(&id) {
            token.cancel();
        }
    }

    /// Cancel every outstanding timer, e.g. on call cleanup.
    pub fn cancel_all(&mut self) {
        for (_, token) in self.tokens.drain() {
            token.cancel();
        }
    }
}
