//! Timer-driven speech-protection and barge-in guards (§4.4).
//!
//! Every deadline here is a monotonic [`Instant`]; decisions compare `now`
//! against them. This module is pure decision logic — the [`crate::session`]
//! actor owns the actual timers and feeds `now` in on each audio frame.

use crate::booking::Step;
use crate::config::ProtectionConfig;
use std::time::{Duration, Instant};

/// Which critical utterance is currently protected by the summary window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    /// A fare/ETA summary was just spoken.
    Summary,
    /// The assistant just confirmed the booking.
    Confirm,
    /// The assistant is delivering the goodbye script.
    Goodbye,
}

/// Active protection deadlines for one call (§3 `ProtectionWindows`).
#[derive(Debug, Clone, Default)]
pub struct ProtectionWindows {
    pub greeting_until: Option<Instant>,
    pub echo_until: Option<Instant>,
    pub summary_until: Option<Instant>,
    pub lead_in_until: Option<Instant>,
    pub barge_in_cooldown_until: Option<Instant>,
}

fn active(deadline: Option<Instant>, now: Instant) -> bool {
    deadline.is_some_and(|d| now < d)
}

/// Decision logic wired to [`ProtectionConfig`]'s constants.
pub struct ProtectionController {
    config: ProtectionConfig,
    windows: ProtectionWindows,
}

impl ProtectionController {
    #[must_use]
    pub fn new(config: ProtectionConfig) -> Self {
        Self {
            config,
            windows: ProtectionWindows::default(),
        }
    }

    /// Start the greeting protection window from call-connect time.
    pub fn start_greeting(&mut self, now: Instant) {
        self.windows.greeting_until = Some(now + Duration::from_millis(self.config.greeting_ms));
    }

    /// Start the echo guard after assistant-audio-done.
    pub fn start_echo(&mut self, now: Instant) {
        self.windows.echo_until = Some(now + Duration::from_millis(self.config.echo_ms));
    }

    /// Start the summary protection window for `kind`.
    pub fn start_summary(&mut self, kind: SummaryKind, now: Instant) {
        let ms = match kind {
            SummaryKind::Summary => self.config.summary_ms,
            SummaryKind::Confirm => self.config.confirm_ms,
            SummaryKind::Goodbye => self.config.goodbye_ms,
        };
        self.windows.summary_until = Some(now + Duration::from_millis(ms));
    }

    /// Start the assistant lead-in ignore window after the first audio
    /// chunk of a new assistant response.
    pub fn start_lead_in(&mut self, now: Instant) {
        self.windows.lead_in_until = Some(now + Duration::from_millis(self.config.lead_in_ms));
    }

    /// Start the barge-in cooldown after `awaitingConfirmation` is set.
    pub fn start_barge_in_cooldown(&mut self, now: Instant) {
        self.windows.barge_in_cooldown_until =
            Some(now + Duration::from_millis(self.config.barge_in_cooldown_ms));
    }

    /// Whether inbound user audio should be dropped at `now`, given the
    /// current dialog `step` and whether the engine is awaiting
    /// confirmation. Greeting/echo/lead-in windows always drop; the
    /// summary window drops unless the call is in the confirmation step
    /// and awaiting confirmation (§4.4).
    #[must_use]
    pub fn should_drop_inbound_audio(
        &self,
        now: Instant,
        step: Step,
        awaiting_confirmation: bool,
    ) -> bool {
        if active(self.windows.greeting_until, now) {
            return true;
        }
        if active(self.windows.echo_until, now) {
            return true;
        }
        if active(self.windows.lead_in_until, now) {
            return true;
        }
        if active(self.windows.summary_until, now) {
            return !(step == Step::Confirmation && awaiting_confirmation);
        }
        false
    }

    /// Whether a frame with the given RMS should cancel the in-flight
    /// assistant response (barge-in). Requires the response to be active,
    /// outside the lead-in window, outside the cooldown window, and the
    /// RMS inside `[min, max]` — below is echo/noise, above is clipping
    /// (§4.4).
    #[must_use]
    pub fn should_barge_in(&self, now: Instant, response_active: bool, rms: f32) -> bool {
        if !response_active {
            return false;
        }
        if active(self.windows.lead_in_until, now) {
            return false;
        }
        if active(self.windows.barge_in_cooldown_until, now) {
            return false;
        }
        rms >= self.config.barge_in_rms_min && rms <= self.config.barge_in_rms_max
    }

    #[must_use]
    pub fn windows(&self) -> &ProtectionWindows {
        &self.windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> ProtectionController {
        ProtectionController::new(ProtectionConfig::default())
    }

    #[test]
    fn greeting_window_drops_audio() {
        let mut ctl = controller();
        let t0 = Instant::now();
        ctl.start_greeting(t0);
        assert!(ctl.should_drop_inbound_audio(t0, Step::Pickup, false));
        let later = t0 + Duration::from_millis(12_001);
        assert!(!ctl.should_drop_inbound_audio(later, Step::Pickup, false));
    }

    #[test]
    fn summary_window_allows_audio_during_confirmation_while_awaiting() {
        let mut ctl = controller();
        let t0 = Instant::now();
        ctl.start_summary(SummaryKind::Summary, t0);
        assert!(ctl.should_drop_inbound_audio(t0, Step::Pickup, false));
        assert!(!ctl.should_drop_inbound_audio(t0, Step::Confirmation, true));
    }

    #[test]
    fn barge_in_requires_response_active_and_rms_band() {
        let ctl = controller();
        let now = Instant::now();
        assert!(!ctl.should_barge_in(now, false, 100.0));
        assert!(ctl.should_barge_in(now, true, 100.0));
        assert!(!ctl.should_barge_in(now, true, 1.0));
        assert!(!ctl.should_barge_in(now, true, 50_000.0));
    }

    #[test]
    fn barge_in_cooldown_blocks_interruption() {
        let mut ctl = controller();
        let t0 = Instant::now();
        ctl.start_barge_in_cooldown(t0);
        assert!(!ctl.should_barge_in(t0, true, 100.0));
        let later = t0 + Duration::from_millis(2_001);
        assert!(ctl.should_barge_in(later, true, 100.0));
    }

    #[test]
    fn lead_in_window_blocks_both_drop_and_barge_in() {
        let mut ctl = controller();
        let t0 = Instant::now();
        ctl.start_lead_in(t0);
        assert!(ctl.should_drop_inbound_audio(t0, Step::Pickup, false));
        assert!(!ctl.should_barge_in(t0, true, 100.0));
    }
}
