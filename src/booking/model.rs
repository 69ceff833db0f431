//! Core booking entities (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provenance of a value written into [`Booking`]. Higher variants outrank
/// lower ones: `UserTruth` always wins, `ToolArg` beats `Heuristic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldSource {
    Heuristic,
    ToolArg,
    UserTruth,
}

/// One booking field plus the source that last wrote it, so a later,
/// lower-confidence write can be rejected (§3 Booking invariant).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackedField<T> {
    pub value: Option<T>,
    pub source: Option<FieldSource>,
}

impl<T: Clone + PartialEq> TrackedField<T> {
    /// Write `value` if it outranks (or ties with, for idempotent
    /// re-confirmation) the field's current source, or if the field was
    /// previously unset. Returns `true` if the write was accepted.
    pub fn set(&mut self, value: T, source: FieldSource) -> bool {
        let accepted = match self.source {
            None => true,
            Some(existing) => source >= existing,
        };
        if accepted {
            self.value = Some(value);
            self.source = Some(source);
        }
        accepted
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }
}

/// The four-plus-one fields of a taxi booking. Once a field is set from a
/// higher-precedence source it is never silently overwritten by a lower
/// one (§3 Booking invariant).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Booking {
    pub pickup: TrackedField<String>,
    pub destination: TrackedField<String>,
    pub passengers: TrackedField<u32>,
    /// Pickup time as free text, or the sentinel `"ASAP"`.
    pub pickup_time: TrackedField<String>,
    /// Supplemental accessibility/luggage notes. Never gates
    /// `compute_next_step` — it is metadata, not a required slot.
    pub special_requirements: TrackedField<String>,
}

/// Parallel record of the same four fields, captured directly from
/// corrected transcripts at the moment the user answered the matching
/// question. Precedence: `UserTruth` > model tool argument > model
/// assistant-transcript heuristic (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserTruth {
    pub pickup: Option<String>,
    pub destination: Option<String>,
    pub passengers: Option<u32>,
    pub pickup_time: Option<String>,
}

/// Dialog step, ordered `pickup < destination < passengers < time <
/// confirmation < confirmed` (§3). `None` is a sentinel used only before a
/// call has produced its first question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Step {
    Pickup,
    Destination,
    Passengers,
    Time,
    Confirmation,
    Confirmed,
    None,
}

/// The dialog step that was pending when the caller started speaking,
/// captured at `speech_started` so a transcript is attributed to the
/// question actually posed even if a concurrent tool call has since
/// advanced `Step` (§3, §4.6 race-recovery).
#[derive(Debug, Clone, Copy, Default)]
pub struct QuestionSnapshot(Option<Step>);

impl QuestionSnapshot {
    #[must_use]
    pub fn capture(step: Step) -> Self {
        Self(Some(step))
    }

    /// Resolve to the captured step, falling back to `current` if nothing
    /// was captured (`questionSnapshot ?? currentStep`).
    #[must_use]
    pub fn resolve(&self, current: Step) -> Step {
        self.0.unwrap_or(current)
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }
}

/// The {fare, eta, booking-ref, callback-url} tuple supplied by the
/// dispatch backend, or synthesized as a fallback (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub fare: String,
    pub eta: String,
    pub booking_ref: String,
    pub callback_url: Option<String>,
}

/// Speaker role for a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRole {
    User,
    Assistant,
    System,
}

/// One append-only transcript line (§3). The only permitted non-append
/// mutation is the single anti-hallucination removal in §4.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub role: TranscriptRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}
