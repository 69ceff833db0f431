//! Wire shapes for the dispatch webhook and its asynchronous callbacks (§6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `action` discriminator on the outbound webhook POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchAction {
    RequestQuote,
    Confirmed,
}

/// The booking fields the coordinator needs to build a webhook payload.
/// Kept separate from [`crate::booking::Booking`] so the dispatch module
/// has no dependency on `TrackedField` provenance.
#[derive(Debug, Clone, Default)]
pub struct QuoteRequestFields {
    pub pickup: Option<String>,
    pub destination: Option<String>,
    pub passengers: Option<u32>,
    pub pickup_time: Option<String>,
}

/// Outbound JSON body for both `request_quote` and `confirmed` webhooks.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub job_id: String,
    pub call_id: String,
    pub caller_phone: Option<String>,
    pub ada_pickup: Option<String>,
    pub ada_destination: Option<String>,
    pub passengers: Option<u32>,
    pub pickup_time: Option<String>,
    pub action: DispatchAction,
    pub booking_ref: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Optional synchronous response body. A dispatch backend may answer the
/// `request_quote` POST inline instead of (or as well as) pushing an
/// `ask_confirm` callback event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookResponse {
    pub fare: Option<String>,
    #[serde(alias = "eta")]
    pub eta_text: Option<String>,
    pub eta_minutes: Option<u32>,
    pub booking_ref: Option<String>,
    pub callback_url: Option<String>,
}

impl WebhookResponse {
    /// Render `eta_minutes`/`eta_text` down to the single display string the
    /// engine reads back to the caller.
    #[must_use]
    pub fn eta_display(&self) -> Option<String> {
        self.eta_text
            .clone()
            .or_else(|| self.eta_minutes.map(|m| format!("{m} minutes")))
    }
}

/// Asynchronous events pushed over the `dispatch_<call_id>` callback
/// channel by the dispatch backend (§4.5, §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallbackEvent {
    AskConfirm {
        message: Option<String>,
        fare: Option<String>,
        #[serde(alias = "eta")]
        eta_text: Option<String>,
        eta_minutes: Option<u32>,
        booking_ref: Option<String>,
        callback_url: Option<String>,
    },
    Say {
        message: String,
    },
    Confirm {
        message: Option<String>,
        booking_ref: Option<String>,
    },
    Hangup {
        message: Option<String>,
    },
}
