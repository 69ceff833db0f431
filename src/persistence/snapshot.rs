//! The JSON shape persisted for a call (§4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::booking::{Booking, Quote, Step, Transcript};

/// Everything about a call worth persisting for reconciliation/audit. The
/// engine calls [`crate::persistence::PersistenceStore::upsert_call`] with
/// a fresh snapshot whenever booking state changes; the store decides when
/// that actually hits the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub call_id: String,
    pub step: Step,
    pub booking: Booking,
    pub transcripts: Vec<Transcript>,
    pub quote: Option<Quote>,
    pub booking_confirmed: bool,
    pub updated_at: DateTime<Utc>,
}
