//! Booking data model, precedence rules, and the step state machine (§3, §4.3).

pub mod model;
pub mod state_machine;
pub mod store;

pub use model::{
    Booking, FieldSource, QuestionSnapshot, Quote, Step, Transcript, TrackedField, TranscriptRole,
    UserTruth,
};
pub use state_machine::{compute_next_step, get_instruction};
pub use store::{BookingField, BookingStore, SetFieldOutcome};
