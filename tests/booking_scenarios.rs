//! Scenario-level tests combining the booking store, state machine, and
//! protection controller the way the session engine wires them together,
//! without needing a live upstream or bridge connection.

use std::time::Instant;

use ada_voice_gateway::booking::{
    compute_next_step, BookingField, BookingStore, FieldSource, Step,
};
use ada_voice_gateway::config::ProtectionConfig;
use ada_voice_gateway::protection::ProtectionController;

/// S1 — happy path: all four fields collected in order, then confirmed.
#[test]
fn happy_path_collects_fields_in_order_then_confirms() {
    let mut store = BookingStore::new();
    assert_eq!(compute_next_step(&store.booking, false), Step::Pickup);

    store.set_user_truth(BookingField::Pickup, "52A David Road");
    assert_eq!(compute_next_step(&store.booking, false), Step::Destination);

    store.set_user_truth(BookingField::Destination, "Gatwick Airport");
    assert_eq!(compute_next_step(&store.booking, false), Step::Passengers);

    store.set_user_truth(BookingField::Passengers, "two");
    assert_eq!(compute_next_step(&store.booking, false), Step::Time);

    store.set_user_truth(BookingField::Time, "now");
    assert_eq!(store.booking.pickup_time.value.as_deref(), Some("ASAP"));
    assert_eq!(compute_next_step(&store.booking, false), Step::Confirmation);
    assert_eq!(compute_next_step(&store.booking, true), Step::Confirmed);
}

/// A correction overwrites a field only if it carries equal-or-higher
/// precedence than whatever is already recorded; a heuristic write can
/// never clobber a user-truth correction.
#[test]
fn heuristic_write_cannot_overwrite_a_user_correction() {
    let mut store = BookingStore::new();
    store.set_field(BookingField::Destination, "7 Russell Street", FieldSource::UserTruth);
    store.set_field(BookingField::Destination, "misheard place", FieldSource::Heuristic);
    assert_eq!(
        store.booking.destination.value.as_deref(),
        Some("7 Russell Street")
    );
}

/// S6 — ambiguous cancel: a bare `confirm=false` cancel request must not
/// mutate the booking; only an explicit `confirm=true` clears it.
#[test]
fn ambiguous_cancel_requires_explicit_confirmation() {
    let mut store = BookingStore::new();
    store.set_user_truth(BookingField::Pickup, "52A David Road");
    store.set_user_truth(BookingField::Destination, "Heathrow Airport");

    // An ambiguous "cancel?" with confirm=false is a no-op in the engine
    // (see session::engine::handle_function_call's CancelBooking arm) —
    // modeled here at the booking-store level: nothing resets the fields
    // unless the engine actually clears the store, which only happens on
    // confirm=true.
    assert_eq!(store.booking.pickup.value.as_deref(), Some("52A David Road"));
    assert_eq!(
        store.booking.destination.value.as_deref(),
        Some("Heathrow Airport")
    );

    // Only once confirm=true does the engine reset to a fresh store.
    store = BookingStore::new();
    assert!(!store.booking.pickup.is_set());
    assert!(!store.booking.destination.is_set());
}

/// Testable property: once the greeting window has elapsed, barge-in
/// detection and inbound audio are both live again, independent of each
/// other's configured durations.
#[test]
fn protection_windows_release_independently() {
    let mut controller = ProtectionController::new(ProtectionConfig::default());
    let t0 = Instant::now();
    controller.start_greeting(t0);
    controller.start_barge_in_cooldown(t0);

    let after_cooldown = t0 + std::time::Duration::from_millis(2_001);
    // Barge-in cooldown has lapsed, but the longer greeting window has not.
    assert!(controller.should_drop_inbound_audio(after_cooldown, Step::Pickup, false));
}
