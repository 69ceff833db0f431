//! `computeNextStep` / `getInstruction` (§4.3).

use super::model::{Booking, Step};

/// Returns the first unfilled slot among {pickup, destination, passengers,
/// time}; once all four are set, `confirmation` until confirmation is
/// transacted, then `confirmed`. Steps never skip forward over an unset
/// field; corrections may move the step backward (§3, §4.3).
#[must_use]
pub fn compute_next_step(booking: &Booking, confirmed: bool) -> Step {
    if !booking.pickup.is_set() {
        return Step::Pickup;
    }
    if !booking.destination.is_set() {
        return Step::Destination;
    }
    if !booking.passengers.is_set() {
        return Step::Passengers;
    }
    if !booking.pickup_time.is_set() {
        return Step::Time;
    }
    if confirmed {
        Step::Confirmed
    } else {
        Step::Confirmation
    }
}

/// Canonical prompt the engine injects to request exactly the next
/// question for `step`.
#[must_use]
pub fn get_instruction(step: Step, booking: &Booking) -> String {
    match step {
        Step::Pickup => "Ask the caller for their pickup address.".to_owned(),
        Step::Destination => "Ask the caller where they are going.".to_owned(),
        Step::Passengers => "Ask the caller how many passengers are travelling.".to_owned(),
        Step::Time => "Ask the caller when they would like to be picked up, or if it should be ASAP.".to_owned(),
        Step::Confirmation => format!(
            "Summarize the booking (pickup: {}, destination: {}, passengers: {}, time: {}) and ask the caller to confirm.",
            booking.pickup.value.as_deref().unwrap_or("unknown"),
            booking.destination.value.as_deref().unwrap_or("unknown"),
            booking
                .passengers
                .value
                .map_or_else(|| "unknown".to_owned(), |p| p.to_string()),
            booking.pickup_time.value.as_deref().unwrap_or("unknown"),
        ),
        Step::Confirmed => "Thank the caller and read the closing script.".to_owned(),
        Step::None => String::new(),
    }
}
