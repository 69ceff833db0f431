//! `setField` and the combined Booking/UserTruth record (§3, §4.3).

use super::model::{Booking, FieldSource, UserTruth};

/// One of the four required booking slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingField {
    Pickup,
    Destination,
    Passengers,
    Time,
}

/// Outcome of a `set_field` call, surfaced to the caller for logging and
/// for tool-output construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetFieldOutcome {
    Accepted,
    /// A lower-precedence source tried to overwrite a higher one.
    RejectedOutranked,
    /// The value failed field-specific validation (e.g. passenger count).
    RejectedInvalid(String),
}

const ADDRESS_KEYWORDS: &[&str] = &[
    "street", "st.", "road", "rd.", "avenue", "ave", "lane", "close", "drive",
    "way", "court", "crescent", "place", "square",
];

const NUMBER_WORDS: &[(&str, u32)] = &[
    ("one", 1), ("two", 2), ("three", 3), ("four", 4), ("five", 5),
    ("six", 6), ("seven", 7), ("eight", 8), ("nine", 9), ("ten", 10),
    ("eleven", 11), ("twelve", 12), ("thirteen", 13), ("fourteen", 14),
    ("fifteen", 15), ("sixteen", 16), ("seventeen", 17), ("eighteen", 18),
    ("nineteen", 19), ("twenty", 20),
];

/// Parse a passenger count from free text: digits ("3") or a spelled-out
/// number word ("three"). Returns `None` if no count can be found.
fn parse_passenger_count(text: &str) -> Option<u32> {
    let lower = text.to_ascii_lowercase();
    for token in lower.split_whitespace() {
        let cleaned: String = token.chars().filter(char::is_ascii_alphanumeric).collect();
        if let Ok(n) = cleaned.parse::<u32>() {
            return Some(n);
        }
        if let Some((_, n)) = NUMBER_WORDS.iter().find(|(w, _)| *w == cleaned) {
            return Some(*n);
        }
    }
    None
}

fn looks_like_address(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    text.len() > 30 || ADDRESS_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Combined booking ground-truth plus corrected-transcript record (§3).
#[derive(Debug, Clone, Default)]
pub struct BookingStore {
    pub booking: Booking,
    pub user_truth: UserTruth,
}

impl BookingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `field` from `raw_value` if `source` outranks the field's
    /// current source (or the field was empty). Passenger counts are
    /// parsed from free text, validated in `[1, 20]`, and rejected if the
    /// text looks like an address.
    pub fn set_field(
        &mut self,
        field: BookingField,
        raw_value: &str,
        source: FieldSource,
    ) -> SetFieldOutcome {
        let trimmed = raw_value.trim();
        match field {
            BookingField::Pickup => {
                if self.booking.pickup.set(trimmed.to_owned(), source) {
                    SetFieldOutcome::Accepted
                } else {
                    SetFieldOutcome::RejectedOutranked
                }
            }
            BookingField::Destination => {
                if self.booking.destination.set(trimmed.to_owned(), source) {
                    SetFieldOutcome::Accepted
                } else {
                    SetFieldOutcome::RejectedOutranked
                }
            }
            BookingField::Time => {
                let normalized = if trimmed.eq_ignore_ascii_case("asap")
                    || trimmed.eq_ignore_ascii_case("now")
                    || trimmed.eq_ignore_ascii_case("as soon as possible")
                {
                    "ASAP".to_owned()
                } else {
                    trimmed.to_owned()
                };
                if self.booking.pickup_time.set(normalized, source) {
                    SetFieldOutcome::Accepted
                } else {
                    SetFieldOutcome::RejectedOutranked
                }
            }
            BookingField::Passengers => {
                if looks_like_address(trimmed) {
                    return SetFieldOutcome::RejectedInvalid(
                        "passenger count looks like an address".to_owned(),
                    );
                }
                let Some(count) = parse_passenger_count(trimmed) else {
                    return SetFieldOutcome::RejectedInvalid(
                        "no passenger count found in text".to_owned(),
                    );
                };
                if !(1..=20).contains(&count) {
                    return SetFieldOutcome::RejectedInvalid(format!(
                        "passenger count {count} out of range [1, 20]"
                    ));
                }
                if self.booking.passengers.set(count, source) {
                    SetFieldOutcome::Accepted
                } else {
                    SetFieldOutcome::RejectedOutranked
                }
            }
        }
    }

    /// Record a corrected user transcript as ground truth for `field`,
    /// then mirror it into the booking at `FieldSource::UserTruth`
    /// precedence (§4.6 "write UserTruth for that slot, mirror into
    /// Booking").
    pub fn set_user_truth(&mut self, field: BookingField, raw_value: &str) -> SetFieldOutcome {
        let trimmed = raw_value.trim().to_owned();
        match field {
            BookingField::Pickup => self.user_truth.pickup = Some(trimmed.clone()),
            BookingField::Destination => self.user_truth.destination = Some(trimmed.clone()),
            BookingField::Time => self.user_truth.pickup_time = Some(trimmed.clone()),
            BookingField::Passengers => {
                if let Some(count) = parse_passenger_count(&trimmed) {
                    self.user_truth.passengers = Some(count);
                }
            }
        }
        self.set_field(field, &trimmed, FieldSource::UserTruth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_user_truth_over_heuristic() {
        let mut store = BookingStore::new();
        store.set_field(BookingField::Pickup, "52A David Road", FieldSource::Heuristic);
        let outcome = store.set_field(BookingField::Pickup, "10 Other Street", FieldSource::UserTruth);
        assert_eq!(outcome, SetFieldOutcome::Accepted);
        assert_eq!(store.booking.pickup.value.as_deref(), Some("10 Other Street"));
    }

    #[test]
    fn rejects_heuristic_over_user_truth() {
        let mut store = BookingStore::new();
        store.set_field(BookingField::Pickup, "52A David Road", FieldSource::UserTruth);
        let outcome = store.set_field(BookingField::Pickup, "hallucinated place", FieldSource::Heuristic);
        assert_eq!(outcome, SetFieldOutcome::RejectedOutranked);
        assert_eq!(store.booking.pickup.value.as_deref(), Some("52A David Road"));
    }

    #[test]
    fn parses_spelled_out_passenger_count() {
        let mut store = BookingStore::new();
        let outcome = store.set_field(BookingField::Passengers, "three", FieldSource::UserTruth);
        assert_eq!(outcome, SetFieldOutcome::Accepted);
        assert_eq!(store.booking.passengers.value, Some(3));
    }

    #[test]
    fn rejects_passenger_count_out_of_range() {
        let mut store = BookingStore::new();
        let outcome = store.set_field(BookingField::Passengers, "25", FieldSource::UserTruth);
        assert!(matches!(outcome, SetFieldOutcome::RejectedInvalid(_)));
    }

    #[test]
    fn rejects_address_shaped_passenger_value() {
        let mut store = BookingStore::new();
        let outcome = store.set_field(
            BookingField::Passengers,
            "7 Russell Street",
            FieldSource::ToolArg,
        );
        assert!(matches!(outcome, SetFieldOutcome::RejectedInvalid(_)));
    }

    #[test]
    fn normalizes_asap_synonyms() {
        let mut store = BookingStore::new();
        store.set_field(BookingField::Time, "now", FieldSource::UserTruth);
        assert_eq!(store.booking.pickup_time.value.as_deref(), Some("ASAP"));
    }

    #[test]
    fn user_truth_mirrors_into_booking() {
        let mut store = BookingStore::new();
        store.set_user_truth(BookingField::Destination, "7 Russell Street");
        assert_eq!(store.user_truth.destination.as_deref(), Some("7 Russell Street"));
        assert_eq!(store.booking.destination.value.as_deref(), Some("7 Russell Street"));
    }
}
