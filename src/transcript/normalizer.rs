//! Static, case-insensitive rewrites for common telephony mishearings, plus
//! phantom-transcript and price/ETA-hallucination detection.
//!
//! All functions are pure and side-effect free; `correct` is idempotent and
//! `is_phantom` is monotone for a fixed input (it never flips back to
//! `false` once an earlier call on the same text returned `true`, because
//! the classification only reads the text itself).

use once_cell::sync::Lazy;
use regex::Regex;

/// Common telephony mishearings, longest pattern first so multi-word
/// phrases win over single-word substrings.
const REWRITE_MAP: &[(&str, &str)] = &[
    ("gatwick airport", "Gatwick Airport"),
    ("heathrow airport", "Heathrow Airport"),
    ("ay sap", "ASAP"),
    ("as soon as possible", "ASAP"),
    ("strait", "Street"),
    ("lain", "Lane"),
];

static REWRITE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    let mut entries: Vec<(&str, &str)> = REWRITE_MAP.to_vec();
    entries.sort_by_key(|(from, _)| std::cmp::Reverse(from.len()));
    entries
        .into_iter()
        .filter_map(|(from, to)| {
            let escaped = regex::escape(from);
            Regex::new(&format!(r"(?i)\b{escaped}\b"))
                .ok()
                .map(|re| (re, to))
        })
        .collect()
});

static ALPHANUMERIC_JOIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d+)\s+([A-Za-z])(?:\s*(bee|bee's|dee|ay|cee))?\b").unwrap());

static URL_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+|\S+\.(?:com|org|net|co\.uk)\b").unwrap());

static GIBBERISH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[bcdfghjklmnpqrstvwxz]{5,}$").unwrap());

static PRICE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)£\s*\d+(\.\d{2})?|\b\d+(\.\d{2})?\s*pounds?\b|\bfare\s+is\s+\d").unwrap()
});

static ETA_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b\d+\s*minutes?\b|\barrive\s+in\s+\d+").unwrap());

static CONFIRMATION_CLAIM_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\byour (taxi|booking|ride) (is|has been) (confirmed|booked)\b|\bbooking (is )?confirmed\b|\byou'?re all set\b|\bi'?ve (confirmed|booked) (your|the) (taxi|booking|ride)\b",
    )
    .unwrap()
});

static PLACEHOLDER_LEAK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\b(actual|insert|fare|eta|placeholder)\b[^\]]*\]|\{\{[^}]*\}\}").unwrap());

const HALLUCINATION_SUBSTRINGS: &[&str] = &[
    "thank you for watching",
    "subscribe to my channel",
    "please like and subscribe",
    "see you in the next video",
];

const CAPS_ALLOWLIST: &[&str] = &["ASAP", "NOW", "YES", "NO", "OK"];

/// Apply the static rewrite map over common telephony mishearings.
/// Idempotent: running it twice on its own output is a no-op.
#[must_use]
pub fn correct(text: &str) -> String {
    let mut out = text.to_owned();
    for (pattern, replacement) in REWRITE_PATTERNS.iter() {
        out = pattern.replace_all(&out, *replacement).into_owned();
    }
    out
}

/// Rewrite `\d+\s+[A-Za-z]` (optionally with a phonetic suffix like "bee")
/// into a single joined token, e.g. `"52 A"` -> `"52A"`, `"7 bee"` -> `"7B"`.
#[must_use]
pub fn join_alphanumeric(text: &str) -> String {
    ALPHANUMERIC_JOIN
        .replace_all(text, |caps: &regex::Captures<'_>| {
            format!("{}{}", &caps[1], caps[2].to_ascii_uppercase())
        })
        .into_owned()
}

/// Returns `true` if `text` looks like a hallucinated / non-useful
/// transcript rather than real caller speech.
#[must_use]
pub fn is_phantom(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < 2 {
        return true;
    }

    let lower = trimmed.to_ascii_lowercase();
    if HALLUCINATION_SUBSTRINGS.iter().any(|s| lower.contains(s)) {
        return true;
    }

    if URL_LIKE.is_match(trimmed) {
        return true;
    }

    let total = trimmed.chars().count();
    let non_latin = trimmed
        .chars()
        .filter(|c| !c.is_ascii() && !is_accented_latin(*c))
        .count();
    if total > 0 && non_latin * 2 > total {
        return true;
    }

    let is_all_caps_token = trimmed.chars().all(|c| !c.is_alphabetic() || c.is_uppercase())
        && trimmed.chars().any(char::is_alphabetic)
        && trimmed.split_whitespace().count() == 1;
    if is_all_caps_token && !CAPS_ALLOWLIST.contains(&trimmed) {
        return true;
    }

    if total > 100 {
        let domain_tokens = trimmed
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .count();
        let word_count = trimmed.split_whitespace().count().max(1);
        if (domain_tokens as f32 / word_count as f32) < 0.2 {
            return true;
        }
    }

    if GIBBERISH.is_match(&lower) {
        return true;
    }

    false
}

fn is_accented_latin(c: char) -> bool {
    matches!(c,
        'à'..='ÿ' | 'À'..='Ÿ'
    )
}

/// Returns `true` if `text` states a price or ETA while no real quote has
/// been delivered yet (`have_real_quote == false`).
#[must_use]
pub fn is_price_or_eta_hallucination(text: &str, have_real_quote: bool) -> bool {
    if have_real_quote {
        return false;
    }
    PRICE_PATTERN.is_match(text) || ETA_PATTERN.is_match(text)
}

/// Returns `true` if `text` claims the booking is confirmed (or leaks a
/// template placeholder like `[use actual fare]`) without the caller having
/// actually invoked `book_taxi(confirmed)` this turn.
#[must_use]
pub fn contains_unconfirmed_claim(text: &str) -> bool {
    CONFIRMATION_CLAIM_PATTERN.is_match(text) || PLACEHOLDER_LEAK_PATTERN.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_is_idempotent() {
        let once = correct("we're going to gatwick airport ay sap");
        let twice = correct(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn correct_rewrites_known_mishearing() {
        assert_eq!(correct("gatwick airport please"), "Gatwick Airport please");
    }

    #[test]
    fn join_alphanumeric_joins_digit_and_letter() {
        assert_eq!(join_alphanumeric("52 A David Road"), "52A David Road");
    }

    #[test]
    fn join_alphanumeric_handles_phonetic_suffix() {
        assert_eq!(join_alphanumeric("7 bee Russell Street"), "7B Russell Street");
    }

    #[test]
    fn phantom_rejects_short_text() {
        assert!(is_phantom("h"));
    }

    #[test]
    fn phantom_rejects_known_hallucination() {
        assert!(is_phantom("Thank you for watching!"));
    }

    #[test]
    fn phantom_rejects_urls() {
        assert!(is_phantom("visit www.example.com for more"));
    }

    #[test]
    fn phantom_allows_allowlisted_caps_token() {
        assert!(!is_phantom("ASAP"));
    }

    #[test]
    fn phantom_rejects_other_all_caps_token() {
        assert!(is_phantom("BANANA"));
    }

    #[test]
    fn phantom_allows_normal_address() {
        assert!(!is_phantom("52A David Road"));
    }

    #[test]
    fn price_hallucination_detected_without_quote() {
        assert!(is_price_or_eta_hallucination("the fare is £9", false));
    }

    #[test]
    fn price_hallucination_suppressed_with_real_quote() {
        assert!(!is_price_or_eta_hallucination("the fare is £9", true));
    }

    #[test]
    fn eta_hallucination_detected() {
        assert!(is_price_or_eta_hallucination("we will arrive in 6 minutes", false));
    }

    #[test]
    fn confirmation_claim_detected() {
        assert!(contains_unconfirmed_claim("Great, your booking is confirmed!"));
        assert!(contains_unconfirmed_claim("You're all set, see you soon."));
    }

    #[test]
    fn placeholder_leak_detected() {
        assert!(contains_unconfirmed_claim("Your fare is [use actual fare]."));
    }

    #[test]
    fn ordinary_speech_is_not_a_confirmation_claim() {
        assert!(!contains_unconfirmed_claim("Can you confirm the pickup address?"));
    }
}
