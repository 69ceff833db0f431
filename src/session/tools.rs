//! Parsing and dispatch of model-invoked tool calls (§4.6).

use serde::Deserialize;

use crate::error::{GatewayError, Result};

/// `book_taxi` tool's `action` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookTaxiAction {
    RequestQuote,
    Confirmed,
}

#[derive(Debug, Clone, Deserialize)]
struct SyncBookingDataArgs {
    #[serde(default)]
    pickup: Option<String>,
    #[serde(default)]
    destination: Option<String>,
    #[serde(default)]
    passengers: Option<String>,
    #[serde(default)]
    pickup_time: Option<String>,
    #[serde(default)]
    special_requirements: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct BookTaxiArgs {
    action: BookTaxiAction,
}

#[derive(Debug, Clone, Deserialize)]
struct CancelBookingArgs {
    #[serde(default)]
    confirm: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct EndCallArgs {
    #[serde(default)]
    reason: Option<String>,
}

/// A parsed, type-checked tool invocation.
#[derive(Debug, Clone)]
pub enum ToolCall {
    SyncBookingData {
        pickup: Option<String>,
        destination: Option<String>,
        passengers: Option<String>,
        pickup_time: Option<String>,
        special_requirements: Option<String>,
    },
    BookTaxi {
        action: BookTaxiAction,
    },
    CancelBooking {
        confirm: bool,
    },
    EndCall {
        reason: Option<String>,
    },
}

/// Parse `name`/`arguments` (the Realtime API's raw JSON argument string)
/// into a [`ToolCall`]. Unknown tool names or malformed JSON are reported
/// as [`GatewayError::Session`] so the engine can send a function-call
/// error output back upstream instead of silently dropping the call.
pub fn parse_tool_call(name: &str, arguments: &str) -> Result<ToolCall> {
    match name {
        "sync_booking_data" => {
            let args: SyncBookingDataArgs = serde_json::from_str(arguments)
                .map_err(|e| GatewayError::Session(format!("sync_booking_data args: {e}")))?;
            Ok(ToolCall::SyncBookingData {
                pickup: args.pickup,
                destination: args.destination,
                passengers: args.passengers,
                pickup_time: args.pickup_time,
                special_requirements: args.special_requirements,
            })
        }
        "book_taxi" => {
            let args: BookTaxiArgs = serde_json::from_str(arguments)
                .map_err(|e| GatewayError::Session(format!("book_taxi args: {e}")))?;
            Ok(ToolCall::BookTaxi { action: args.action })
        }
        "cancel_booking" => {
            let args: CancelBookingArgs = serde_json::from_str(arguments)
                .map_err(|e| GatewayError::Session(format!("cancel_booking args: {e}")))?;
            Ok(ToolCall::CancelBooking { confirm: args.confirm })
        }
        "end_call" => {
            let args: EndCallArgs = serde_json::from_str(arguments)
                .map_err(|e| GatewayError::Session(format!("end_call args: {e}")))?;
            Ok(ToolCall::EndCall { reason: args.reason })
        }
        other => Err(GatewayError::Session(format!("unknown tool: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sync_booking_data() {
        let call = parse_tool_call(
            "sync_booking_data",
            r#"{"pickup":"52A David Road","passengers":"three"}"#,
        )
        .unwrap();
        match call {
            ToolCall::SyncBookingData { pickup, passengers, .. } => {
                assert_eq!(pickup.as_deref(), Some("52A David Road"));
                assert_eq!(passengers.as_deref(), Some("three"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_book_taxi_action() {
        let call = parse_tool_call("book_taxi", r#"{"action":"request_quote"}"#).unwrap();
        assert!(matches!(
            call,
            ToolCall::BookTaxi { action: BookTaxiAction::RequestQuote }
        ));
    }

    #[test]
    fn rejects_unknown_tool() {
        assert!(parse_tool_call("frobnicate", "{}").is_err());
    }

    #[test]
    fn rejects_malformed_arguments() {
        assert!(parse_tool_call("book_taxi", "{not json").is_err());
    }
}
