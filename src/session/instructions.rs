//! Static system prompt and tool schema sent in `session.update` (§4.6).

use serde_json::{json, Value};

/// Base system prompt. The per-turn "ask exactly this next question"
/// override comes from [`crate::booking::get_instruction`] and is appended
/// by the caller, not baked in here.
#[must_use]
pub fn base_instructions() -> String {
    "You are a taxi booking assistant speaking with a caller over the phone. \
     Collect pickup address, destination, passenger count, and pickup time, one \
     question at a time. Call sync_booking_data whenever the caller states or \
     corrects any of those fields. Once all fields are collected, summarize the \
     booking and ask the caller to confirm, then call book_taxi. Never state a \
     fare or arrival time unless it was given to you by a tool result. If the \
     caller asks to cancel, confirm they mean it before calling cancel_booking."
        .to_owned()
}

/// Tool schema array for the `session.update` payload.
#[must_use]
pub fn tool_definitions() -> Value {
    json!([
        {
            "type": "function",
            "name": "sync_booking_data",
            "description": "Record or correct one or more booking fields as stated by the caller.",
            "parameters": {
                "type": "object",
                "properties": {
                    "pickup": {"type": "string"},
                    "destination": {"type": "string"},
                    "passengers": {"type": "string"},
                    "pickup_time": {"type": "string"},
                    "special_requirements": {"type": "string"}
                }
            }
        },
        {
            "type": "function",
            "name": "book_taxi",
            "description": "Request a fare quote once all fields are collected, or confirm the booking after the caller accepts the quote.",
            "parameters": {
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["request_quote", "confirmed"]}
                },
                "required": ["action"]
            }
        },
        {
            "type": "function",
            "name": "cancel_booking",
            "description": "Cancel the in-progress booking. Call with confirm=false first to double-check intent, confirm=true to actually cancel.",
            "parameters": {
                "type": "object",
                "properties": {
                    "confirm": {"type": "boolean"}
                },
                "required": ["confirm"]
            }
        },
        {
            "type": "function",
            "name": "end_call",
            "description": "End the call after the booking is confirmed or the caller hangs up the conversation.",
            "parameters": {
                "type": "object",
                "properties": {
                    "reason": {"type": "string"}
                }
            }
        }
    ])
}

/// Build the `session` object for `session.update`.
#[must_use]
pub fn session_update_payload(
    voice: &str,
    instructions: &str,
    vad_threshold: f32,
    vad_prefix_ms: u32,
    vad_silence_ms: u32,
    temperature: f32,
) -> Value {
    json!({
        "modalities": ["audio", "text"],
        "voice": voice,
        "instructions": instructions,
        "input_audio_format": "pcm16",
        "output_audio_format": "pcm16",
        "turn_detection": {
            "type": "server_vad",
            "threshold": vad_threshold,
            "prefix_padding_ms": vad_prefix_ms,
            "silence_duration_ms": vad_silence_ms
        },
        "temperature": temperature,
        "tools": tool_definitions(),
        "tool_choice": "auto"
    })
}
