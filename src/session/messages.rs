//! Wire shapes for the bridge WebSocket and the upstream Realtime API (§6).

use serde::{Deserialize, Serialize};

/// Connection metadata a bridge may send once in-band instead of (or in
/// addition to) the WebSocket upgrade query string.
#[derive(Debug, Clone, Deserialize)]
pub struct CallStart {
    pub call_id: String,
    #[serde(default)]
    pub caller_phone: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

fn default_format() -> String {
    "mulaw".to_owned()
}

fn default_sample_rate() -> u32 {
    8_000
}

/// Messages received from the telephony bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeInbound {
    Start(CallStart),
    Audio {
        audio: String,
        #[serde(default)]
        format: Option<String>,
        #[serde(default)]
        sample_rate: Option<u32>,
    },
    /// Pre-encoded PCM16@24kHz audio the bridge has already transcoded for
    /// the upstream Realtime API, forwarded with minimal processing.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    Mark {
        name: String,
    },
    Stop {},
    Hangup {},
}

/// Messages sent to the telephony bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeOutbound {
    Audio { payload: String },
    Mark { name: String },
    Clear {},
    /// The assistant's in-flight response was cancelled by caller barge-in;
    /// the bridge should stop any audio it has already buffered for playout.
    AiInterrupted {},
    StopAudio {},
    /// Periodic liveness ping so intermediary proxies don't time the
    /// connection out during long silences (§5).
    Keepalive {},
    Error { message: String },
}

/// Client events sent upstream to the Realtime API.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: serde_json::Value },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear {},
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<serde_json::Value>,
    },
    #[serde(rename = "response.cancel")]
    ResponseCancel {},
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: serde_json::Value },
}

/// One function call requested by the model, with arguments still raw JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCallDone {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

/// Server events received from the Realtime API. Only the subset the
/// session engine acts on is modeled; anything else is dropped in
/// [`super::engine::SessionEngine::handle_upstream_event`]'s catch-all.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {},
    #[serde(rename = "session.updated")]
    SessionUpdated {},
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {},
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {},
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    UserTranscriptionCompleted { transcript: String },
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone {},
    #[serde(rename = "response.audio_transcript.delta")]
    AssistantTranscriptDelta { delta: String },
    #[serde(rename = "response.audio_transcript.done")]
    AssistantTranscriptDone { transcript: String },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone(FunctionCallDone),
    #[serde(rename = "response.done")]
    ResponseDone {},
    #[serde(rename = "error")]
    Error { error: serde_json::Value },
}
