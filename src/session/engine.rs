//! The per-call actor: owns booking state, protection windows, the
//! upstream Realtime API connection, and dispatch coordination, and is
//! the single writer for all of them (§4.6, §5).

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as BridgeMessage, WebSocket};
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tracing::{info, warn};

use crate::audio::{auto_gain, decode_mulaw, decode_pcm16, pre_emphasis, resample, rms};
use crate::booking::{
    compute_next_step, get_instruction, BookingField, BookingStore, FieldSource, QuestionSnapshot,
    Quote, Step, Transcript, TranscriptRole,
};
use crate::config::GatewayConfig;
use crate::dispatch::{
    ChannelRegistry, DispatchCoordinator, DispatchEvent, DispatchTransport, QuoteRequestFields,
};
use crate::error::Result;
use crate::persistence::{CallSnapshot, PersistenceStore};
use crate::protection::{ProtectionController, SummaryKind};
use crate::transcript::{contains_unconfirmed_claim, correct, is_phantom, is_price_or_eta_hallucination};

use super::instructions::{base_instructions, session_update_payload};
use super::io::{BridgeSender, UpstreamSender, UpstreamSocket};
use super::messages::{BridgeInbound, BridgeOutbound, FunctionCallDone, UpstreamServerEvent};
use super::timers::{TimerEvent, TimerId, TimerSet};
use super::tools::{parse_tool_call, BookTaxiAction, ToolCall};

fn step_to_field(step: Step) -> Option<BookingField> {
    match step {
        Step::Pickup => Some(BookingField::Pickup),
        Step::Destination => Some(BookingField::Destination),
        Step::Passengers => Some(BookingField::Passengers),
        Step::Time => Some(BookingField::Time),
        Step::Confirmation | Step::Confirmed | Step::None => None,
    }
}

fn looks_affirmative(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["yes", "yeah", "yep", "correct", "that's right", "confirm", "sounds good"]
        .iter()
        .any(|w| lower.contains(w))
}

const SILENCE_PHRASE: &str = "One moment, I'm checking that for you.";
const CORRECTIVE_PHRASE: &str = "I'm just checking that for you now.";
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(12);
const MAX_SESSION: Duration = Duration::from_secs(600);

/// Everything the actor needs to talk to the outside world, split out so
/// [`SessionEngine::new`] stays readable.
pub struct SessionHandles {
    pub call_id: String,
    pub bridge: WebSocket,
    pub upstream: UpstreamSocket,
    pub dispatch_transport: Arc<dyn DispatchTransport>,
    pub dispatch_registry: Arc<ChannelRegistry>,
    pub persistence: Arc<dyn PersistenceStore>,
    pub config: GatewayConfig,
}

/// One call's dialog state and I/O.
pub struct SessionEngine {
    call_id: String,
    config: GatewayConfig,
    store: BookingStore,
    step: Step,
    question_snapshot: QuestionSnapshot,
    protection: ProtectionController,
    response_active: bool,
    awaiting_confirmation: bool,
    /// Set while a `book_taxi(request_quote)` call is outstanding; every
    /// `response.create` is gated to a single "one moment" utterance until
    /// the quote arrives (§4.6).
    waiting_for_quote_silence: bool,
    /// Set once an anti-hallucination guard has cancelled the current
    /// response, so the (already-cancelled) transcript isn't also persisted
    /// and the guard doesn't re-fire on every subsequent delta of the same
    /// response.
    hallucination_guard_tripped: bool,
    /// Set when `book_taxi(confirmed)` is actually invoked, so a
    /// confirmation claim spoken afterwards isn't flagged as hallucinated.
    /// Reset at the start of each user turn (`speech_started`).
    confirmed_tool_called_this_turn: bool,
    quote_in_flight: bool,
    quote: Option<Quote>,
    booking_confirmed: bool,
    session_configured: bool,
    assistant_transcript_buffer: String,
    transcripts: Vec<Transcript>,
    persistence: Arc<dyn PersistenceStore>,
    dispatch: DispatchCoordinator,
    dispatch_events: mpsc::UnboundedReceiver<DispatchEvent>,
    timers: TimerSet,
}

impl SessionEngine {
    fn new(
        call_id: String,
        config: GatewayConfig,
        dispatch_transport: Arc<dyn DispatchTransport>,
        dispatch_registry: Arc<ChannelRegistry>,
        persistence: Arc<dyn PersistenceStore>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let dispatch = DispatchCoordinator::new(
            call_id.clone(),
            config.dispatch.clone(),
            dispatch_transport,
            dispatch_registry,
            event_tx,
        );
        Self {
            call_id,
            protection: ProtectionController::new(config.protection.clone()),
            config,
            store: BookingStore::new(),
            step: Step::Pickup,
            question_snapshot: QuestionSnapshot::default(),
            response_active: false,
            awaiting_confirmation: false,
            waiting_for_quote_silence: false,
            hallucination_guard_tripped: false,
            confirmed_tool_called_this_turn: false,
            quote_in_flight: false,
            quote: None,
            booking_confirmed: false,
            session_configured: false,
            assistant_transcript_buffer: String::new(),
            transcripts: Vec::new(),
            persistence,
            dispatch,
            dispatch_events: event_rx,
            timers: TimerSet::new(),
        }
    }

    fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            call_id: self.call_id.clone(),
            step: self.step,
            booking: self.store.booking.clone(),
            transcripts: self.transcripts.clone(),
            quote: self.quote.clone(),
            booking_confirmed: self.booking_confirmed,
            updated_at: chrono::Utc::now(),
        }
    }

    fn recompute_step(&mut self) {
        self.step = compute_next_step(&self.store.booking, self.booking_confirmed);
    }

    fn push_transcript(&mut self, role: TranscriptRole, text: String) {
        self.transcripts.push(Transcript {
            role,
            text,
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Run one call end to end: connects upstream, configures the session,
/// and drives the actor loop until either side closes or `end_call` fires.
///
/// # Errors
///
/// Returns an error if the upstream WebSocket cannot be established.
pub async fn run(handles: SessionHandles) -> Result<()> {
    let SessionHandles {
        call_id,
        bridge,
        upstream,
        dispatch_transport,
        dispatch_registry,
        persistence,
        config,
    } = handles;

    let mut engine = SessionEngine::new(
        call_id.clone(),
        config,
        dispatch_transport,
        dispatch_registry,
        persistence,
    );

    let (mut bridge_tx, mut bridge_rx) = bridge.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let session_payload = session_update_payload(
        &engine.config.upstream.voice,
        &base_instructions(),
        engine.config.upstream.vad_threshold,
        engine.config.upstream.vad_prefix_ms,
        engine.config.upstream.vad_silence_ms,
        engine.config.upstream.temperature,
    );
    upstream_tx
        .send_json(&json!({"type": "session.update", "session": session_payload}))
        .await?;
    engine.protection.start_greeting(Instant::now());

    let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();
    engine.timers.start(
        TimerId::GreetingFallback,
        Duration::from_millis(engine.config.upstream.greeting_fallback_ms),
        true,
        timer_tx.clone(),
    );
    engine
        .timers
        .start(TimerId::Keepalive, KEEPALIVE_INTERVAL, true, timer_tx.clone());
    engine
        .timers
        .start(TimerId::MaxSession, MAX_SESSION, false, timer_tx);

    loop {
        tokio::select! {
            bridge_msg = bridge_rx.next() => {
                match bridge_msg {
                    Some(Ok(BridgeMessage::Text(text))) => {
                        match handle_bridge_text(&mut engine, &mut upstream_tx, &mut bridge_tx, &text).await {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => warn!(call_id = %engine.call_id, %err, "bridge message handling failed"),
                        }
                    }
                    Some(Ok(BridgeMessage::Binary(bytes))) => {
                        if let Err(err) = handle_inbound_binary_audio(&mut engine, &mut upstream_tx, &mut bridge_tx, &bytes).await {
                            warn!(call_id = %engine.call_id, %err, "binary bridge audio handling failed");
                        }
                    }
                    Some(Ok(BridgeMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(call_id = %engine.call_id, %err, "bridge socket error");
                        break;
                    }
                }
            }
            upstream_msg = upstream_rx.next() => {
                match upstream_msg {
                    Some(Ok(UpstreamMessage::Text(text))) => {
                        if let Err(err) = handle_upstream_text(&mut engine, &mut upstream_tx, &mut bridge_tx, &text).await {
                            warn!(call_id = %engine.call_id, %err, "upstream message handling failed");
                        }
                    }
                    Some(Ok(UpstreamMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(call_id = %engine.call_id, %err, "upstream socket error");
                        break;
                    }
                }
            }
            event = engine.dispatch_events.recv() => {
                if let Some(event) = event {
                    if let Err(err) = handle_dispatch_event(&mut engine, &mut upstream_tx, event).await {
                        warn!(call_id = %engine.call_id, %err, "dispatch event handling failed");
                    }
                }
            }
            Some(TimerEvent(id)) = timer_rx.recv() => {
                match id {
                    TimerId::GreetingFallback => {
                        if !engine.session_configured {
                            warn!(call_id = %engine.call_id, "session.updated not observed in time, resending session config");
                            trigger_response(&mut upstream_tx, engine.waiting_for_quote_silence, None).await.ok();
                        }
                    }
                    TimerId::Keepalive => {
                        bridge_tx.send_frame(&BridgeOutbound::Keepalive {}).await.ok();
                    }
                    TimerId::MaxSession => {
                        warn!(call_id = %engine.call_id, "max session duration reached, ending call");
                        break;
                    }
                }
            }
        }
    }

    engine.timers.cancel_all();
    engine.dispatch.cancel();
    engine.persistence.immediate_flush(&engine.call_id).await;
    Ok(())
}

async fn handle_bridge_text(
    engine: &mut SessionEngine,
    upstream_tx: &mut dyn UpstreamSender,
    bridge_tx: &mut dyn BridgeSender,
    text: &str,
) -> Result<bool> {
    use crate::error::GatewayError;
    let inbound: BridgeInbound = serde_json::from_str(text)
        .map_err(|e| GatewayError::Bridge(format!("malformed inbound frame: {e}")))?;
    match inbound {
        BridgeInbound::Start(_) | BridgeInbound::Mark { .. } => Ok(false),
        BridgeInbound::Stop {} | BridgeInbound::Hangup {} => Ok(true),
        BridgeInbound::Audio { audio, format, sample_rate } => {
            handle_inbound_audio(engine, upstream_tx, bridge_tx, &audio, format.as_deref(), sample_rate).await?;
            Ok(false)
        }
        BridgeInbound::InputAudioBufferAppend { audio } => {
            handle_preencoded_audio(engine, upstream_tx, bridge_tx, &audio).await?;
            Ok(false)
        }
    }
}

/// Common gating/barge-in/forwarding pipeline for inbound caller audio,
/// regardless of which bridge wire shape it arrived in (§4.1, §4.4).
async fn process_inbound_samples(
    engine: &mut SessionEngine,
    upstream_tx: &mut dyn UpstreamSender,
    bridge_tx: &mut dyn BridgeSender,
    mut samples: Vec<i16>,
    source_rate: u32,
) -> Result<()> {
    use base64::Engine as _;
    let now = Instant::now();
    if engine
        .protection
        .should_drop_inbound_audio(now, engine.step, engine.awaiting_confirmation)
    {
        return Ok(());
    }

    let frame_rms = rms(&samples);
    if engine.protection.should_barge_in(now, engine.response_active, frame_rms) {
        upstream_tx.send_json(&json!({"type": "response.cancel"})).await.ok();
        bridge_tx.send_frame(&BridgeOutbound::AiInterrupted {}).await.ok();
        bridge_tx.send_frame(&BridgeOutbound::StopAudio {}).await.ok();
        engine.response_active = false;
        engine.hallucination_guard_tripped = false;
        engine.assistant_transcript_buffer.clear();
        engine.protection.start_barge_in_cooldown(now);
    }

    let audio_cfg = &engine.config.audio;
    auto_gain(
        &mut samples,
        audio_cfg.auto_gain_floor,
        audio_cfg.auto_gain_target,
        audio_cfg.auto_gain_max,
    );
    if audio_cfg.pre_emphasis_enabled {
        samples = pre_emphasis(&samples);
    }
    let resampled = resample(&samples, source_rate, audio_cfg.upstream_rate)?;

    let pcm_bytes: Vec<u8> = resampled.iter().flat_map(|s| s.to_le_bytes()).collect();
    let encoded = base64::engine::general_purpose::STANDARD.encode(pcm_bytes);
    upstream_tx
        .send_json(&json!({"type": "input_audio_buffer.append", "audio": encoded}))
        .await
}

async fn handle_inbound_audio(
    engine: &mut SessionEngine,
    upstream_tx: &mut dyn UpstreamSender,
    bridge_tx: &mut dyn BridgeSender,
    payload_b64: &str,
    format: Option<&str>,
    sample_rate: Option<u32>,
) -> Result<()> {
    use crate::error::GatewayError;
    use base64::Engine as _;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload_b64)
        .map_err(|e| GatewayError::Audio(format!("invalid base64 audio: {e}")))?;

    let is_pcm16 = matches!(format, Some(f) if f.eq_ignore_ascii_case("pcm16"));
    let (samples, source_rate) = if is_pcm16 {
        let rate = sample_rate.unwrap_or(engine.config.audio.wideband_rate);
        (decode_pcm16(&bytes)?, rate)
    } else {
        (decode_mulaw(&bytes), engine.config.audio.narrowband_rate)
    };

    process_inbound_samples(engine, upstream_tx, bridge_tx, samples, source_rate).await
}

async fn handle_preencoded_audio(
    engine: &mut SessionEngine,
    upstream_tx: &mut dyn UpstreamSender,
    bridge_tx: &mut dyn BridgeSender,
    payload_b64: &str,
) -> Result<()> {
    use crate::error::GatewayError;
    use base64::Engine as _;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload_b64)
        .map_err(|e| GatewayError::Audio(format!("invalid base64 audio: {e}")))?;
    let samples = decode_pcm16(&bytes)?;
    let upstream_rate = engine.config.audio.upstream_rate;
    process_inbound_samples(engine, upstream_tx, bridge_tx, samples, upstream_rate).await
}

/// Binary bridge frames: 160/320-byte chunks are µ-law@8kHz (the common
/// 20/40ms telephony frame sizes); anything else is treated as raw
/// PCM16 at the upstream rate (§6).
async fn handle_inbound_binary_audio(
    engine: &mut SessionEngine,
    upstream_tx: &mut dyn UpstreamSender,
    bridge_tx: &mut dyn BridgeSender,
    bytes: &[u8],
) -> Result<()> {
    let (samples, source_rate) = if bytes.len() == 160 || bytes.len() == 320 {
        (decode_mulaw(bytes), engine.config.audio.narrowband_rate)
    } else {
        (decode_pcm16(bytes)?, engine.config.audio.upstream_rate)
    };
    process_inbound_samples(engine, upstream_tx, bridge_tx, samples, source_rate).await
}

/// Cancel the in-flight response and instruct the model to say only a
/// short corrective line, used by every anti-hallucination guard (§4.6).
async fn cancel_and_correct(
    upstream_tx: &mut dyn UpstreamSender,
    engine: &mut SessionEngine,
    reason: &'static str,
) -> Result<()> {
    engine.response_active = false;
    warn!(call_id = %engine.call_id, reason, "anti-hallucination guard tripped, cancelling response");
    upstream_tx.send_json(&json!({"type": "response.cancel"})).await.ok();
    upstream_tx.send_json(&json!({"type": "input_audio_buffer.clear"})).await.ok();
    upstream_tx
        .send_json(&json!({
            "type": "response.create",
            "response": {"instructions": format!("Say exactly: \"{CORRECTIVE_PHRASE}\" and nothing else.")}
        }))
        .await
}

/// Every `response.create` call site routes through here so the
/// quote-silence sub-state (§4.6) is enforced uniformly.
async fn trigger_response(
    upstream_tx: &mut dyn UpstreamSender,
    waiting_for_quote_silence: bool,
    instructions_override: Option<&str>,
) -> Result<()> {
    if waiting_for_quote_silence {
        return upstream_tx
            .send_json(&json!({
                "type": "response.create",
                "response": {"instructions": format!("Say only: \"{SILENCE_PHRASE}\" Do not say anything else.")}
            }))
            .await;
    }
    match instructions_override {
        Some(instructions) => {
            upstream_tx
                .send_json(&json!({"type": "response.create", "response": {"instructions": instructions}}))
                .await
        }
        None => upstream_tx.send_json(&json!({"type": "response.create"})).await,
    }
}

async fn handle_upstream_text(
    engine: &mut SessionEngine,
    upstream_tx: &mut dyn UpstreamSender,
    bridge_tx: &mut dyn BridgeSender,
    text: &str,
) -> Result<()> {
    let event: UpstreamServerEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(_) => return Ok(()), // event type this engine does not model; ignore
    };

    match event {
        UpstreamServerEvent::SessionCreated {} => Ok(()),
        UpstreamServerEvent::SessionUpdated {} => {
            engine.session_configured = true;
            engine.timers.cancel(TimerId::GreetingFallback);
            trigger_response(upstream_tx, engine.waiting_for_quote_silence, None).await
        }
        UpstreamServerEvent::SpeechStarted {} => {
            engine.question_snapshot = QuestionSnapshot::capture(engine.step);
            engine.confirmed_tool_called_this_turn = false;
            Ok(())
        }
        UpstreamServerEvent::SpeechStopped {} => Ok(()),
        UpstreamServerEvent::ResponseAudioDelta { delta } => {
            engine.response_active = true;
            let frame = BridgeOutbound::Audio { payload: delta };
            bridge_tx.send_frame(&frame).await
        }
        UpstreamServerEvent::ResponseAudioDone {} => {
            engine.response_active = false;
            engine.protection.start_echo(Instant::now());
            Ok(())
        }
        UpstreamServerEvent::AssistantTranscriptDelta { delta } => {
            engine.assistant_transcript_buffer.push_str(&delta);
            if !engine.hallucination_guard_tripped {
                let buffered = engine.assistant_transcript_buffer.clone();
                if is_price_or_eta_hallucination(&buffered, engine.quote.is_some()) {
                    engine.hallucination_guard_tripped = true;
                    cancel_and_correct(upstream_tx, engine, "price/eta mentioned before a quote was delivered").await?;
                } else if !engine.confirmed_tool_called_this_turn && contains_unconfirmed_claim(&buffered) {
                    engine.hallucination_guard_tripped = true;
                    cancel_and_correct(upstream_tx, engine, "booking confirmation claimed without a recorded book_taxi call").await?;
                }
            }
            Ok(())
        }
        UpstreamServerEvent::AssistantTranscriptDone { transcript } => {
            let full = if engine.assistant_transcript_buffer.is_empty() {
                transcript
            } else {
                std::mem::take(&mut engine.assistant_transcript_buffer)
            };
            if std::mem::replace(&mut engine.hallucination_guard_tripped, false) {
                return Ok(()); // the cancelled, hallucinated line is dropped entirely
            }
            let normalized = correct(&full);
            if is_phantom(&normalized) {
                return Ok(());
            }
            // Defensive fallback for a transcript delivered only at `done`
            // (no prior deltas): the streaming guard above never saw it.
            if is_price_or_eta_hallucination(&normalized, engine.quote.is_some())
                || (!engine.confirmed_tool_called_this_turn && contains_unconfirmed_claim(&normalized))
            {
                warn!(call_id = %engine.call_id, "anti-hallucination guard tripped at response done");
                return Ok(());
            }
            engine.push_transcript(TranscriptRole::Assistant, normalized);
            Ok(())
        }
        UpstreamServerEvent::UserTranscriptionCompleted { transcript } => {
            handle_user_transcript(engine, upstream_tx, &transcript).await
        }
        UpstreamServerEvent::FunctionCallArgumentsDone(call) => {
            handle_function_call(engine, upstream_tx, call).await
        }
        UpstreamServerEvent::ResponseDone {} => Ok(()),
        UpstreamServerEvent::Error { error } => {
            warn!(call_id = %engine.call_id, ?error, "upstream reported an error");
            Ok(())
        }
    }
}

async fn handle_user_transcript(
    engine: &mut SessionEngine,
    upstream_tx: &mut dyn UpstreamSender,
    raw: &str,
) -> Result<()> {
    let normalized = correct(raw);
    if is_phantom(&normalized) {
        return Ok(());
    }
    engine.push_transcript(TranscriptRole::User, normalized.clone());

    // Interpret the answer against the question that was actually pending
    // when the caller started speaking, not whatever `Step` has become
    // since (a concurrent tool call may have already advanced it).
    let asked_step = engine.question_snapshot.resolve(engine.step);
    engine.question_snapshot.clear();

    if let Some(field) = step_to_field(asked_step) {
        engine.store.set_user_truth(field, &normalized);
        engine.recompute_step();
        let instruction = get_instruction(engine.step, &engine.store.booking);
        trigger_response(upstream_tx, engine.waiting_for_quote_silence, Some(&instruction)).await?;
    } else if asked_step == Step::Confirmation && engine.awaiting_confirmation && looks_affirmative(&normalized) {
        // The caller accepted verbally; the model is still expected to call
        // book_taxi(action="confirmed") to actually transact it. We do not
        // mutate booking state from free speech alone.
    }

    engine.persistence.upsert_call(engine.snapshot()).await;
    Ok(())
}

async fn handle_function_call(
    engine: &mut SessionEngine,
    upstream_tx: &mut dyn UpstreamSender,
    call: FunctionCallDone,
) -> Result<()> {
    let parsed = match parse_tool_call(&call.name, &call.arguments) {
        Ok(parsed) => parsed,
        Err(err) => {
            send_tool_output(upstream_tx, &call.call_id, &json!({"error": err.to_string()})).await?;
            return Ok(());
        }
    };

    let output = match parsed {
        ToolCall::SyncBookingData {
            pickup,
            destination,
            passengers,
            pickup_time,
            special_requirements,
        } => {
            if let Some(v) = pickup {
                engine.store.set_field(BookingField::Pickup, &v, FieldSource::ToolArg);
            }
            if let Some(v) = destination {
                engine.store.set_field(BookingField::Destination, &v, FieldSource::ToolArg);
            }
            if let Some(v) = passengers {
                engine.store.set_field(BookingField::Passengers, &v, FieldSource::ToolArg);
            }
            if let Some(v) = pickup_time {
                engine.store.set_field(BookingField::Time, &v, FieldSource::ToolArg);
            }
            if let Some(v) = special_requirements {
                engine.store.booking.special_requirements.set(v, FieldSource::ToolArg);
            }
            engine.recompute_step();
            engine.persistence.upsert_call(engine.snapshot()).await;
            json!({"booking": engine.store.booking, "step": format!("{:?}", engine.step)})
        }
        ToolCall::BookTaxi { action: BookTaxiAction::RequestQuote } => {
            if engine.step != Step::Confirmation || engine.quote_in_flight || engine.quote.is_some() {
                json!({"status": "ignored", "reason": "not ready for a quote or one already requested"})
            } else {
                engine.quote_in_flight = true;
                engine.waiting_for_quote_silence = true;
                let fields = QuoteRequestFields {
                    pickup: engine.store.booking.pickup.value.clone(),
                    destination: engine.store.booking.destination.value.clone(),
                    passengers: engine.store.booking.passengers.value,
                    pickup_time: engine.store.booking.pickup_time.value.clone(),
                };
                engine.dispatch.request_quote(fields);
                json!({"status": "requested"})
            }
        }
        ToolCall::BookTaxi { action: BookTaxiAction::Confirmed } => {
            if engine.booking_confirmed {
                json!({"status": "already_confirmed"})
            } else if engine.quote.is_none() || !engine.awaiting_confirmation {
                json!({"status": "ignored", "reason": "no quote awaiting confirmation"})
            } else {
                engine.confirmed_tool_called_this_turn = true;
                let fields = QuoteRequestFields {
                    pickup: engine.store.booking.pickup.value.clone(),
                    destination: engine.store.booking.destination.value.clone(),
                    passengers: engine.store.booking.passengers.value,
                    pickup_time: engine.store.booking.pickup_time.value.clone(),
                };
                let booking_ref = engine.quote.as_ref().map(|q| q.booking_ref.clone());
                let callback_url = engine.quote.as_ref().and_then(|q| q.callback_url.clone());
                match engine.dispatch.confirm(fields, booking_ref, callback_url).await {
                    Ok(()) => {
                        engine.booking_confirmed = true;
                        engine.awaiting_confirmation = false;
                        engine.recompute_step();
                        engine.protection.start_summary(SummaryKind::Confirm, Instant::now());
                        engine.persistence.immediate_flush(&engine.call_id).await;
                        json!({"status": "confirmed"})
                    }
                    Err(err) => json!({"status": "failed", "error": err.to_string()}),
                }
            }
        }
        ToolCall::CancelBooking { confirm } => {
            if !confirm {
                json!({"status": "needs_confirmation"})
            } else if engine.booking_confirmed {
                json!({"status": "ignored", "reason": "booking already confirmed"})
            } else {
                engine.dispatch.cancel();
                engine.store = BookingStore::new();
                engine.quote = None;
                engine.quote_in_flight = false;
                engine.waiting_for_quote_silence = false;
                engine.awaiting_confirmation = false;
                engine.recompute_step();
                engine.persistence.immediate_flush(&engine.call_id).await;
                json!({"status": "cancelled"})
            }
        }
        ToolCall::EndCall { reason } => {
            info!(call_id = %engine.call_id, ?reason, "end_call requested");
            engine.persistence.immediate_flush(&engine.call_id).await;
            json!({"status": "ending"})
        }
    };

    send_tool_output(upstream_tx, &call.call_id, &output).await?;
    trigger_response(upstream_tx, engine.waiting_for_quote_silence, None).await
}

async fn send_tool_output(
    upstream_tx: &mut dyn UpstreamSender,
    call_id: &str,
    output: &serde_json::Value,
) -> Result<()> {
    upstream_tx
        .send_json(&json!({
            "type": "conversation.item.create",
            "item": {
                "type": "function_call_output",
                "call_id": call_id,
                "output": output.to_string(),
            }
        }))
        .await
}

async fn handle_dispatch_event(
    engine: &mut SessionEngine,
    upstream_tx: &mut dyn UpstreamSender,
    event: DispatchEvent,
) -> Result<()> {
    match event {
        DispatchEvent::QuoteReady(quote) | DispatchEvent::Fallback(quote) => {
            engine.quote_in_flight = false;
            engine.waiting_for_quote_silence = false;
            engine.awaiting_confirmation = true;
            let now = Instant::now();
            engine.protection.start_summary(SummaryKind::Summary, now);
            engine.protection.start_barge_in_cooldown(now);
            let message = format!(
                "The fare is {} and the estimated pickup time is {}. Read this back to the caller and ask them to confirm.",
                quote.fare, quote.eta
            );
            engine.quote = Some(quote);
            engine.persistence.upsert_call(engine.snapshot()).await;
            inject_system_message(upstream_tx, &message, engine.waiting_for_quote_silence).await
        }
        DispatchEvent::Say(message) => {
            inject_system_message(upstream_tx, &message, engine.waiting_for_quote_silence).await
        }
        DispatchEvent::Confirmed { .. } => {
            engine.booking_confirmed = true;
            engine.awaiting_confirmation = false;
            engine.recompute_step();
            engine.persistence.immediate_flush(&engine.call_id).await;
            Ok(())
        }
        DispatchEvent::Hangup { message } => {
            if let Some(message) = message {
                inject_system_message(upstream_tx, &message, engine.waiting_for_quote_silence).await?;
            }
            Ok(())
        }
        DispatchEvent::WebhookFailed(err) => {
            warn!(call_id = %engine.call_id, %err, "dispatch webhook failed; waiting on fallback timer");
            Ok(())
        }
    }
}

async fn inject_system_message(
    upstream_tx: &mut dyn UpstreamSender,
    text: &str,
    waiting_for_quote_silence: bool,
) -> Result<()> {
    upstream_tx
        .send_json(&json!({
            "type": "conversation.item.create",
            "item": {
                "type": "message",
                "role": "system",
                "content": [{"type": "input_text", "text": text}],
            }
        }))
        .await?;
    trigger_response(upstream_tx, waiting_for_quote_silence, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DispatchConfig, GatewayConfig};
    use crate::dispatch::{ChannelRegistry, DispatchTransport, QuoteRequestFields, WebhookResponse};
    use crate::persistence::InMemoryPersistence;
    use crate::session::io::test_doubles::{RecordingBridgeSender, RecordingUpstreamSender};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Stub transport that always answers inline with a fixed quote, so
    /// `request_quote` resolves without a real HTTP round trip.
    struct StubTransport {
        fail: AtomicBool,
    }

    #[async_trait]
    impl DispatchTransport for StubTransport {
        async fn post(
            &self,
            _url: &str,
            _payload: &crate::dispatch::WebhookPayload,
            _timeout: std::time::Duration,
        ) -> Result<Option<WebhookResponse>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(crate::error::GatewayError::Dispatch("stubbed failure".to_owned()));
            }
            Ok(Some(WebhookResponse {
                fare: Some("£9.50".to_owned()),
                eta_text: Some("7 minutes".to_owned()),
                eta_minutes: None,
                booking_ref: Some("REF-TEST".to_owned()),
                callback_url: None,
            }))
        }
    }

    fn test_engine() -> SessionEngine {
        let mut config = GatewayConfig::default();
        config.dispatch = DispatchConfig {
            fallback_timer_ms: 60_000,
            ..DispatchConfig::default()
        };
        let transport: Arc<dyn DispatchTransport> = Arc::new(StubTransport { fail: AtomicBool::new(false) });
        let registry = Arc::new(ChannelRegistry::new());
        let persistence: Arc<dyn PersistenceStore> = Arc::new(InMemoryPersistence::new());
        SessionEngine::new("call-test".to_owned(), config, transport, registry, persistence)
    }

    fn fill_booking(engine: &mut SessionEngine) {
        engine.store.set_user_truth(BookingField::Pickup, "52A David Road");
        engine.store.set_user_truth(BookingField::Destination, "Gatwick Airport");
        engine.store.set_user_truth(BookingField::Passengers, "2");
        engine.store.set_user_truth(BookingField::Time, "now");
        engine.recompute_step();
    }

    /// S1 — a user transcript answering the pending question advances the
    /// step and triggers exactly one non-silent `response.create`.
    #[tokio::test]
    async fn happy_path_user_answer_advances_step_and_triggers_response() {
        let mut engine = test_engine();
        let upstream = RecordingUpstreamSender::default();
        let mut upstream_tx = upstream.clone();

        handle_user_transcript(&mut engine, &mut upstream_tx, "52A David Road").await.unwrap();

        assert_eq!(engine.step, Step::Destination);
        let sent = upstream.sent();
        assert!(sent.iter().any(|v| v["type"] == "response.create"));
    }

    /// S4 — a race where a tool call advances `Step` mid-turn must not
    /// misattribute the caller's in-flight answer to the new step.
    #[tokio::test]
    async fn question_snapshot_survives_a_concurrent_step_advance() {
        let mut engine = test_engine();
        // Caller starts speaking while `Pickup` is still pending.
        engine.question_snapshot = QuestionSnapshot::capture(Step::Pickup);

        // A tool call lands mid-turn and advances the live step.
        engine.store.set_field(BookingField::Pickup, "52A David Road", FieldSource::ToolArg);
        engine.recompute_step();
        assert_eq!(engine.step, Step::Destination);

        let upstream = RecordingUpstreamSender::default();
        let mut upstream_tx = upstream.clone();
        // The caller's answer was actually to the pickup question.
        handle_user_transcript(&mut engine, &mut upstream_tx, "52A David Road").await.unwrap();

        assert_eq!(engine.store.booking.pickup.value.as_deref(), Some("52A David Road"));
    }

    /// Gate 1 — a price/ETA phrase appearing mid-stream with no delivered
    /// quote must cancel the response and drop the transcript.
    #[tokio::test]
    async fn streaming_price_mention_without_quote_cancels_response() {
        let mut engine = test_engine();
        let upstream = RecordingUpstreamSender::default();
        let mut upstream_tx = upstream.clone();
        let mut bridge = RecordingBridgeSender::default();
        let mut bridge_tx = bridge.clone();

        handle_upstream_text(
            &mut engine,
            &mut upstream_tx,
            &mut bridge_tx,
            r#"{"type":"response.audio_transcript.delta","delta":"The fare is £12.00 today"}"#,
        )
        .await
        .unwrap();

        assert!(engine.hallucination_guard_tripped);
        let sent = upstream.sent();
        assert!(sent.iter().any(|v| v["type"] == "response.cancel"));
        assert!(sent.iter().any(|v| v["type"] == "input_audio_buffer.clear"));

        handle_upstream_text(
            &mut engine,
            &mut upstream_tx,
            &mut bridge_tx,
            r#"{"type":"response.audio_transcript.done","transcript":""}"#,
        )
        .await
        .unwrap();
        assert!(engine.transcripts.is_empty());
        let _ = &mut bridge;
    }

    /// Gate 4 — a confirmation phrase spoken without a recorded
    /// `book_taxi(confirmed)` call this turn is treated as a hallucination.
    #[tokio::test]
    async fn confirmation_claim_without_tool_call_is_cancelled() {
        let mut engine = test_engine();
        let upstream = RecordingUpstreamSender::default();
        let mut upstream_tx = upstream.clone();
        let mut bridge = RecordingBridgeSender::default();
        let mut bridge_tx = bridge.clone();

        handle_upstream_text(
            &mut engine,
            &mut upstream_tx,
            &mut bridge_tx,
            r#"{"type":"response.audio_transcript.delta","delta":"Great news, your booking is confirmed!"}"#,
        )
        .await
        .unwrap();

        assert!(engine.hallucination_guard_tripped);
        let _ = &mut bridge;
    }

    /// The same phrase is allowed through once the tool was actually called.
    #[tokio::test]
    async fn confirmation_claim_is_allowed_after_tool_call() {
        let mut engine = test_engine();
        engine.confirmed_tool_called_this_turn = true;
        let upstream = RecordingUpstreamSender::default();
        let mut upstream_tx = upstream.clone();
        let mut bridge = RecordingBridgeSender::default();
        let mut bridge_tx = bridge.clone();

        handle_upstream_text(
            &mut engine,
            &mut upstream_tx,
            &mut bridge_tx,
            r#"{"type":"response.audio_transcript.delta","delta":"Great news, your booking is confirmed!"}"#,
        )
        .await
        .unwrap();

        assert!(!engine.hallucination_guard_tripped);
        let _ = &mut bridge;
    }

    /// Accepting a quote request enters silence mode until the quote event
    /// arrives; every `response.create` in between says only the silence
    /// phrase.
    #[tokio::test]
    async fn request_quote_enters_silence_mode_until_quote_ready() {
        let mut engine = test_engine();
        fill_booking(&mut engine);
        assert_eq!(engine.step, Step::Confirmation);

        let upstream = RecordingUpstreamSender::default();
        let mut upstream_tx = upstream.clone();
        let call = FunctionCallDone {
            call_id: "call-1".to_owned(),
            name: "book_taxi".to_owned(),
            arguments: r#"{"action":"request_quote"}"#.to_owned(),
        };
        handle_function_call(&mut engine, &mut upstream_tx, call).await.unwrap();

        assert!(engine.waiting_for_quote_silence);
        let sent = upstream.sent();
        let response = sent.iter().find(|v| v["type"] == "response.create").unwrap();
        let instructions = response["response"]["instructions"].as_str().unwrap();
        assert!(instructions.contains("One moment"));

        // The quote becomes ready: silence mode lifts and the quote summary
        // is read out normally.
        let quote = Quote {
            fare: "£9.50".to_owned(),
            eta: "7 minutes".to_owned(),
            booking_ref: "REF-1".to_owned(),
            callback_url: None,
        };
        handle_dispatch_event(&mut engine, &mut upstream_tx, DispatchEvent::QuoteReady(quote)).await.unwrap();
        assert!(!engine.waiting_for_quote_silence);
        assert!(engine.awaiting_confirmation);
    }

    /// Quote delivery must also start the barge-in cooldown, not only a
    /// live barge-in event.
    #[tokio::test]
    async fn quote_ready_starts_barge_in_cooldown() {
        let mut engine = test_engine();
        let upstream = RecordingUpstreamSender::default();
        let mut upstream_tx = upstream.clone();
        let quote = Quote {
            fare: "£9.50".to_owned(),
            eta: "7 minutes".to_owned(),
            booking_ref: "REF-1".to_owned(),
            callback_url: None,
        };
        handle_dispatch_event(&mut engine, &mut upstream_tx, DispatchEvent::QuoteReady(quote)).await.unwrap();

        let now = Instant::now();
        assert!(!engine.protection.should_barge_in(now, true, 100.0));
    }

    /// Property 9 — a second `book_taxi(confirmed)` call after success must
    /// report `already_confirmed` and never re-invoke the dispatch webhook.
    #[tokio::test]
    async fn confirming_twice_is_idempotent() {
        let mut engine = test_engine();
        fill_booking(&mut engine);
        engine.quote = Some(Quote {
            fare: "£9.50".to_owned(),
            eta: "7 minutes".to_owned(),
            booking_ref: "REF-1".to_owned(),
            callback_url: None,
        });
        engine.awaiting_confirmation = true;

        let upstream = RecordingUpstreamSender::default();
        let mut upstream_tx = upstream.clone();
        let call = FunctionCallDone {
            call_id: "call-2".to_owned(),
            name: "book_taxi".to_owned(),
            arguments: r#"{"action":"confirmed"}"#.to_owned(),
        };
        handle_function_call(&mut engine, &mut upstream_tx, call.clone()).await.unwrap();
        assert!(engine.booking_confirmed);

        handle_function_call(&mut engine, &mut upstream_tx, call).await.unwrap();

        let sent = upstream.sent();
        let outputs: Vec<_> = sent
            .iter()
            .filter(|v| v["type"] == "conversation.item.create" && v["item"]["type"] == "function_call_output")
            .collect();
        assert_eq!(outputs.len(), 2);
        let second_output: serde_json::Value =
            serde_json::from_str(outputs[1]["item"]["output"].as_str().unwrap()).unwrap();
        assert_eq!(second_output["status"], "already_confirmed");
    }

    /// Wire-shape: the bridge's `hangup` message must deserialize and end
    /// the call loop rather than erroring.
    #[tokio::test]
    async fn bridge_hangup_message_ends_the_loop() {
        let mut engine = test_engine();
        let upstream = RecordingUpstreamSender::default();
        let mut upstream_tx = upstream.clone();
        let bridge = RecordingBridgeSender::default();
        let mut bridge_tx = bridge.clone();

        let should_end = handle_bridge_text(&mut engine, &mut upstream_tx, &mut bridge_tx, r#"{"type":"hangup"}"#)
            .await
            .unwrap();
        assert!(should_end);
    }

    /// Wire-shape: inbound audio frames use the `audio` field, not `payload`.
    #[tokio::test]
    async fn bridge_audio_field_is_named_audio() {
        let mut engine = test_engine();
        let upstream = RecordingUpstreamSender::default();
        let mut upstream_tx = upstream.clone();
        let bridge = RecordingBridgeSender::default();
        let mut bridge_tx = bridge.clone();

        let payload = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [0xFFu8; 160]);
        let text = format!(r#"{{"type":"audio","audio":"{payload}"}}"#);
        let should_end = handle_bridge_text(&mut engine, &mut upstream_tx, &mut bridge_tx, &text).await.unwrap();
        assert!(!should_end);
        assert!(upstream.sent().iter().any(|v| v["type"] == "input_audio_buffer.append"));
    }
}
