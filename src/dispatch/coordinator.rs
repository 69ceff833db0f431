//! Per-call dispatch coordination: `requestQuote`, the fallback timer,
//! `confirm`, and `cancel` (§4.5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::booking::Quote;
use crate::config::DispatchConfig;
use crate::error::Result;

use super::registry::ChannelRegistry;
use super::transport::DispatchTransport;
use super::webhook::{CallbackEvent, DispatchAction, QuoteRequestFields, WebhookPayload};

/// Events the coordinator hands back to the owning session actor. The
/// actor folds these into its own `tokio::select!` loop rather than the
/// coordinator driving any dialog state itself.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    /// A quote became available, from either the webhook's inline
    /// response or an `ask_confirm` callback.
    QuoteReady(Quote),
    /// The fallback timer fired before any quote arrived.
    Fallback(Quote),
    /// The webhook backend sent a freeform `say` line to read to the caller.
    Say(String),
    /// The dispatch backend confirmed the booking out of band.
    Confirmed { message: Option<String> },
    /// The dispatch backend asked the call to end.
    Hangup { message: Option<String> },
    /// The webhook POST failed after retries; the engine decides how to
    /// surface this (fallback continues to run independently).
    WebhookFailed(String),
}

async fn post_with_retries(
    transport: &dyn DispatchTransport,
    url: &str,
    payload: &WebhookPayload,
    retries: u32,
    retry_delay: Duration,
    attempt_timeout: Duration,
) -> Result<Option<super::webhook::WebhookResponse>> {
    let mut attempt = 0;
    loop {
        match transport.post(url, payload, attempt_timeout).await {
            Ok(body) => return Ok(body),
            Err(err) if attempt < retries => {
                warn!(attempt, %err, "dispatch webhook attempt failed, retrying");
                attempt += 1;
                tokio::time::sleep(retry_delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

fn quote_from_response(
    response: &super::webhook::WebhookResponse,
    fallback: &DispatchConfig,
) -> Quote {
    Quote {
        fare: response.fare.clone().unwrap_or_else(|| fallback.fallback_fare.clone()),
        eta: response.eta_display().unwrap_or_else(|| fallback.fallback_eta.clone()),
        booking_ref: response
            .booking_ref
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        callback_url: response.callback_url.clone(),
    }
}

fn quote_from_ask_confirm(
    fare: Option<String>,
    eta_text: Option<String>,
    eta_minutes: Option<u32>,
    booking_ref: Option<String>,
    callback_url: Option<String>,
    fallback: &DispatchConfig,
) -> Quote {
    Quote {
        fare: fare.unwrap_or_else(|| fallback.fallback_fare.clone()),
        eta: eta_text
            .or_else(|| eta_minutes.map(|m| format!("{m} minutes")))
            .unwrap_or_else(|| fallback.fallback_eta.clone()),
        booking_ref: booking_ref.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        callback_url,
    }
}

/// One call's dispatch coordination state. Lives as long as the call's
/// [`crate::session`] actor does.
pub struct DispatchCoordinator {
    call_id: String,
    job_id: String,
    config: DispatchConfig,
    transport: Arc<dyn DispatchTransport>,
    registry: Arc<ChannelRegistry>,
    quote_delivered: Arc<AtomicBool>,
    booking_confirmed: Arc<AtomicBool>,
    fallback_token: Option<CancellationToken>,
    event_tx: mpsc::UnboundedSender<DispatchEvent>,
}

impl DispatchCoordinator {
    #[must_use]
    pub fn new(
        call_id: String,
        config: DispatchConfig,
        transport: Arc<dyn DispatchTransport>,
        registry: Arc<ChannelRegistry>,
        event_tx: mpsc::UnboundedSender<DispatchEvent>,
    ) -> Self {
        let job_id = format!("job-{call_id}-{}", uuid::Uuid::new_v4());
        Self {
            call_id,
            job_id,
            config,
            transport,
            registry,
            quote_delivered: Arc::new(AtomicBool::new(false)),
            booking_confirmed: Arc::new(AtomicBool::new(false)),
            fallback_token: None,
            event_tx,
        }
    }

    fn build_payload(&self, fields: &QuoteRequestFields, action: DispatchAction) -> WebhookPayload {
        WebhookPayload {
            job_id: self.job_id.clone(),
            call_id: self.call_id.clone(),
            caller_phone: None,
            ada_pickup: fields.pickup.clone(),
            ada_destination: fields.destination.clone(),
            passengers: fields.passengers,
            pickup_time: fields.pickup_time.clone(),
            action,
            booking_ref: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Request a quote: subscribes to the call's callback channel, starts
    /// the fallback timer, and POSTs the `request_quote` webhook. Exactly
    /// one [`DispatchEvent::QuoteReady`] or [`DispatchEvent::Fallback`]
    /// will ever be emitted for this call — whichever source wins the
    /// race over `quote_delivered`.
    pub fn request_quote(&mut self, fields: QuoteRequestFields) {
        if self.quote_delivered.load(Ordering::SeqCst) || self.booking_confirmed.load(Ordering::SeqCst) {
            debug!(call_id = %self.call_id, "quote already delivered or booking confirmed, ignoring request_quote");
            return;
        }

        let payload = self.build_payload(&fields, DispatchAction::RequestQuote);
        let mut callback_rx = self.registry.subscribe(&self.call_id);

        let fallback_token = CancellationToken::new();
        self.fallback_token = Some(fallback_token.clone());

        // Callback-channel listener: turns ask_confirm/say/confirm/hangup
        // into DispatchEvents, gated by the shared quote_delivered flag.
        {
            let quote_delivered = Arc::clone(&self.quote_delivered);
            let booking_confirmed = Arc::clone(&self.booking_confirmed);
            let event_tx = self.event_tx.clone();
            let dispatch_config = self.config.clone();
            let fallback_token = fallback_token.clone();
            tokio::spawn(async move {
                loop {
                    match callback_rx.recv().await {
                        Ok(CallbackEvent::AskConfirm {
                            message: _,
                            fare,
                            eta_text,
                            eta_minutes,
                            booking_ref,
                            callback_url,
                        }) => {
                            if booking_confirmed.load(Ordering::SeqCst) {
                                continue;
                            }
                            if quote_delivered.swap(true, Ordering::SeqCst) {
                                debug!("duplicate ask_confirm after delivery, dropping");
                                continue;
                            }
                            fallback_token.cancel();
                            let quote = quote_from_ask_confirm(
                                fare,
                                eta_text,
                                eta_minutes,
                                booking_ref,
                                callback_url,
                                &dispatch_config,
                            );
                            let _ = event_tx.send(DispatchEvent::QuoteReady(quote));
                        }
                        Ok(CallbackEvent::Say { message }) => {
                            let _ = event_tx.send(DispatchEvent::Say(message));
                        }
                        Ok(CallbackEvent::Confirm { message, booking_ref: _ }) => {
                            booking_confirmed.store(true, Ordering::SeqCst);
                            let _ = event_tx.send(DispatchEvent::Confirmed { message });
                        }
                        Ok(CallbackEvent::Hangup { message }) => {
                            let _ = event_tx.send(DispatchEvent::Hangup { message });
                            break;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
            });
        }

        // Fallback timer: if nothing claims quote_delivered within the
        // configured window, synthesize a placeholder quote.
        {
            let quote_delivered = Arc::clone(&self.quote_delivered);
            let event_tx = self.event_tx.clone();
            let dispatch_config = self.config.clone();
            let deadline = Duration::from_millis(self.config.fallback_timer_ms);
            let token = fallback_token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(deadline) => {
                        if !quote_delivered.swap(true, Ordering::SeqCst) {
                            let quote = Quote {
                                fare: dispatch_config.fallback_fare.clone(),
                                eta: dispatch_config.fallback_eta.clone(),
                                booking_ref: uuid::Uuid::new_v4().to_string(),
                                callback_url: None,
                            };
                            let _ = event_tx.send(DispatchEvent::Fallback(quote));
                        }
                    }
                    () = token.cancelled() => {}
                }
            });
        }

        // Webhook POST: may itself answer with fare/eta inline.
        {
            let transport = Arc::clone(&self.transport);
            let quote_delivered = Arc::clone(&self.quote_delivered);
            let event_tx = self.event_tx.clone();
            let dispatch_config = self.config.clone();
            let url = self.config.webhook_url.clone();
            let fallback_token = fallback_token.clone();
            let retries = self.config.retries;
            let retry_delay = Duration::from_millis(self.config.retry_delay_ms);
            let attempt_timeout = Duration::from_millis(self.config.attempt_timeout_ms);
            tokio::spawn(async move {
                match post_with_retries(
                    transport.as_ref(),
                    &url,
                    &payload,
                    retries,
                    retry_delay,
                    attempt_timeout,
                )
                .await
                {
                    Ok(Some(response)) => {
                        if !quote_delivered.swap(true, Ordering::SeqCst) {
                            fallback_token.cancel();
                            let quote = quote_from_response(&response, &dispatch_config);
                            let _ = event_tx.send(DispatchEvent::QuoteReady(quote));
                        }
                    }
                    Ok(None) => {
                        // Accepted; quote will arrive via the callback channel or fallback timer.
                    }
                    Err(err) => {
                        warn!(%err, "dispatch webhook failed after retries");
                        let _ = event_tx.send(DispatchEvent::WebhookFailed(err.to_string()));
                    }
                }
            });
        }
    }

    /// Confirm the booking: POSTs the `confirmed` webhook and, if a
    /// per-quote callback URL was supplied, notifies it too. Idempotent —
    /// a second call after the first succeeds is a no-op.
    pub async fn confirm(
        &mut self,
        fields: QuoteRequestFields,
        booking_ref: Option<String>,
        callback_url: Option<String>,
    ) -> Result<()> {
        if self.booking_confirmed.swap(true, Ordering::SeqCst) {
            debug!(call_id = %self.call_id, "confirm called again, already confirmed");
            return Ok(());
        }
        if let Some(token) = &self.fallback_token {
            token.cancel();
        }

        let mut payload = self.build_payload(&fields, DispatchAction::Confirmed);
        payload.booking_ref = booking_ref;

        let attempt_timeout = Duration::from_millis(self.config.attempt_timeout_ms);
        post_with_retries(
            self.transport.as_ref(),
            &self.config.webhook_url,
            &payload,
            self.config.retries,
            Duration::from_millis(self.config.retry_delay_ms),
            attempt_timeout,
        )
        .await?;

        if let Some(callback) = callback_url {
            if let Err(err) = self
                .transport
                .post(&callback, &payload, attempt_timeout)
                .await
            {
                warn!(%err, "confirmation callback post failed");
            }
        }
        Ok(())
    }

    /// Tear down this call's dispatch state: cancels the fallback timer
    /// and removes the callback channel so it stops accumulating.
    pub fn cancel(&mut self) {
        if let Some(token) = self.fallback_token.take() {
            token.cancel();
        }
        self.registry.remove(&self.call_id);
    }
}
