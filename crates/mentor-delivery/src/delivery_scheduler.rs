//! Admission, human-like pacing and part-by-part delivery of responses.
//!
//! Per inbound event the scheduler walks
//! `Received -> AdmissionCheck -> {Rejected | Queued} -> Active -> Reading ->
//! ThinkingAndGenerating -> Delivering -> {Completed | Interrupted | Failed}`.
//! Active processing is serialized process-wide by a capacity-1 gate so
//! outbound pacing and typing indicators never interleave across
//! counterparties. Every platform or generation error ends as an outcome
//! value; nothing propagates to the inbound dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mentor_pacing::{
    split_response, HumanTiming, InboundGateConfig, InboundRateGate, InboundRejection,
    OutboundRateLimiter, RateLimiterStats, DEFAULT_AFTERTHOUGHT_CUES, DEFAULT_MAX_PART_CHARS,
    DEFAULT_SPLIT_MARKER,
};
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::interrupt_flags::InterruptFlags;
use crate::known_counterparties::KnownCounterparties;
use crate::platform::{normalize_handle, CounterpartyId, InboundEvent, MessagingPlatform, PlatformError};
use crate::response_generator::{GenerationError, ResponseGenerator};
use crate::typing_keepalive::{TypingKeepalive, DEFAULT_TYPING_REFRESH};

pub const DEFAULT_GREETING_TEXT: &str =
    "Здравствуйте! Я Павел, буду помогать Вам разобраться в курсе по генеративному AI)";
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(120);
/// Initial send plus one retry after a flood-control wait.
pub const DEFAULT_PART_SEND_ATTEMPTS: usize = 2;
pub const DEFAULT_GREETING_SEND_ATTEMPTS: usize = 3;
const LOG_PREVIEW_CHARS: usize = 80;

/// Tunables for admission, pacing and retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    pub inbound_gate: InboundGateConfig,
    pub split_marker: String,
    pub max_part_chars: usize,
    pub typing_refresh: Duration,
    pub generation_timeout: Duration,
    pub part_send_attempts: usize,
    pub greeting_send_attempts: usize,
    pub greeting_text: String,
    pub afterthought_cues: Vec<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            inbound_gate: InboundGateConfig::default(),
            split_marker: DEFAULT_SPLIT_MARKER.to_string(),
            max_part_chars: DEFAULT_MAX_PART_CHARS,
            typing_refresh: DEFAULT_TYPING_REFRESH,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            part_send_attempts: DEFAULT_PART_SEND_ATTEMPTS,
            greeting_send_attempts: DEFAULT_GREETING_SEND_ATTEMPTS,
            greeting_text: DEFAULT_GREETING_TEXT.to_string(),
            afterthought_cues: DEFAULT_AFTERTHOUGHT_CUES
                .iter()
                .map(|cue| cue.to_string())
                .collect(),
        }
    }
}

/// Lifecycle states of one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Received,
    AdmissionCheck,
    Rejected,
    Queued,
    Active,
    Reading,
    ThinkingAndGenerating,
    Delivering,
    Completed,
    Interrupted,
    Failed,
}

impl DeliveryState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::AdmissionCheck => "admission_check",
            Self::Rejected => "rejected",
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Reading => "reading",
            Self::ThinkingAndGenerating => "thinking_and_generating",
            Self::Delivering => "delivering",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Completed | Self::Interrupted | Self::Failed
        )
    }
}

/// Why a delivery stopped before its last part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptCause {
    /// The counterparty wrote again; the newer message takes priority.
    NewInbound,
    /// The process is shutting down.
    Shutdown,
}

/// Result of delivering one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Completed {
        parts_sent: usize,
    },
    Interrupted {
        parts_sent: usize,
        parts_total: usize,
        cause: InterruptCause,
    },
    Failed {
        parts_sent: usize,
        parts_total: usize,
        attempts: usize,
        error: PlatformError,
    },
}

impl DeliveryOutcome {
    pub fn state(&self) -> DeliveryState {
        match self {
            Self::Completed { .. } => DeliveryState::Completed,
            Self::Interrupted { .. } => DeliveryState::Interrupted,
            Self::Failed { .. } => DeliveryState::Failed,
        }
    }

    pub fn parts_sent(&self) -> usize {
        match self {
            Self::Completed { parts_sent }
            | Self::Interrupted { parts_sent, .. }
            | Self::Failed { parts_sent, .. } => *parts_sent,
        }
    }
}

/// Why an inbound event was dropped without a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionRejection {
    EmptyText,
    /// Not known and no handle to check against.
    UnknownSender,
    /// Had a handle, but the generator declined to answer it.
    UnregisteredSender,
    InboundRate(InboundRejection),
    ShuttingDown,
}

impl AdmissionRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmptyText => "empty_text",
            Self::UnknownSender => "unknown_sender",
            Self::UnregisteredSender => "unregistered_sender",
            Self::InboundRate(rejection) => rejection.as_str(),
            Self::ShuttingDown => "shutting_down",
        }
    }
}

/// Final disposition of one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Rejected(AdmissionRejection),
    /// The generator returned nothing to send.
    NoResponse,
    /// The generator failed or timed out; treated as no response.
    GenerationFailed(GenerationError),
    Delivered(DeliveryOutcome),
}

impl InboundOutcome {
    pub fn state(&self) -> DeliveryState {
        match self {
            Self::Rejected(_) => DeliveryState::Rejected,
            Self::NoResponse | Self::GenerationFailed(_) => DeliveryState::Completed,
            Self::Delivered(outcome) => outcome.state(),
        }
    }
}

fn trace_state(counterparty: CounterpartyId, state: DeliveryState) {
    tracing::debug!(counterparty, state = state.as_str(), "delivery state");
}

/// Control characters removed, newlines flattened, truncated for log lines.
pub(crate) fn log_preview(text: &str, max_chars: usize) -> String {
    let cleaned: String = text
        .chars()
        .filter(|ch| !ch.is_control() || *ch == '\n' || *ch == '\t')
        .map(|ch| if ch == '\n' || ch == '\t' { ' ' } else { ch })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.chars().count() <= max_chars {
        return cleaned.to_string();
    }
    let mut truncated: String = cleaned.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

/// Outbound delivery scheduler shared by inbound handling and greetings.
pub struct DeliveryScheduler {
    platform: Arc<dyn MessagingPlatform>,
    generator: Arc<dyn ResponseGenerator>,
    rate_limiter: Arc<OutboundRateLimiter>,
    timing: HumanTiming,
    config: DeliveryConfig,
    gate: Semaphore,
    interrupts: Arc<InterruptFlags>,
    known: KnownCounterparties,
    inbound: InboundRateGate<CounterpartyId>,
    stopping: AtomicBool,
}

impl std::fmt::Debug for DeliveryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryScheduler")
            .field("config", &self.config)
            .field("known_counterparties", &self.known.len())
            .field("stopping", &self.stopping.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl DeliveryScheduler {
    pub fn new(
        platform: Arc<dyn MessagingPlatform>,
        generator: Arc<dyn ResponseGenerator>,
        rate_limiter: Arc<OutboundRateLimiter>,
        config: DeliveryConfig,
    ) -> Self {
        let config = DeliveryConfig {
            max_part_chars: config.max_part_chars.max(1),
            part_send_attempts: config.part_send_attempts.max(1),
            greeting_send_attempts: config.greeting_send_attempts.max(1),
            ..config
        };
        Self {
            platform,
            generator,
            rate_limiter,
            timing: HumanTiming::with_afterthought_cues(config.afterthought_cues.iter().cloned()),
            inbound: InboundRateGate::new(config.inbound_gate),
            config,
            gate: Semaphore::new(1),
            interrupts: Arc::new(InterruptFlags::new()),
            known: KnownCounterparties::new(),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    pub fn platform(&self) -> &Arc<dyn MessagingPlatform> {
        &self.platform
    }

    pub fn interrupt_flags(&self) -> Arc<InterruptFlags> {
        Arc::clone(&self.interrupts)
    }

    pub fn timing(&self) -> &HumanTiming {
        &self.timing
    }

    /// Seeds the known set, typically from persisted records at startup.
    pub fn register_known_counterparty(&self, counterparty: CounterpartyId) -> bool {
        self.known.insert(counterparty)
    }

    /// Evicts a counterparty so its next message takes the lightweight path again.
    pub fn forget_known_counterparty(&self, counterparty: CounterpartyId) -> bool {
        self.inbound.forget(&counterparty);
        self.interrupts.forget(counterparty);
        self.known.remove(counterparty)
    }

    pub fn is_known_counterparty(&self, counterparty: CounterpartyId) -> bool {
        self.known.contains(counterparty)
    }

    pub fn known_counterparty_count(&self) -> usize {
        self.known.len()
    }

    pub fn rate_limiter_stats(&self) -> RateLimiterStats {
        self.rate_limiter.stats()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Refuses new active work and makes in-flight deliveries stop at the next
    /// part boundary.
    pub fn begin_shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        self.gate.close();
    }

    /// Entry point for one inbound direct message.
    #[tracing::instrument(
        name = "mentor_delivery.handle_inbound_event",
        skip_all,
        fields(counterparty = event.counterparty)
    )]
    pub async fn handle_inbound_event(&self, event: InboundEvent) -> InboundOutcome {
        let counterparty = event.counterparty;
        trace_state(counterparty, DeliveryState::Received);
        if event.text.trim().is_empty() {
            return self.reject(counterparty, AdmissionRejection::EmptyText);
        }
        if self.is_stopping() {
            return self.reject(counterparty, AdmissionRejection::ShuttingDown);
        }

        trace_state(counterparty, DeliveryState::AdmissionCheck);
        if !self.known.contains(counterparty) {
            return match event.normalized_handle() {
                Some(handle) => self.handle_unknown_with_handle(&event, &handle).await,
                None => self.reject(counterparty, AdmissionRejection::UnknownSender),
            };
        }

        if let Err(rejection) = self.inbound.admit(&counterparty) {
            return self.reject(counterparty, AdmissionRejection::InboundRate(rejection));
        }

        // A delivery to this counterparty may be in flight; let it yield.
        self.interrupts.raise(counterparty);
        trace_state(counterparty, DeliveryState::Queued);
        let Ok(_permit) = self.gate.acquire().await else {
            return self.reject(counterparty, AdmissionRejection::ShuttingDown);
        };
        self.interrupts.clear(counterparty);
        trace_state(counterparty, DeliveryState::Active);
        tracing::info!(
            counterparty,
            handle = event.handle.as_deref().unwrap_or(""),
            preview = %log_preview(&event.text, LOG_PREVIEW_CHARS),
            "processing inbound message"
        );

        trace_state(counterparty, DeliveryState::Reading);
        tokio::time::sleep(self.timing.reading_delay(&event.text)).await;
        if let Err(error) = self.platform.mark_read(event.conversation).await {
            tracing::warn!(
                counterparty,
                reason_code = error.reason_code(),
                error = %error,
                "read acknowledgement failed"
            );
        }

        trace_state(counterparty, DeliveryState::ThinkingAndGenerating);
        let keepalive = TypingKeepalive::start(
            Arc::clone(&self.platform),
            counterparty,
            self.config.typing_refresh,
        );
        tokio::time::sleep(self.timing.thinking_delay(&event.text)).await;
        let generated = self.generate(&event).await;
        keepalive.stop().await;

        let response = match generated {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(counterparty, error = %error, "response generation failed");
                return InboundOutcome::GenerationFailed(error);
            }
        };
        if response.trim().is_empty() {
            tracing::debug!(counterparty, "generator returned no response");
            trace_state(counterparty, DeliveryState::Completed);
            return InboundOutcome::NoResponse;
        }

        InboundOutcome::Delivered(self.deliver_response(counterparty, &response).await)
    }

    // Unknown id with a handle: no gate, no read receipt, no reading/thinking
    // pauses. The generator decides whether the handle belongs to a counterparty.
    async fn handle_unknown_with_handle(&self, event: &InboundEvent, handle: &str) -> InboundOutcome {
        let counterparty = event.counterparty;
        trace_state(counterparty, DeliveryState::ThinkingAndGenerating);
        let response = match self.generate(event).await {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(
                    counterparty,
                    handle,
                    error = %error,
                    "unknown sender check failed"
                );
                return InboundOutcome::GenerationFailed(error);
            }
        };
        if response.trim().is_empty() {
            tracing::debug!(counterparty, handle, "ignoring unregistered sender");
            return self.reject(counterparty, AdmissionRejection::UnregisteredSender);
        }

        if self.known.insert(counterparty) {
            tracing::info!(counterparty, handle, "promoted sender to known counterparty");
        }
        InboundOutcome::Delivered(self.deliver_response(counterparty, &response).await)
    }

    fn reject(&self, counterparty: CounterpartyId, rejection: AdmissionRejection) -> InboundOutcome {
        match rejection {
            AdmissionRejection::InboundRate(InboundRejection::PerMinuteCap) => tracing::warn!(
                counterparty,
                reason_code = rejection.as_str(),
                "dropping inbound message"
            ),
            _ => tracing::debug!(
                counterparty,
                reason_code = rejection.as_str(),
                "dropping inbound message"
            ),
        }
        trace_state(counterparty, DeliveryState::Rejected);
        InboundOutcome::Rejected(rejection)
    }

    async fn generate(&self, event: &InboundEvent) -> Result<String, GenerationError> {
        let handle = event.normalized_handle();
        let request = self.generator.generate_response(
            event.counterparty,
            handle.as_deref(),
            event.text.as_str(),
        );
        match tokio::time::timeout(self.config.generation_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(self.config.generation_timeout)),
        }
    }

    /// Splits and sends `text` with one flood retry per part.
    pub async fn deliver_response(&self, counterparty: CounterpartyId, text: &str) -> DeliveryOutcome {
        self.deliver_parts(counterparty, text, self.config.part_send_attempts)
            .await
    }

    async fn deliver_parts(
        &self,
        counterparty: CounterpartyId,
        text: &str,
        send_attempts: usize,
    ) -> DeliveryOutcome {
        trace_state(counterparty, DeliveryState::Delivering);
        let parts = split_response(text, &self.config.split_marker, self.config.max_part_chars);
        let parts_total = parts.len();
        let mut parts_sent = 0usize;

        for (index, part) in parts.iter().enumerate() {
            if index > 0 {
                let cause = if self.interrupts.is_raised(counterparty) {
                    Some(InterruptCause::NewInbound)
                } else if self.is_stopping() {
                    Some(InterruptCause::Shutdown)
                } else {
                    None
                };
                if let Some(cause) = cause {
                    tracing::info!(
                        counterparty,
                        parts_sent,
                        parts_total,
                        cause = ?cause,
                        "interrupting response delivery"
                    );
                    trace_state(counterparty, DeliveryState::Interrupted);
                    return DeliveryOutcome::Interrupted {
                        parts_sent,
                        parts_total,
                        cause,
                    };
                }
            }

            let waited = self.rate_limiter.acquire().await;
            if !waited.is_zero() {
                tracing::debug!(
                    counterparty,
                    waited_secs = waited.as_secs_f64(),
                    "outbound rate limiter delayed part"
                );
            }
            self.simulate_typing(counterparty, part).await;

            if let Err((error, attempts)) = self.send_part(counterparty, part, send_attempts).await {
                match &error {
                    PlatformError::InvalidRecipient(_) => tracing::error!(
                        counterparty,
                        error = %error,
                        "invalid recipient, aborting delivery"
                    ),
                    _ => tracing::error!(
                        counterparty,
                        part = index + 1,
                        parts_total,
                        attempts,
                        reason_code = error.reason_code(),
                        error = %error,
                        "failed to send part, aborting delivery"
                    ),
                }
                trace_state(counterparty, DeliveryState::Failed);
                return DeliveryOutcome::Failed {
                    parts_sent,
                    parts_total,
                    attempts,
                    error,
                };
            }
            parts_sent += 1;
            let stats = self.rate_limiter.stats();
            tracing::info!(
                counterparty,
                part = index + 1,
                parts_total,
                chars = part.chars().count(),
                last_minute = stats.last_minute,
                last_hour = stats.last_hour,
                last_day = stats.last_day,
                "sent message part"
            );

            if let Some(next_part) = parts.get(index + 1) {
                tokio::time::sleep(self.timing.inter_part_delay(next_part)).await;
            }
        }

        trace_state(counterparty, DeliveryState::Completed);
        DeliveryOutcome::Completed { parts_sent }
    }

    // Renders the indicator in refresh-sized slices so it never lapses mid-typing.
    async fn simulate_typing(&self, counterparty: CounterpartyId, part: &str) {
        let mut remaining = self.timing.typing_delay(part);
        let slice = self.config.typing_refresh.max(Duration::from_millis(100));
        while !remaining.is_zero() {
            let step = remaining.min(slice);
            if let Err(error) = self.platform.set_typing(counterparty).await {
                tracing::debug!(
                    counterparty,
                    reason_code = error.reason_code(),
                    "typing indicator failed"
                );
            }
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
    }

    /// Sends one part, waiting out flood control between attempts.
    async fn send_part(
        &self,
        counterparty: CounterpartyId,
        part: &str,
        max_attempts: usize,
    ) -> Result<(), (PlatformError, usize)> {
        let mut attempt = 1usize;
        loop {
            match self.platform.send_text(counterparty, part).await {
                Ok(()) => return Ok(()),
                Err(error) => match error.flood_wait() {
                    Some(wait) if attempt < max_attempts => {
                        tracing::warn!(
                            counterparty,
                            attempt,
                            max_attempts,
                            wait_secs = wait.as_secs(),
                            "flood wait on send"
                        );
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                    }
                    _ => return Err((error, attempt)),
                },
            }
        }
    }

    /// Resolves `handle`, waits a first-contact delay and sends the greeting.
    ///
    /// Returns the counterparty id once at least one greeting part went out;
    /// the counterparty is then registered as known.
    #[tracing::instrument(name = "mentor_delivery.send_greeting", skip(self))]
    pub async fn send_greeting_now(&self, handle: &str) -> Option<CounterpartyId> {
        let Some(handle) = normalize_handle(handle) else {
            tracing::warn!("greeting requested for an empty handle");
            return None;
        };
        if self.is_stopping() {
            tracing::warn!(handle, "greeting skipped during shutdown");
            return None;
        }

        let counterparty = match self.platform.resolve_handle(&handle).await {
            Ok(counterparty) => counterparty,
            Err(error) => {
                tracing::error!(
                    handle,
                    reason_code = error.reason_code(),
                    error = %error,
                    "could not resolve greeting handle"
                );
                return None;
            }
        };

        let delay = self.timing.first_contact_delay();
        tracing::info!(
            handle,
            counterparty,
            delay_secs = delay.as_secs(),
            "waiting before first contact"
        );
        tokio::time::sleep(delay).await;

        let outcome = self
            .deliver_parts(
                counterparty,
                &self.config.greeting_text,
                self.config.greeting_send_attempts,
            )
            .await;
        if outcome.parts_sent() == 0 {
            tracing::error!(handle, counterparty, outcome = ?outcome, "greeting was not delivered");
            return None;
        }
        self.known.insert(counterparty);
        tracing::info!(handle, counterparty, "greeting delivered");
        Some(counterparty)
    }
}
