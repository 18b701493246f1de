use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::lock_unpoisoned;
use crate::platform::{CounterpartyId, MessagingPlatform, PlatformError};
use crate::response_generator::{GenerationError, ResponseGenerator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlatformCall {
    Send {
        counterparty: CounterpartyId,
        text: String,
        at: Instant,
        delivered: bool,
    },
    Typing {
        counterparty: CounterpartyId,
        at: Instant,
    },
    MarkRead {
        conversation: CounterpartyId,
    },
    Resolve {
        handle: String,
    },
}

type SendHook = Box<dyn Fn(usize) + Send + Sync>;

/// In-memory platform that records every call and replays scripted failures.
#[derive(Default)]
pub(crate) struct ScriptedPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    send_failures: Mutex<VecDeque<PlatformError>>,
    handles: Mutex<HashMap<String, Result<CounterpartyId, PlatformError>>>,
    on_delivered: Mutex<Option<SendHook>>,
    closed: AtomicBool,
}

impl ScriptedPlatform {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_handle(
        self,
        handle: &str,
        resolved: Result<CounterpartyId, PlatformError>,
    ) -> Self {
        lock_unpoisoned(&self.handles).insert(handle.to_string(), resolved);
        self
    }

    pub(crate) fn fail_next_sends(&self, errors: Vec<PlatformError>) {
        lock_unpoisoned(&self.send_failures).extend(errors);
    }

    /// Runs `hook` with the running count of delivered parts after each success.
    pub(crate) fn on_delivered(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *lock_unpoisoned(&self.on_delivered) = Some(Box::new(hook));
    }

    pub(crate) fn calls(&self) -> Vec<PlatformCall> {
        lock_unpoisoned(&self.calls).clone()
    }

    pub(crate) fn delivered_texts(&self, counterparty: CounterpartyId) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PlatformCall::Send {
                    counterparty: target,
                    text,
                    delivered: true,
                    ..
                } if target == counterparty => Some(text),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn send_attempts(&self) -> Vec<(Instant, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PlatformCall::Send { at, delivered, .. } => Some((at, delivered)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn typing_calls(&self, counterparty: CounterpartyId) -> usize {
        self.calls()
            .iter()
            .filter(|call| {
                matches!(call, PlatformCall::Typing { counterparty: target, .. } if *target == counterparty)
            })
            .count()
    }

    pub(crate) fn read_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, PlatformCall::MarkRead { .. }))
            .count()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl MessagingPlatform for ScriptedPlatform {
    async fn send_text(&self, counterparty: CounterpartyId, text: &str) -> Result<(), PlatformError> {
        let failure = lock_unpoisoned(&self.send_failures).pop_front();
        let delivered_count = {
            let mut calls = lock_unpoisoned(&self.calls);
            calls.push(PlatformCall::Send {
                counterparty,
                text: text.to_string(),
                at: Instant::now(),
                delivered: failure.is_none(),
            });
            calls
                .iter()
                .filter(|call| matches!(call, PlatformCall::Send { delivered: true, .. }))
                .count()
        };
        if let Some(error) = failure {
            return Err(error);
        }
        if let Some(hook) = lock_unpoisoned(&self.on_delivered).as_ref() {
            hook(delivered_count);
        }
        Ok(())
    }

    async fn set_typing(&self, counterparty: CounterpartyId) -> Result<(), PlatformError> {
        lock_unpoisoned(&self.calls).push(PlatformCall::Typing {
            counterparty,
            at: Instant::now(),
        });
        Ok(())
    }

    async fn mark_read(&self, conversation: CounterpartyId) -> Result<(), PlatformError> {
        lock_unpoisoned(&self.calls).push(PlatformCall::MarkRead { conversation });
        Ok(())
    }

    async fn resolve_handle(&self, handle: &str) -> Result<CounterpartyId, PlatformError> {
        lock_unpoisoned(&self.calls).push(PlatformCall::Resolve {
            handle: handle.to_string(),
        });
        lock_unpoisoned(&self.handles)
            .get(handle)
            .cloned()
            .unwrap_or_else(|| Err(PlatformError::HandleNotFound(handle.to_string())))
    }

    async fn close(&self) -> Result<(), PlatformError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GenerationRequest {
    pub(crate) counterparty: CounterpartyId,
    pub(crate) handle: Option<String>,
    pub(crate) text: String,
}

/// Replays queued responses; an exhausted queue answers with an empty string.
#[derive(Default)]
pub(crate) struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, GenerationError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    latency: Option<Duration>,
}

impl ScriptedGenerator {
    pub(crate) fn new(responses: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
            ..Self::default()
        }
    }

    pub(crate) fn replying(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub(crate) fn requests(&self) -> Vec<GenerationRequest> {
        lock_unpoisoned(&self.requests).clone()
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    async fn generate_response(
        &self,
        counterparty: CounterpartyId,
        handle: Option<&str>,
        text: &str,
    ) -> Result<String, GenerationError> {
        lock_unpoisoned(&self.requests).push(GenerationRequest {
            counterparty,
            handle: handle.map(str::to_string),
            text: text.to_string(),
        });
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        lock_unpoisoned(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}
