use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mentor_delivery::{
    CounterpartyId, DeliveryRuntime, DeliveryRuntimeConfig, GenerationError, MessagingPlatform,
    PlatformError, ResponseGenerator,
};
use mentor_pacing::OutboundRateLimiter;

#[derive(Default)]
pub(crate) struct RecordingPlatform {
    pub(crate) sent: Mutex<Vec<(CounterpartyId, String)>>,
    pub(crate) handles: Mutex<HashMap<String, CounterpartyId>>,
}

impl RecordingPlatform {
    pub(crate) fn sent(&self) -> Vec<(CounterpartyId, String)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MessagingPlatform for RecordingPlatform {
    async fn send_text(&self, counterparty: CounterpartyId, text: &str) -> Result<(), PlatformError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((counterparty, text.to_string()));
        }
        Ok(())
    }

    async fn set_typing(&self, _counterparty: CounterpartyId) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn mark_read(&self, _conversation: CounterpartyId) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn resolve_handle(&self, handle: &str) -> Result<CounterpartyId, PlatformError> {
        self.handles
            .lock()
            .ok()
            .and_then(|handles| handles.get(handle).copied())
            .ok_or_else(|| PlatformError::HandleNotFound(handle.to_string()))
    }
}

#[derive(Default)]
pub(crate) struct ScriptedGenerator {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedGenerator {
    pub(crate) fn replying(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|text| text.to_string()).collect()),
        }
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    async fn generate_response(
        &self,
        _counterparty: CounterpartyId,
        _handle: Option<&str>,
        _text: &str,
    ) -> Result<String, GenerationError> {
        Ok(self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front())
            .unwrap_or_default())
    }
}

pub(crate) fn start_test_runtime(
    platform: &Arc<RecordingPlatform>,
    generator: ScriptedGenerator,
) -> Arc<DeliveryRuntime> {
    Arc::new(
        DeliveryRuntime::start(
            Arc::clone(platform) as Arc<dyn MessagingPlatform>,
            Arc::new(generator),
            Arc::new(OutboundRateLimiter::default()),
            DeliveryRuntimeConfig::default(),
            None,
        )
        .expect("runtime starts"),
    )
}
