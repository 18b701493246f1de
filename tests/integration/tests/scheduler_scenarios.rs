use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use mentor_delivery::{
    CounterpartyId, DeliveryConfig, DeliveryRuntime, DeliveryRuntimeConfig, GenerationError,
    InboundEvent, MessagingPlatform, PlatformError, ResponseGenerator,
};
use mentor_pacing::{InboundGateConfig, OutboundRateLimiter, RateLimitConfig};
use tokio::{sync::mpsc, time::Instant};

#[derive(Default)]
struct FakeTelegram {
    sends: Mutex<Vec<(CounterpartyId, String, Instant)>>,
    handles: HashMap<String, CounterpartyId>,
}

impl FakeTelegram {
    fn with_handles(handles: &[(&str, CounterpartyId)]) -> Self {
        Self {
            handles: handles
                .iter()
                .map(|(handle, id)| (handle.to_string(), *id))
                .collect(),
            ..Self::default()
        }
    }

    fn sends(&self) -> Vec<(CounterpartyId, String, Instant)> {
        self.sends.lock().expect("sends lock").clone()
    }

    fn texts_to(&self, counterparty: CounterpartyId) -> Vec<String> {
        self.sends()
            .into_iter()
            .filter(|(target, _, _)| *target == counterparty)
            .map(|(_, text, _)| text)
            .collect()
    }
}

#[async_trait]
impl MessagingPlatform for FakeTelegram {
    async fn send_text(&self, counterparty: CounterpartyId, text: &str) -> Result<(), PlatformError> {
        self.sends
            .lock()
            .expect("sends lock")
            .push((counterparty, text.to_string(), Instant::now()));
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
            .get(handle)
            .copied()
            .ok_or_else(|| PlatformError::HandleNotFound(handle.to_string()))
    }
}

struct QueuedGenerator {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(CounterpartyId, Option<String>)>>,
}

impl QueuedGenerator {
    fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|text| text.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(CounterpartyId, Option<String>)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl ResponseGenerator for QueuedGenerator {
    async fn generate_response(
        &self,
        counterparty: CounterpartyId,
        handle: Option<&str>,
        _text: &str,
    ) -> Result<String, GenerationError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((counterparty, handle.map(str::to_string)));
        Ok(self
            .responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_default())
    }
}

async fn wait_for_idle(runtime: &DeliveryRuntime) {
    for _ in 0..100_000 {
        if runtime.in_flight() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    panic!("inbound handlers did not finish");
}

#[tokio::test(start_paused = true)]
async fn integration_greeted_counterparty_then_gets_full_replies() {
    let platform = Arc::new(FakeTelegram::with_handles(&[("anna", 100)]));
    let generator = Arc::new(QueuedGenerator::new(&[
        "Glad you wrote!---SPLIT---Which module are you on?",
    ]));
    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let runtime = DeliveryRuntime::start(
        Arc::clone(&platform) as Arc<dyn MessagingPlatform>,
        Arc::clone(&generator) as Arc<dyn ResponseGenerator>,
        Arc::new(OutboundRateLimiter::default()),
        DeliveryRuntimeConfig::default(),
        Some(report_tx),
    )
    .expect("runtime");

    runtime.enqueue_greeting("@anna").expect("enqueue");
    let report = report_rx.recv().await.expect("greeting report");
    assert_eq!(report.counterparty, Some(100));

    // Unknown sender without a handle never reaches the generator.
    assert!(runtime.dispatch_inbound(InboundEvent::direct(999, None, "who is this?")));
    assert!(runtime.dispatch_inbound(InboundEvent::direct(100, Some("anna"), "hi Pavel")));
    wait_for_idle(&runtime).await;

    let texts = platform.texts_to(100);
    assert_eq!(texts.len(), 3);
    assert_eq!(texts[0], DeliveryConfig::default().greeting_text);
    assert_eq!(texts[1], "Glad you wrote!");
    assert_eq!(texts[2], "Which module are you on?");
    assert!(platform.texts_to(999).is_empty());
    assert_eq!(generator.calls(), vec![(100, Some("anna".to_string()))]);

    let report = runtime.shutdown().await;
    assert_eq!(report.aborted, 0);
}

#[tokio::test(start_paused = true)]
async fn integration_minute_cap_spaces_sends_across_counterparties() {
    let platform = Arc::new(FakeTelegram::default());
    let generator = Arc::new(QueuedGenerator::new(&[
        "one---SPLIT---two---SPLIT---three",
        "four---SPLIT---five---SPLIT---six",
    ]));
    let runtime = DeliveryRuntime::start(
        Arc::clone(&platform) as Arc<dyn MessagingPlatform>,
        generator,
        Arc::new(OutboundRateLimiter::new(RateLimitConfig {
            max_per_minute: 4,
            max_per_hour: 40,
            max_per_day: 200,
        })),
        DeliveryRuntimeConfig::default(),
        None,
    )
    .expect("runtime");
    runtime.register_known_counterparty(1);
    runtime.register_known_counterparty(2);

    runtime.dispatch_inbound(InboundEvent::direct(1, None, "first question"));
    runtime.dispatch_inbound(InboundEvent::direct(2, None, "second question"));
    wait_for_idle(&runtime).await;

    let sends = platform.sends();
    assert_eq!(sends.len(), 6);
    for (index, (_, _, at)) in sends.iter().enumerate() {
        let in_window = sends
            .iter()
            .skip(index)
            .take_while(|(_, _, later)| *later - *at < Duration::from_secs(60))
            .count();
        assert!(in_window <= 4, "more than 4 sends within a minute of send {index}");
    }
    // The gate keeps each response contiguous.
    let order: Vec<CounterpartyId> = sends.iter().map(|(id, _, _)| *id).collect();
    assert!(order == vec![1, 1, 1, 2, 2, 2] || order == vec![2, 2, 2, 1, 1, 1]);
    assert_eq!(runtime.rate_limiter_stats().last_hour, 6);

    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn integration_inbound_flood_from_one_counterparty_is_trimmed() {
    let platform = Arc::new(FakeTelegram::default());
    let generator = Arc::new(QueuedGenerator::new(&[]));
    let runtime = DeliveryRuntime::start(
        Arc::clone(&platform) as Arc<dyn MessagingPlatform>,
        Arc::clone(&generator) as Arc<dyn ResponseGenerator>,
        Arc::new(OutboundRateLimiter::default()),
        DeliveryRuntimeConfig {
            delivery: DeliveryConfig {
                inbound_gate: InboundGateConfig {
                    min_gap: Duration::ZERO,
                    max_per_minute: 10,
                },
                ..DeliveryConfig::default()
            },
            ..DeliveryRuntimeConfig::default()
        },
        None,
    )
    .expect("runtime");
    runtime.register_known_counterparty(7);

    for index in 0..11 {
        runtime.dispatch_inbound(InboundEvent::direct(7, None, &format!("message {index}")));
    }
    wait_for_idle(&runtime).await;

    assert_eq!(generator.calls().len(), 10);
    assert!(platform.sends().is_empty());
    runtime.shutdown().await;
}
