use std::{collections::VecDeque, sync::Arc, sync::Mutex, time::Duration};

use async_trait::async_trait;
use httpmock::prelude::*;
use mentor_cli::KnownCounterpartyStore;
use mentor_delivery::{
    CounterpartyId, DeliveryRuntime, DeliveryRuntimeConfig, GenerationError, MessagingPlatform,
    ResponseGenerator,
};
use mentor_pacing::OutboundRateLimiter;
use mentor_telegram::{TelegramPlatform, TelegramPlatformConfig, TelegramUpdatePoller};
use serde_json::json;

struct FixedGenerator {
    responses: Mutex<VecDeque<String>>,
}

impl FixedGenerator {
    fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|text| text.to_string()).collect()),
        }
    }
}

#[async_trait]
impl ResponseGenerator for FixedGenerator {
    async fn generate_response(
        &self,
        _counterparty: CounterpartyId,
        _handle: Option<&str>,
        _text: &str,
    ) -> Result<String, GenerationError> {
        Ok(self
            .responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_default())
    }
}

fn telegram_config(server: &MockServer) -> TelegramPlatformConfig {
    TelegramPlatformConfig {
        api_base: server.base_url(),
        bot_token: "flow-token".to_string(),
        request_timeout_ms: 5_000,
        poll_timeout_secs: 0,
    }
}

#[tokio::test]
async fn integration_polled_message_from_new_student_is_answered_over_telegram() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/botflow-token/getUpdates");
        then.status(200).json_body(json!({
            "ok": true,
            "result": [
                {"update_id": 900, "message": {
                    "chat": {"id": 321, "type": "private"},
                    "from": {"id": 321, "is_bot": false, "username": "new_student"},
                    "text": "Hi, I just joined the course"
                }},
                {"update_id": 901, "message": {
                    "chat": {"id": 654, "type": "private"},
                    "from": {"id": 654, "is_bot": false},
                    "text": "anyone there?"
                }}
            ]
        }));
    });
    let typing = server.mock(|when, then| {
        when.method(POST)
            .path("/botflow-token/sendChatAction")
            .json_body_includes(json!({"chat_id": 321}).to_string());
        then.status(200).json_body(json!({"ok": true, "result": true}));
    });
    let first_part = server.mock(|when, then| {
        when.method(POST)
            .path("/botflow-token/sendMessage")
            .json_body(json!({
                "chat_id": 321,
                "text": "Welcome aboard!",
                "disable_web_page_preview": true
            }));
        then.status(200).json_body(json!({"ok": true, "result": {"message_id": 1}}));
    });
    let second_part = server.mock(|when, then| {
        when.method(POST)
            .path("/botflow-token/sendMessage")
            .json_body(json!({
                "chat_id": 321,
                "text": "Start with module one.",
                "disable_web_page_preview": true
            }));
        then.status(200).json_body(json!({"ok": true, "result": {"message_id": 2}}));
    });
    let stranger = server.mock(|when, then| {
        when.method(POST)
            .path("/botflow-token/sendMessage")
            .json_body_includes(json!({"chat_id": 654}).to_string());
        then.status(200).json_body(json!({"ok": true, "result": {}}));
    });

    let platform = Arc::new(TelegramPlatform::new(&telegram_config(&server)).expect("platform"));
    let runtime = DeliveryRuntime::start(
        Arc::clone(&platform) as Arc<dyn MessagingPlatform>,
        Arc::new(FixedGenerator::new(&[
            "Welcome aboard!---SPLIT---Start with module one.",
        ])),
        Arc::new(OutboundRateLimiter::default()),
        DeliveryRuntimeConfig::default(),
        None,
    )
    .expect("runtime");

    let mut poller = TelegramUpdatePoller::new(&telegram_config(&server)).expect("poller");
    let events = poller.poll_once().await.expect("poll");
    assert_eq!(events.len(), 2);
    assert_eq!(poller.next_offset(), Some(902));
    for event in events {
        assert!(runtime.dispatch_inbound(event));
    }

    for _ in 0..300 {
        if runtime.in_flight() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(runtime.in_flight(), 0, "delivery did not finish in time");

    first_part.assert_calls(1);
    second_part.assert_calls(1);
    stranger.assert_calls(0);
    assert!(typing.calls() >= 2);
    assert!(runtime.scheduler().is_known_counterparty(321));
    assert!(!runtime.scheduler().is_known_counterparty(654));
    assert_eq!(runtime.rate_limiter_stats().last_minute, 2);

    runtime.shutdown().await;
    assert!(platform.send_text(321, "after close").await.is_err());
}

#[test]
fn integration_known_counterparty_file_seeds_a_fresh_runtime() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = KnownCounterpartyStore::new(temp.path().join("known.json"));
    store.record(11).expect("record");
    store.record(12).expect("record");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");
    runtime.block_on(async {
        let server = MockServer::start_async().await;
        let platform = Arc::new(TelegramPlatform::new(&telegram_config(&server)).expect("platform"));
        let delivery = DeliveryRuntime::start(
            platform,
            Arc::new(FixedGenerator::new(&[])),
            Arc::new(OutboundRateLimiter::default()),
            DeliveryRuntimeConfig::default(),
            None,
        )
        .expect("delivery runtime");
        for counterparty in store.load().expect("load") {
            delivery.register_known_counterparty(counterparty);
        }
        assert!(delivery.scheduler().is_known_counterparty(11));
        assert!(delivery.scheduler().is_known_counterparty(12));
        assert_eq!(delivery.scheduler().known_counterparty_count(), 2);
        delivery.shutdown().await;
    });
}
