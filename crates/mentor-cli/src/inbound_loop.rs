//! Pulls inbound events from a source and hands them to the delivery runtime.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use mentor_delivery::{DeliveryRuntime, InboundEvent};
use mentor_telegram::TelegramUpdatePoller;

#[async_trait]
pub trait InboundSource: Send {
    async fn next_batch(&mut self) -> Result<Vec<InboundEvent>>;
}

#[async_trait]
impl InboundSource for TelegramUpdatePoller {
    async fn next_batch(&mut self) -> Result<Vec<InboundEvent>> {
        self.poll_once().await
    }
}

/// Dispatches events until `shutdown` resolves or the runtime stops accepting
/// them. Returns the number of events dispatched.
pub async fn run_inbound_loop<S, F>(
    source: &mut S,
    runtime: &DeliveryRuntime,
    error_backoff: Duration,
    shutdown: F,
) -> usize
where
    S: InboundSource + ?Sized,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut dispatched = 0usize;
    loop {
        let batch = tokio::select! {
            _ = &mut shutdown => break,
            batch = source.next_batch() => batch,
        };
        match batch {
            Ok(events) => {
                for event in events {
                    if !runtime.dispatch_inbound(event) {
                        return dispatched;
                    }
                    dispatched += 1;
                }
            }
            Err(error) => {
                tracing::warn!(
                    error = %format!("{error:#}"),
                    backoff_ms = error_backoff.as_millis() as u64,
                    "inbound poll failed"
                );
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(error_backoff) => {}
                }
            }
        }
    }
    dispatched
}
