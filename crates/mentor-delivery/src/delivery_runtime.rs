//! Owns the scheduler's background work: detached inbound handlers and the
//! greeting consumer, plus the ordered shutdown sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use mentor_pacing::{OutboundRateLimiter, RateLimiterStats};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::delivery_scheduler::{DeliveryConfig, DeliveryScheduler, InboundOutcome};
use crate::greeting_queue::{
    start_greeting_queue, GreetingQueue, GreetingQueueClosed, GreetingQueueHandle, GreetingReport,
};
use crate::lock_unpoisoned;
use crate::platform::{CounterpartyId, InboundEvent, MessagingPlatform};
use crate::response_generator::ResponseGenerator;

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRuntimeConfig {
    pub delivery: DeliveryConfig,
    /// How long in-flight inbound handlers may keep running after shutdown starts.
    pub shutdown_grace: Duration,
}

impl Default for DeliveryRuntimeConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryConfig::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// What happened to in-flight handlers during shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeShutdownReport {
    pub finished: Vec<InboundOutcome>,
    pub aborted: usize,
}

pub struct DeliveryRuntime {
    runtime: tokio::runtime::Handle,
    scheduler: Arc<DeliveryScheduler>,
    greetings: GreetingQueue,
    greeting_handle: tokio::sync::Mutex<GreetingQueueHandle>,
    inbound_tasks: Mutex<JoinSet<InboundOutcome>>,
    shutdown_grace: Duration,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for DeliveryRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryRuntime")
            .field("scheduler", &self.scheduler)
            .field("pending_greetings", &self.greetings.pending())
            .field("shutdown_grace", &self.shutdown_grace)
            .finish_non_exhaustive()
    }
}

impl DeliveryRuntime {
    /// Builds the scheduler and spawns the greeting consumer.
    ///
    /// Greeting outcomes are forwarded to `greeting_reports` when given, so the
    /// caller can persist newly greeted counterparties.
    pub fn start(
        platform: Arc<dyn MessagingPlatform>,
        generator: Arc<dyn ResponseGenerator>,
        rate_limiter: Arc<OutboundRateLimiter>,
        config: DeliveryRuntimeConfig,
        greeting_reports: Option<mpsc::UnboundedSender<GreetingReport>>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("delivery runtime requires an active Tokio runtime")?;
        let scheduler = Arc::new(DeliveryScheduler::new(
            platform,
            generator,
            rate_limiter,
            config.delivery,
        ));
        let (greetings, greeting_handle) =
            start_greeting_queue(Arc::clone(&scheduler), greeting_reports)
                .context("failed to start greeting queue")?;
        tracing::info!(
            shutdown_grace_ms = config.shutdown_grace.as_millis() as u64,
            "delivery runtime started"
        );
        Ok(Self {
            runtime,
            scheduler,
            greetings,
            greeting_handle: tokio::sync::Mutex::new(greeting_handle),
            inbound_tasks: Mutex::new(JoinSet::new()),
            shutdown_grace: config.shutdown_grace,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn scheduler(&self) -> &Arc<DeliveryScheduler> {
        &self.scheduler
    }

    /// Spawns a tracked handler for `event` and returns immediately.
    ///
    /// Returns false once shutdown has begun.
    pub fn dispatch_inbound(&self, event: InboundEvent) -> bool {
        if self.scheduler.is_stopping() {
            tracing::debug!(
                counterparty = event.counterparty,
                "inbound event ignored during shutdown"
            );
            return false;
        }
        let scheduler = Arc::clone(&self.scheduler);
        let mut tasks = lock_unpoisoned(&self.inbound_tasks);
        reap_finished(&mut tasks);
        tasks.spawn_on(
            async move { scheduler.handle_inbound_event(event).await },
            &self.runtime,
        );
        true
    }

    /// Inbound handlers spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        let mut tasks = lock_unpoisoned(&self.inbound_tasks);
        reap_finished(&mut tasks);
        tasks.len()
    }

    pub fn enqueue_greeting(&self, handle: impl Into<String>) -> Result<usize, GreetingQueueClosed> {
        self.greetings.enqueue(handle)
    }

    pub fn pending_greetings(&self) -> usize {
        self.greetings.pending()
    }

    /// Greets `handle` right away, bypassing the queue.
    pub async fn send_greeting_now(&self, handle: &str) -> Option<CounterpartyId> {
        self.scheduler.send_greeting_now(handle).await
    }

    pub fn register_known_counterparty(&self, counterparty: CounterpartyId) -> bool {
        self.scheduler.register_known_counterparty(counterparty)
    }

    pub fn forget_known_counterparty(&self, counterparty: CounterpartyId) -> bool {
        self.scheduler.forget_known_counterparty(counterparty)
    }

    pub fn rate_limiter_stats(&self) -> RateLimiterStats {
        self.scheduler.rate_limiter_stats()
    }

    /// Stops intake, lets deliveries halt at a part boundary, cancels the
    /// greeting consumer, drains handlers within the grace period and closes
    /// the platform. Only the first call does any work.
    pub async fn shutdown(&self) -> RuntimeShutdownReport {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return RuntimeShutdownReport::default();
        }
        tracing::info!("delivery runtime shutting down");
        self.scheduler.begin_shutdown();
        self.greeting_handle.lock().await.shutdown().await;

        let mut tasks = std::mem::take(&mut *lock_unpoisoned(&self.inbound_tasks));
        let mut report = RuntimeShutdownReport::default();
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(joined) = tasks.join_next().await {
                if let Ok(outcome) = joined {
                    report.finished.push(outcome);
                }
            }
        })
        .await;
        if drained.is_err() {
            report.aborted = tasks.len();
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            tracing::warn!(
                aborted = report.aborted,
                "aborted inbound handlers after shutdown grace period"
            );
        }

        if let Err(error) = self.scheduler.platform().close().await {
            tracing::warn!(error = %error, "platform close failed");
        }
        tracing::info!(
            finished = report.finished.len(),
            aborted = report.aborted,
            "delivery runtime stopped"
        );
        report
    }
}

fn reap_finished(tasks: &mut JoinSet<InboundOutcome>) {
    while let Some(joined) = tasks.try_join_next() {
        match joined {
            Ok(outcome) => tracing::debug!(state = outcome.state().as_str(), "inbound handler finished"),
            Err(error) if error.is_panic() => tracing::error!(error = %error, "inbound handler panicked"),
            Err(_) => {}
        }
    }
}
