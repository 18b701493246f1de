//! FIFO of first-contact greetings drained by one background consumer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::delivery_scheduler::DeliveryScheduler;
use crate::platform::CounterpartyId;

/// Result of one dequeued greeting; `counterparty` is `None` when it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GreetingReport {
    pub handle: String,
    pub counterparty: Option<CounterpartyId>,
}

impl GreetingReport {
    pub fn delivered(&self) -> bool {
        self.counterparty.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("greeting queue consumer is no longer running")]
pub struct GreetingQueueClosed;

/// Producer side; cheap to clone.
#[derive(Debug, Clone)]
pub struct GreetingQueue {
    sender: mpsc::UnboundedSender<String>,
    pending: Arc<AtomicUsize>,
}

impl GreetingQueue {
    /// Appends `handle` and returns the number of greetings waiting, itself included.
    pub fn enqueue(&self, handle: impl Into<String>) -> Result<usize, GreetingQueueClosed> {
        let handle = handle.into();
        let waiting = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        if self.sender.send(handle.clone()).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(GreetingQueueClosed);
        }
        tracing::info!(handle, waiting, "greeting enqueued");
        Ok(waiting)
    }

    /// Greetings enqueued but not yet picked up by the consumer.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct GreetingQueueHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl GreetingQueueHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the consumer, abandoning any greeting still waiting or in its delay.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Spawns the greeting consumer on the current Tokio runtime.
pub fn start_greeting_queue(
    scheduler: Arc<DeliveryScheduler>,
    reports: Option<mpsc::UnboundedSender<GreetingReport>>,
) -> Result<(GreetingQueue, GreetingQueueHandle)> {
    let runtime = tokio::runtime::Handle::try_current()
        .context("greeting queue requires an active Tokio runtime")?;
    let (sender, receiver) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let pending = Arc::new(AtomicUsize::new(0));
    let task = runtime.spawn(run_greeting_consumer(
        scheduler,
        receiver,
        Arc::clone(&pending),
        reports,
        shutdown_rx,
    ));
    Ok((
        GreetingQueue { sender, pending },
        GreetingQueueHandle {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        },
    ))
}

async fn run_greeting_consumer(
    scheduler: Arc<DeliveryScheduler>,
    mut receiver: mpsc::UnboundedReceiver<String>,
    pending: Arc<AtomicUsize>,
    reports: Option<mpsc::UnboundedSender<GreetingReport>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        let handle = tokio::select! {
            _ = &mut shutdown_rx => break,
            next = receiver.recv() => match next {
                Some(handle) => handle,
                None => break,
            },
        };
        let remaining = pending.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        tracing::debug!(handle, remaining, "greeting dequeued");

        let counterparty = tokio::select! {
            _ = &mut shutdown_rx => break,
            counterparty = scheduler.send_greeting_now(&handle) => counterparty,
        };
        if let Some(reports) = reports.as_ref() {
            let _ = reports.send(GreetingReport {
                handle,
                counterparty,
            });
        }

        if pending.load(Ordering::Acquire) > 0 {
            let spacing = scheduler.timing().first_contact_delay();
            tracing::debug!(spacing_secs = spacing.as_secs(), "spacing out next greeting");
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = tokio::time::sleep(spacing) => {}
            }
        }
    }
    tracing::debug!("greeting consumer stopped");
}
