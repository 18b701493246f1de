//! Background task that keeps a typing indicator alive.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::platform::{CounterpartyId, MessagingPlatform};

/// Platform typing indicators expire after ~5s; refresh a little earlier.
pub const DEFAULT_TYPING_REFRESH: Duration = Duration::from_millis(4_500);

/// Re-issues the typing indicator until stopped.
///
/// Dropping the guard aborts the task, so an unwinding caller cannot leak a
/// renewing indicator.
#[derive(Debug)]
pub struct TypingKeepalive {
    task: Option<JoinHandle<()>>,
}

impl TypingKeepalive {
    pub fn start(
        platform: Arc<dyn MessagingPlatform>,
        counterparty: CounterpartyId,
        refresh: Duration,
    ) -> Self {
        let refresh = refresh.max(Duration::from_millis(100));
        let task = tokio::spawn(async move {
            loop {
                if let Err(error) = platform.set_typing(counterparty).await {
                    tracing::debug!(
                        counterparty,
                        reason_code = error.reason_code(),
                        error = %error,
                        "typing indicator refresh failed"
                    );
                }
                tokio::time::sleep(refresh).await;
            }
        });
        Self { task: Some(task) }
    }

    /// Cancels the task and waits until it has fully stopped.
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for TypingKeepalive {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
