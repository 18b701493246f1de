//! Messaging platform capability consumed by the scheduler.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Platform-assigned numeric id of a remote party.
pub type CounterpartyId = i64;

/// One inbound direct message, already normalized by the platform adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub counterparty: CounterpartyId,
    /// Conversation to acknowledge as read; equals the counterparty for DMs.
    pub conversation: CounterpartyId,
    #[serde(default)]
    pub handle: Option<String>,
    pub text: String,
}

impl InboundEvent {
    pub fn direct(counterparty: CounterpartyId, handle: Option<&str>, text: &str) -> Self {
        Self {
            counterparty,
            conversation: counterparty,
            handle: handle.map(str::to_string),
            text: text.to_string(),
        }
    }

    /// Handle with surrounding whitespace and a leading `@` removed, if any remains.
    pub fn normalized_handle(&self) -> Option<String> {
        self.handle.as_deref().and_then(normalize_handle)
    }
}

/// Errors surfaced by a [`MessagingPlatform`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("flood control: wait {seconds}s before sending again")]
    FloodWait { seconds: u64 },
    #[error("invalid or unknown recipient: {0}")]
    InvalidRecipient(String),
    #[error("handle '{0}' does not resolve to a peer")]
    HandleNotFound(String),
    #[error("peer '{0}' is not a user")]
    NotAUser(String),
    #[error("platform transport error: {0}")]
    Transport(String),
}

impl PlatformError {
    /// Wait mandated by the platform when this is a flood-control signal.
    pub fn flood_wait(&self) -> Option<Duration> {
        match self {
            Self::FloodWait { seconds } => Some(Duration::from_secs(*seconds)),
            _ => None,
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::FloodWait { .. } => "platform_flood_wait",
            Self::InvalidRecipient(_) => "platform_invalid_recipient",
            Self::HandleNotFound(_) => "platform_handle_not_found",
            Self::NotAUser(_) => "platform_not_a_user",
            Self::Transport(_) => "platform_transport_error",
        }
    }
}

/// Operations the scheduler needs from the messaging platform client.
///
/// Connection, authentication and wire protocol stay behind this trait.
#[async_trait]
pub trait MessagingPlatform: Send + Sync {
    async fn send_text(&self, counterparty: CounterpartyId, text: &str) -> Result<(), PlatformError>;

    /// Shows a typing indicator; platforms expire it after roughly five seconds.
    async fn set_typing(&self, counterparty: CounterpartyId) -> Result<(), PlatformError>;

    async fn mark_read(&self, conversation: CounterpartyId) -> Result<(), PlatformError>;

    async fn resolve_handle(&self, handle: &str) -> Result<CounterpartyId, PlatformError>;

    async fn close(&self) -> Result<(), PlatformError> {
        Ok(())
    }
}

/// Trims `raw` and strips one leading `@`; returns `None` when nothing is left.
pub fn normalize_handle(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stripped = trimmed.strip_prefix('@').unwrap_or(trimmed).trim();
    (!stripped.is_empty()).then(|| stripped.to_string())
}
