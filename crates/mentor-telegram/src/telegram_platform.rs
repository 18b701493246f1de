//! `MessagingPlatform` implementation over the Telegram Bot API.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use mentor_delivery::{normalize_handle, CounterpartyId, MessagingPlatform, PlatformError};
use serde::Deserialize;
use serde_json::json;

use crate::telegram_client::{TelegramClient, TelegramPlatformConfig};

#[derive(Debug, Deserialize)]
struct ChatInfo {
    id: CounterpartyId,
    #[serde(rename = "type")]
    kind: String,
}

/// [`MessagingPlatform`] backed by the Telegram Bot API.
#[derive(Debug)]
pub struct TelegramPlatform {
    client: TelegramClient,
    closed: AtomicBool,
}

impl TelegramPlatform {
    pub fn new(config: &TelegramPlatformConfig) -> Result<Self> {
        Ok(Self::from_client(TelegramClient::new(config)?))
    }

    pub fn from_client(client: TelegramClient) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
        }
    }

    pub fn client(&self) -> &TelegramClient {
        &self.client
    }

    fn ensure_open(&self) -> Result<(), PlatformError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PlatformError::Transport(
                "telegram platform is closed".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingPlatform for TelegramPlatform {
    async fn send_text(&self, counterparty: CounterpartyId, text: &str) -> Result<(), PlatformError> {
        self.ensure_open()?;
        self.client
            .post_json(
                "sendMessage",
                &json!({
                    "chat_id": counterparty,
                    "text": text,
                    "disable_web_page_preview": true
                }),
            )
            .await?;
        Ok(())
    }

    async fn set_typing(&self, counterparty: CounterpartyId) -> Result<(), PlatformError> {
        self.ensure_open()?;
        self.client
            .post_json(
                "sendChatAction",
                &json!({
                    "chat_id": counterparty,
                    "action": "typing"
                }),
            )
            .await?;
        Ok(())
    }

    async fn mark_read(&self, _conversation: CounterpartyId) -> Result<(), PlatformError> {
        // Bots have no read receipts.
        Ok(())
    }

    async fn resolve_handle(&self, handle: &str) -> Result<CounterpartyId, PlatformError> {
        self.ensure_open()?;
        let handle = normalize_handle(handle)
            .ok_or_else(|| PlatformError::HandleNotFound(handle.to_string()))?;
        let result = self
            .client
            .post_json("getChat", &json!({ "chat_id": format!("@{handle}") }))
            .await
            .map_err(|error| match error {
                PlatformError::FloodWait { .. } => error,
                PlatformError::InvalidRecipient(_) => PlatformError::HandleNotFound(handle.clone()),
                PlatformError::Transport(ref detail) if detail.contains("status 400") => {
                    PlatformError::HandleNotFound(handle.clone())
                }
                other => other,
            })?;
        let chat: ChatInfo = serde_json::from_value(result).map_err(|error| {
            PlatformError::Transport(format!("telegram getChat returned malformed chat: {error}"))
        })?;
        if chat.kind != "private" {
            return Err(PlatformError::NotAUser(handle));
        }
        tracing::debug!(handle, counterparty = chat.id, "resolved telegram handle");
        Ok(chat.id)
    }

    async fn close(&self) -> Result<(), PlatformError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!("telegram platform closed");
        }
        Ok(())
    }
}
