//! Long-polling `getUpdates` into inbound direct-message events.

use std::time::Duration;

use anyhow::{Context, Result};
use mentor_delivery::{CounterpartyId, InboundEvent};
use serde::Deserialize;

use crate::telegram_client::{TelegramClient, TelegramPlatformConfig};

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    from: Option<Sender>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: CounterpartyId,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct Sender {
    id: CounterpartyId,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug)]
pub struct TelegramUpdatePoller {
    client: TelegramClient,
    poll_timeout_secs: u64,
    next_offset: Option<i64>,
}

impl TelegramUpdatePoller {
    pub fn new(config: &TelegramPlatformConfig) -> Result<Self> {
        Ok(Self::from_client(
            TelegramClient::new(config)?,
            config.poll_timeout_secs,
        ))
    }

    pub fn from_client(client: TelegramClient, poll_timeout_secs: u64) -> Self {
        Self {
            client,
            poll_timeout_secs,
            next_offset: None,
        }
    }

    /// Offset acknowledged on the next poll, once any update has been seen.
    pub fn next_offset(&self) -> Option<i64> {
        self.next_offset
    }

    /// Fetches one batch and returns the private text messages in it.
    ///
    /// Every update advances the offset, including those filtered out, so
    /// nothing is fetched twice.
    pub async fn poll_once(&mut self) -> Result<Vec<InboundEvent>> {
        let mut query = vec![
            ("timeout", self.poll_timeout_secs.to_string()),
            ("allowed_updates", r#"["message"]"#.to_string()),
        ];
        if let Some(offset) = self.next_offset {
            query.push(("offset", offset.to_string()));
        }
        let result = self
            .client
            .get_query(
                "getUpdates",
                &query,
                Duration::from_secs(self.poll_timeout_secs),
            )
            .await
            .context("telegram getUpdates failed")?;
        let updates: Vec<Update> = serde_json::from_value(result)
            .context("telegram getUpdates response has malformed result[]")?;

        let mut events = Vec::new();
        for update in updates {
            let candidate = update.update_id.saturating_add(1);
            self.next_offset = Some(self.next_offset.map_or(candidate, |offset| offset.max(candidate)));
            if let Some(event) = update.message.and_then(direct_message_event) {
                events.push(event);
            }
        }
        tracing::debug!(
            events = events.len(),
            next_offset = self.next_offset.unwrap_or_default(),
            "telegram updates polled"
        );
        Ok(events)
    }
}

fn direct_message_event(message: Message) -> Option<InboundEvent> {
    if message.chat.kind != "private" {
        return None;
    }
    let sender = message.from?;
    if sender.is_bot {
        return None;
    }
    let text = message.text?;
    Some(InboundEvent {
        counterparty: sender.id,
        conversation: message.chat.id,
        handle: sender.username,
        text,
    })
}
