//! Thin Bot API client: request shaping, envelope parsing and error mapping.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use mentor_delivery::PlatformError;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_TELEGRAM_REQUEST_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_TELEGRAM_POLL_TIMEOUT_SECS: u64 = 25;

#[derive(Clone, PartialEq, Eq)]
pub struct TelegramPlatformConfig {
    pub api_base: String,
    pub bot_token: String,
    pub request_timeout_ms: u64,
    /// Long-poll timeout passed to `getUpdates`.
    pub poll_timeout_secs: u64,
}

impl Default for TelegramPlatformConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
            bot_token: String::new(),
            request_timeout_ms: DEFAULT_TELEGRAM_REQUEST_TIMEOUT_MS,
            poll_timeout_secs: DEFAULT_TELEGRAM_POLL_TIMEOUT_SECS,
        }
    }
}

impl std::fmt::Debug for TelegramPlatformConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramPlatformConfig")
            .field("api_base", &self.api_base)
            .field("bot_token", &"<redacted>")
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    request_timeout: Duration,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    pub fn new(config: &TelegramPlatformConfig) -> Result<Self> {
        let bot_token = config.bot_token.trim();
        if bot_token.is_empty() {
            bail!("telegram bot token cannot be empty");
        }
        let api_base = config.api_base.trim().trim_end_matches('/');
        if api_base.is_empty() {
            bail!("telegram api base cannot be empty");
        }
        let request_timeout = Duration::from_millis(config.request_timeout_ms.max(1));
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to create telegram api client")?;
        Ok(Self {
            http,
            api_base: api_base.to_string(),
            bot_token: bot_token.to_string(),
            request_timeout,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    /// POSTs a JSON payload to `method` and returns the `result` field.
    pub async fn post_json(&self, method: &str, payload: &Value) -> Result<Value, PlatformError> {
        let request = self.http.post(self.endpoint(method)).json(payload);
        self.execute(method, request).await
    }

    /// GETs `method` with query parameters, allowing `extra_timeout` on top of
    /// the client timeout for long polls.
    pub async fn get_query(
        &self,
        method: &str,
        query: &[(&str, String)],
        extra_timeout: Duration,
    ) -> Result<Value, PlatformError> {
        let request = self
            .http
            .get(self.endpoint(method))
            .query(query)
            .timeout(self.request_timeout + extra_timeout);
        self.execute(method, request).await
    }

    async fn execute(&self, method: &str, request: RequestBuilder) -> Result<Value, PlatformError> {
        // reqwest errors carry the request url, which embeds the bot token.
        let response = request.send().await.map_err(|error| {
            let error = error.without_url();
            PlatformError::Transport(format!("telegram {method} transport error: {error}"))
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|error| {
            let error = error.without_url();
            PlatformError::Transport(format!("telegram {method} body read failed: {error}"))
        })?;
        let envelope = serde_json::from_str::<ApiEnvelope>(&body).ok();

        match envelope {
            Some(envelope) if envelope.ok && (200..300).contains(&status) => {
                Ok(envelope.result.unwrap_or(Value::Null))
            }
            Some(envelope) => {
                let description = envelope.description.unwrap_or_default();
                let retry_after = envelope.parameters.and_then(|params| params.retry_after);
                Err(classify_api_failure(method, status, &description, retry_after))
            }
            None => Err(classify_api_failure(
                method,
                status,
                "response body is not a Bot API envelope",
                None,
            )),
        }
    }
}

/// Maps a failed Bot API call onto the scheduler's error vocabulary.
pub fn classify_api_failure(
    method: &str,
    status: u16,
    description: &str,
    retry_after: Option<u64>,
) -> PlatformError {
    if let Some(seconds) = retry_after {
        return PlatformError::FloodWait {
            seconds: seconds.max(1),
        };
    }
    if status == 429 {
        return PlatformError::FloodWait {
            seconds: parse_retry_after(description).unwrap_or(1).max(1),
        };
    }
    let lowered = description.to_ascii_lowercase();
    let unknown_chat = ["chat not found", "user not found", "peer_id_invalid"]
        .iter()
        .any(|needle| lowered.contains(needle));
    if status == 403 || (status == 400 && unknown_chat) {
        return PlatformError::InvalidRecipient(description.to_string());
    }
    PlatformError::Transport(format!(
        "telegram {method} failed with status {status}: {description}"
    ))
}

// "Too Many Requests: retry after 35" carries the wait in its last token.
fn parse_retry_after(description: &str) -> Option<u64> {
    description
        .split_whitespace()
        .next_back()
        .and_then(|token| token.trim_end_matches('.').parse::<u64>().ok())
}
