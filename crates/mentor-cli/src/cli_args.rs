//! Command-line and environment configuration for the `mentor` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use mentor_delivery::{DeliveryConfig, DeliveryRuntimeConfig};
use mentor_pacing::{InboundGateConfig, RateLimitConfig};
use mentor_telegram::TelegramPlatformConfig;

use crate::http_generator::HttpResponseGeneratorConfig;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "mentor",
    about = "Paced Telegram delivery for a conversational course mentor",
    version
)]
pub struct MentorCli {
    #[arg(
        long = "telegram-bot-token",
        env = "MENTOR_TELEGRAM_BOT_TOKEN",
        hide_env_values = true,
        help = "Telegram Bot API token"
    )]
    pub telegram_bot_token: String,

    #[arg(
        long = "telegram-api-base",
        env = "MENTOR_TELEGRAM_API_BASE",
        default_value = mentor_telegram::DEFAULT_TELEGRAM_API_BASE
    )]
    pub telegram_api_base: String,

    #[arg(
        long = "telegram-request-timeout-ms",
        env = "MENTOR_TELEGRAM_REQUEST_TIMEOUT_MS",
        default_value_t = mentor_telegram::DEFAULT_TELEGRAM_REQUEST_TIMEOUT_MS,
        value_parser = parse_positive_u64
    )]
    pub telegram_request_timeout_ms: u64,

    #[arg(
        long = "telegram-poll-timeout-secs",
        env = "MENTOR_TELEGRAM_POLL_TIMEOUT_SECS",
        default_value_t = mentor_telegram::DEFAULT_TELEGRAM_POLL_TIMEOUT_SECS,
        help = "Long-poll timeout for getUpdates"
    )]
    pub telegram_poll_timeout_secs: u64,

    #[arg(
        long = "poll-error-backoff-ms",
        env = "MENTOR_POLL_ERROR_BACKOFF_MS",
        default_value_t = 5_000,
        value_parser = parse_positive_u64,
        help = "Pause after a failed getUpdates call"
    )]
    pub poll_error_backoff_ms: u64,

    #[arg(
        long = "generator-url",
        env = "MENTOR_GENERATOR_URL",
        help = "Endpoint that turns an inbound message into a response"
    )]
    pub generator_url: String,

    #[arg(
        long = "generator-api-key",
        env = "MENTOR_GENERATOR_API_KEY",
        hide_env_values = true,
        help = "Optional bearer token for the generator endpoint"
    )]
    pub generator_api_key: Option<String>,

    #[arg(
        long = "generation-timeout-secs",
        env = "MENTOR_GENERATION_TIMEOUT_SECS",
        default_value_t = 120,
        value_parser = parse_positive_u64
    )]
    pub generation_timeout_secs: u64,

    #[arg(
        long = "max-sends-per-minute",
        env = "MENTOR_MAX_SENDS_PER_MINUTE",
        default_value_t = mentor_pacing::DEFAULT_MAX_SENDS_PER_MINUTE,
        value_parser = parse_positive_usize
    )]
    pub max_sends_per_minute: usize,

    #[arg(
        long = "max-sends-per-hour",
        env = "MENTOR_MAX_SENDS_PER_HOUR",
        default_value_t = mentor_pacing::DEFAULT_MAX_SENDS_PER_HOUR,
        value_parser = parse_positive_usize
    )]
    pub max_sends_per_hour: usize,

    #[arg(
        long = "max-sends-per-day",
        env = "MENTOR_MAX_SENDS_PER_DAY",
        default_value_t = mentor_pacing::DEFAULT_MAX_SENDS_PER_DAY,
        value_parser = parse_positive_usize
    )]
    pub max_sends_per_day: usize,

    #[arg(
        long = "inbound-min-gap-ms",
        env = "MENTOR_INBOUND_MIN_GAP_MS",
        default_value_t = 2_000,
        help = "Minimum spacing between accepted messages from one counterparty"
    )]
    pub inbound_min_gap_ms: u64,

    #[arg(
        long = "inbound-max-per-minute",
        env = "MENTOR_INBOUND_MAX_PER_MINUTE",
        default_value_t = mentor_pacing::DEFAULT_INBOUND_MAX_PER_MINUTE,
        value_parser = parse_positive_usize
    )]
    pub inbound_max_per_minute: usize,

    #[arg(
        long = "split-marker",
        env = "MENTOR_SPLIT_MARKER",
        default_value = mentor_pacing::DEFAULT_SPLIT_MARKER
    )]
    pub split_marker: String,

    #[arg(
        long = "max-part-chars",
        env = "MENTOR_MAX_PART_CHARS",
        default_value_t = mentor_pacing::DEFAULT_MAX_PART_CHARS,
        value_parser = parse_positive_usize
    )]
    pub max_part_chars: usize,

    #[arg(
        long = "greeting-text",
        env = "MENTOR_GREETING_TEXT",
        help = "Overrides the first-contact greeting"
    )]
    pub greeting_text: Option<String>,

    #[arg(
        long = "greet",
        action = ArgAction::Append,
        value_delimiter = ',',
        help = "Handle to greet at startup; repeatable"
    )]
    pub greet: Vec<String>,

    #[arg(
        long = "known-counterparties-file",
        env = "MENTOR_KNOWN_COUNTERPARTIES_FILE",
        help = "JSON file of counterparty ids seeded at startup and extended by greetings"
    )]
    pub known_counterparties_file: Option<PathBuf>,

    #[arg(
        long = "control-bind",
        env = "MENTOR_CONTROL_BIND",
        help = "Address for the HTTP control surface; disabled when unset"
    )]
    pub control_bind: Option<String>,

    #[arg(
        long = "shutdown-grace-secs",
        env = "MENTOR_SHUTDOWN_GRACE_SECS",
        default_value_t = 10
    )]
    pub shutdown_grace_secs: u64,
}

impl MentorCli {
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_per_minute: self.max_sends_per_minute,
            max_per_hour: self.max_sends_per_hour,
            max_per_day: self.max_sends_per_day,
        }
    }

    pub fn runtime_config(&self) -> DeliveryRuntimeConfig {
        let defaults = DeliveryConfig::default();
        DeliveryRuntimeConfig {
            delivery: DeliveryConfig {
                inbound_gate: InboundGateConfig {
                    min_gap: Duration::from_millis(self.inbound_min_gap_ms),
                    max_per_minute: self.inbound_max_per_minute,
                },
                split_marker: self.split_marker.clone(),
                max_part_chars: self.max_part_chars,
                generation_timeout: Duration::from_secs(self.generation_timeout_secs),
                greeting_text: self
                    .greeting_text
                    .clone()
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or(defaults.greeting_text.clone()),
                ..defaults
            },
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }

    pub fn telegram_config(&self) -> TelegramPlatformConfig {
        TelegramPlatformConfig {
            api_base: self.telegram_api_base.clone(),
            bot_token: self.telegram_bot_token.clone(),
            request_timeout_ms: self.telegram_request_timeout_ms,
            poll_timeout_secs: self.telegram_poll_timeout_secs,
        }
    }

    pub fn generator_config(&self) -> HttpResponseGeneratorConfig {
        HttpResponseGeneratorConfig {
            endpoint: self.generator_url.clone(),
            api_key: self.generator_api_key.clone(),
            // The scheduler enforces the generation timeout; the HTTP client
            // only guards against a hung connection.
            request_timeout_ms: self
                .generation_timeout_secs
                .saturating_add(5)
                .saturating_mul(1_000),
        }
    }

    pub fn poll_error_backoff(&self) -> Duration {
        Duration::from_millis(self.poll_error_backoff_ms)
    }
}
