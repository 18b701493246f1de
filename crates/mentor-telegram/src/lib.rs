//! Telegram Bot API adapter for the mentor delivery scheduler.
//!
//! [`TelegramPlatform`] implements [`mentor_delivery::MessagingPlatform`] over
//! `sendMessage`, `sendChatAction` and `getChat`, mapping Bot API failures onto
//! [`mentor_delivery::PlatformError`]. [`TelegramUpdatePoller`] long-polls
//! `getUpdates` and turns private text messages into inbound events.

pub mod telegram_client;
pub mod telegram_platform;
pub mod telegram_updates;

pub use telegram_client::*;
pub use telegram_platform::*;
pub use telegram_updates::*;
