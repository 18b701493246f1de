//! Response generator collaborator.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::platform::CounterpartyId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("response generation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("response generator request failed: {0}")]
    Request(String),
    #[error("response generator returned an invalid payload: {0}")]
    InvalidResponse(String),
}

/// Produces the text to send back for one inbound message.
///
/// The result may contain boundary markers. An empty string means there is
/// nothing to send, which is also how unregistered senders are declined.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate_response(
        &self,
        counterparty: CounterpartyId,
        handle: Option<&str>,
        text: &str,
    ) -> Result<String, GenerationError>;
}
