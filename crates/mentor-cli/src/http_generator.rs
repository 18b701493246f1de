//! [`ResponseGenerator`] that delegates to an HTTP endpoint.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use mentor_delivery::{CounterpartyId, GenerationError, ResponseGenerator};
use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Eq)]
pub struct HttpResponseGeneratorConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
}

impl std::fmt::Debug for HttpResponseGeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponseGeneratorConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct GenerationRequestBody<'a> {
    counterparty_id: CounterpartyId,
    handle: Option<&'a str>,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerationResponseBody {
    response: Option<String>,
}

pub struct HttpResponseGenerator {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpResponseGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponseGenerator")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpResponseGenerator {
    pub fn new(config: &HttpResponseGeneratorConfig) -> Result<Self> {
        let endpoint = config.endpoint.trim();
        if endpoint.is_empty() {
            bail!("generator endpoint cannot be empty");
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create generator http client")?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: config
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string),
        })
    }
}

#[async_trait]
impl ResponseGenerator for HttpResponseGenerator {
    async fn generate_response(
        &self,
        counterparty: CounterpartyId,
        handle: Option<&str>,
        text: &str,
    ) -> Result<String, GenerationError> {
        let mut request = self.http.post(&self.endpoint).json(&GenerationRequestBody {
            counterparty_id: counterparty,
            handle,
            text,
        });
        if let Some(api_key) = self.api_key.as_deref() {
            request = request.bearer_auth(api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|error| GenerationError::Request(format!("generator request failed: {error}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Request(format!(
                "generator returned status {}",
                status.as_u16()
            )));
        }
        let body = response
            .json::<GenerationResponseBody>()
            .await
            .map_err(|error| GenerationError::InvalidResponse(error.to_string()))?;
        Ok(body.response.unwrap_or_default())
    }
}
