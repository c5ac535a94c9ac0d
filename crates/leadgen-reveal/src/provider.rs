//! Remote people-data provider client.
//!
//! The orchestrator talks to the provider through [`RevealProvider`] so tests
//! and alternative providers can be swapped in. [`SignalHireClient`] is the
//! `reqwest` implementation for the SignalHire API.

use crate::error::{Result, RevealError};
use async_trait::async_trait;
use leadgen_core::{CorrelationKey, Identifier, ProviderConfig};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Largest number of identifiers SignalHire accepts per reveal request.
pub const SIGNALHIRE_MAX_BATCH: usize = 100;

/// Operations the reveal pipeline needs from a provider.
#[async_trait]
pub trait RevealProvider: Send + Sync {
    /// Submit identifiers for revelation; results are posted to `callback_url`.
    ///
    /// Billable. Callers must not retry this on failure.
    ///
    /// # Errors
    /// Returns `Transport` or `Network` errors when the provider rejects the
    /// request or cannot be reached.
    async fn submit(&self, identifiers: &[Identifier], callback_url: &str)
        -> Result<CorrelationKey>;

    /// Remaining reveal credits for the current day. Idempotent.
    async fn remaining_credits(&self) -> Result<u32>;

    /// Largest batch the provider accepts in one submission.
    fn max_batch_size(&self) -> usize;

    /// Short provider name used in logs.
    fn provider_id(&self) -> &'static str;
}

/// SignalHire API client.
pub struct SignalHireClient {
    api_key: String,
    base_url: String,
    max_batch_size: usize,
    client: Client,
}

impl SignalHireClient {
    /// Create a client from provider configuration.
    ///
    /// # Errors
    /// Returns `InvalidOptions` if no API key is configured and `Transport`
    /// if the HTTP client cannot be created.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| RevealError::InvalidOptions("provider API key is not set".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RevealError::Transport {
                status: None,
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_batch_size: config.max_batch_size.clamp(1, SIGNALHIRE_MAX_BATCH),
            client,
        })
    }

    fn to_api_request<'a>(identifiers: &'a [Identifier], callback_url: &'a str) -> SearchRequest<'a> {
        SearchRequest {
            items: identifiers.iter().map(Identifier::as_str).collect(),
            callback_url,
        }
    }

    async fn error_from_response(response: reqwest::Response) -> RevealError {
        let status = response.status();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        RevealError::Transport {
            status: Some(status.as_u16()),
            message,
        }
    }
}

#[async_trait]
impl RevealProvider for SignalHireClient {
    async fn submit(
        &self,
        identifiers: &[Identifier],
        callback_url: &str,
    ) -> Result<CorrelationKey> {
        let response = self
            .client
            .post(format!("{}/candidate/search", self.base_url))
            .header("apikey", &self.api_key)
            .json(&Self::to_api_request(identifiers, callback_url))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| RevealError::UnreadableAcceptance(e.to_string()))?;
        parse_request_id(&body.request_id)
    }

    async fn remaining_credits(&self) -> Result<u32> {
        let response = self
            .client
            .get(format!("{}/credits", self.base_url))
            .header("apikey", &self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: CreditsResponse = response.json().await?;
        Ok(u32::try_from(body.credits.max(0)).unwrap_or(u32::MAX))
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn provider_id(&self) -> &'static str {
        "signalhire"
    }
}

/// The provider returns `requestId` as a number or a string.
fn parse_request_id(value: &Value) -> Result<CorrelationKey> {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => {
            return Err(RevealError::UnreadableAcceptance(format!(
                "unexpected requestId in response: {other}"
            )))
        }
    };
    CorrelationKey::new(raw).map_err(|e| RevealError::UnreadableAcceptance(e.to_string()))
}

// SignalHire API types

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    items: Vec<&'a str>,
    #[serde(rename = "callbackUrl")]
    callback_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "requestId")]
    request_id: Value,
}

#[derive(Debug, Deserialize)]
struct CreditsResponse {
    credits: i64,
}
