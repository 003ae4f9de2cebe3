//! HTTP sink posting event batches to the logging backend.

use super::EventSink;
use crate::config::LoggerConfig;
use crate::error::{Result, TracewireError};
use crate::event::LogEvent;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct Batch<'a> {
    events: &'a [LogEvent],
}

/// Ships batches to `{base_url}/v1/log-repositories/{repository_id}/events`.
pub struct HttpSink {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpSink {
    pub fn new(
        base_url: impl AsRef<str>,
        repository_id: impl AsRef<str>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let endpoint = format!(
            "{}/v1/log-repositories/{}/events",
            base_url.as_ref().trim_end_matches('/'),
            urlencoding::encode(repository_id.as_ref())
        );

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
        })
    }

    /// Build a sink from configuration, failing if credentials are missing.
    pub fn from_config(config: &LoggerConfig) -> Result<Self> {
        let api_key = config.api_key.as_deref().ok_or_else(|| {
            TracewireError::ConfigError("API key is required (TRACEWIRE_API_KEY)".to_string())
        })?;
        let repository_id = config.repository_id.as_deref().ok_or_else(|| {
            TracewireError::ConfigError(
                "Log repository id is required (TRACEWIRE_LOG_REPO_ID)".to_string(),
            )
        })?;

        Self::new(&config.base_url, repository_id, api_key)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EventSink for HttpSink {
    async fn deliver(&self, events: &[LogEvent]) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(&Batch { events })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TracewireError::Sink {
                message: format!("Backend rejected batch: {} - {}", status, error_text),
                retryable: is_retryable_status(status),
            });
        }

        debug!(count = events.len(), endpoint = %self.endpoint, "Delivered event batch");
        Ok(())
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}
