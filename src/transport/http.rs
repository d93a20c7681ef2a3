use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::learnings::LearningState;
use crate::trajectory::TrajectoryEvent;

use super::{IngestResponse, IngestTransport, TransportError};

/// Base delay for exponential backoff (milliseconds).
pub const RETRY_BASE_DELAY_MS: u64 = 100;

/// Maximum delay for exponential backoff (milliseconds).
pub const RETRY_MAX_DELAY_MS: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

impl Default for IngestClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_ms: default_timeout_ms(),
            retry_count: default_retry_count(),
        }
    }
}

#[derive(Serialize)]
struct IngestRequest<'a> {
    events: &'a [TrajectoryEvent],
}

/// `reqwest` client for the trajectory ingestion service.
pub struct HttpIngestClient {
    base_url: String,
    api_key: Option<String>,
    timeout_ms: u64,
    retry_count: u32,
    client: reqwest::Client,
}

impl HttpIngestClient {
    pub fn new(config: IngestClientConfig) -> Result<Self, TransportError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(TransportError::Config(
                "ingest baseUrl cannot be empty".to_string(),
            ));
        }
        if config.timeout_ms == 0 {
            return Err(TransportError::Config(
                "ingest timeout must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            base_url,
            api_key: config
                .api_key
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            timeout_ms: config.timeout_ms,
            retry_count: config.retry_count,
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(config.timeout_ms))
                .build()
                .map_err(|error| TransportError::Config(error.to_string()))?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn map_send_error(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            return TransportError::Timeout(format!(
                "ingest request timed out after {} ms",
                self.timeout_ms
            ));
        }
        if error.is_connect() {
            return TransportError::Request(format!(
                "could not reach ingest endpoint at {}: {error}",
                self.base_url
            ));
        }
        TransportError::from(error)
    }

    async fn ingest_once(
        &self,
        events: &[TrajectoryEvent],
    ) -> Result<IngestResponse, TransportError> {
        let endpoint = format!("{}/v1/events", self.base_url);
        trace!("posting {} events to {endpoint}", events.len());

        let response = self
            .authorize(self.client.post(&endpoint))
            .json(&IngestRequest { events })
            .send()
            .await
            .map_err(|error| self.map_send_error(error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                message: body,
            });
        }

        response.json::<IngestResponse>().await.map_err(|error| {
            TransportError::InvalidResponse(format!("failed to parse ingest response: {error}"))
        })
    }

    async fn learnings_once(&self, key: &str) -> Result<Option<LearningState>, TransportError> {
        let endpoint = format!(
            "{}/v1/learnings/{}",
            self.base_url,
            urlencoding::encode(key)
        );

        let response = self
            .authorize(self.client.get(&endpoint))
            .send()
            .await
            .map_err(|error| self.map_send_error(error))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                message: body,
            });
        }

        let state = response.json::<LearningState>().await.map_err(|error| {
            TransportError::InvalidResponse(format!("failed to parse learnings response: {error}"))
        })?;
        Ok(Some(state))
    }
}

#[async_trait]
impl IngestTransport for HttpIngestClient {
    async fn ingest(&self, events: &[TrajectoryEvent]) -> Result<IngestResponse, TransportError> {
        let mut attempt = 0;
        loop {
            match self.ingest_once(events).await {
                Ok(response) => {
                    if let Some(warning) = &response.warning {
                        warn!("ingest endpoint warning: {warning}");
                    }
                    return Ok(response);
                }
                Err(error) if error.is_retryable() && attempt < self.retry_count => {
                    warn!(
                        "ingest failed (attempt {}/{}): {error}, retrying...",
                        attempt + 1,
                        self.retry_count + 1
                    );
                    sleep(exponential_backoff(attempt)).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn get_learnings(&self, key: &str) -> Result<Option<LearningState>, TransportError> {
        let mut attempt = 0;
        loop {
            match self.learnings_once(key).await {
                Err(error) if error.is_retryable() && attempt < self.retry_count => {
                    debug!("learnings fetch failed (attempt {}): {error}", attempt + 1);
                    sleep(exponential_backoff(attempt)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

fn exponential_backoff(attempt: u32) -> Duration {
    let delay_ms = RETRY_BASE_DELAY_MS * 2_u64.pow(attempt.min(10));
    Duration::from_millis(delay_ms.min(RETRY_MAX_DELAY_MS))
}

fn default_base_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_retry_count() -> u32 {
    2
}
