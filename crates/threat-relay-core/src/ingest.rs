//! Client for the downstream threat event ingestion endpoint.

use crate::event::EventRecord;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
#[path = "ingest_tests.rs"]
mod tests;

/// Default ingestion endpoint
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000/api/threat/events/";

/// Default deadline for one ingestion request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Characters of a rejection body kept for diagnostics
const REJECTION_BODY_LIMIT: usize = 100;

/// Errors from posting a record to the ingestion endpoint
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Endpoint rejected event with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid ingestion client configuration: {message}")]
    Configuration { message: String },
}

impl IngestError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::Transport(_) => true,
            Self::Configuration { .. } => false,
        }
    }
}

/// Interface for delivering event records downstream
#[async_trait]
pub trait IngestionClient: Send + Sync {
    /// Create one event downstream
    ///
    /// Success means the endpoint acknowledged the record with a 2xx status.
    async fn create_event(&self, record: &EventRecord) -> Result<(), IngestError>;

    /// Endpoint description for logs
    fn endpoint(&self) -> &str;
}

/// HTTP implementation posting JSON records
#[derive(Debug, Clone)]
pub struct HttpIngestionClient {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpIngestionClient {
    /// Create a client posting to `endpoint`, failing each request after `timeout`
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Configuration` if the endpoint is not an
    /// absolute URL or the HTTP client cannot be created.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, IngestError> {
        let endpoint = endpoint.into();
        reqwest::Url::parse(&endpoint).map_err(|e| IngestError::Configuration {
            message: format!("Invalid endpoint '{}': {}", endpoint, e),
        })?;

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("threat-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            endpoint,
        })
    }
}

#[async_trait]
impl IngestionClient for HttpIngestionClient {
    async fn create_event(&self, record: &EventRecord) -> Result<(), IngestError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(record)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(endpoint = %self.endpoint, status = status.as_u16(), "Event accepted");
            return Ok(());
        }

        // The body is diagnostic only; an unreadable one is reported empty
        let text = response.text().await.unwrap_or_default();
        Err(IngestError::Rejected {
            status: status.as_u16(),
            body: text.chars().take(REJECTION_BODY_LIMIT).collect(),
        })
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
