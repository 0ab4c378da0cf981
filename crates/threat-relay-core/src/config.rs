//! # Relay Configuration
//!
//! Settings for the broker wiring, the consumer loop and logging. Every
//! field carries a serde default, so an empty configuration source yields a
//! working local setup: a `queue.db` SQLite store, the `threat-events`
//! topic feeding `threat-events-queue`, and a consumer posting to a local
//! ingestion endpoint.

use crate::ingest::{DEFAULT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use threat_broker::{QueueName, QueueSettings, StoreConfig, ValidationError};

pub use threat_broker::MAX_VISIBILITY_TIMEOUT_SECONDS;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Largest batch a consumer may request per poll
pub const MAX_BATCH_SIZE: u32 = 1_000;

// ============================================================================
// Configuration Types
// ============================================================================

/// Complete relay configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Store, topic and queue wiring
    pub broker: BrokerSettings,

    /// Polling consumer settings
    pub consumer: ConsumerSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

impl RelayConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<(), RelayConfigError> {
        self.broker.validate()?;
        self.consumer.validate()?;
        Ok(())
    }
}

/// Broker wiring shared by producers and consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Message store backing every queue
    pub store: StoreConfig,

    /// Topic events are published to
    pub topic_name: String,

    /// Queue subscribed to the topic and drained by consumers
    pub queue_name: String,

    /// Terminal queue for events that exhaust their retries
    pub dead_letter_queue_name: String,

    /// Seconds a received event stays hidden before redelivery
    pub visibility_timeout_seconds: u64,

    /// Deliveries allowed before an event is dead-lettered
    pub max_receive_count: u32,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            topic_name: "threat-events".to_string(),
            queue_name: "threat-events-queue".to_string(),
            dead_letter_queue_name: "threat-events-dlq".to_string(),
            visibility_timeout_seconds: 30,
            max_receive_count: 3,
        }
    }
}

impl BrokerSettings {
    pub fn queue_name(&self) -> Result<QueueName, ValidationError> {
        QueueName::new(self.queue_name.clone())
    }

    pub fn dead_letter_queue_name(&self) -> Result<QueueName, ValidationError> {
        QueueName::new(self.dead_letter_queue_name.clone())
    }

    /// Lease policy of the primary queue
    pub fn queue_settings(&self) -> QueueSettings {
        let seconds = i64::try_from(self.visibility_timeout_seconds).unwrap_or(i64::MAX);
        QueueSettings::new(chrono::Duration::seconds(seconds), self.max_receive_count)
    }

    pub fn validate(&self) -> Result<(), RelayConfigError> {
        if self.topic_name.trim().is_empty() {
            return Err(RelayConfigError::invalid("broker.topic_name", "must not be empty"));
        }

        self.queue_name()
            .map_err(|e| RelayConfigError::invalid("broker.queue_name", e.to_string()))?;
        self.dead_letter_queue_name()
            .map_err(|e| RelayConfigError::invalid("broker.dead_letter_queue_name", e.to_string()))?;

        if self.queue_name == self.dead_letter_queue_name {
            return Err(RelayConfigError::invalid(
                "broker.dead_letter_queue_name",
                "must differ from broker.queue_name",
            ));
        }

        if self.visibility_timeout_seconds == 0
            || self.visibility_timeout_seconds > MAX_VISIBILITY_TIMEOUT_SECONDS
        {
            return Err(RelayConfigError::invalid(
                "broker.visibility_timeout_seconds",
                format!("must be between 1 and {}", MAX_VISIBILITY_TIMEOUT_SECONDS),
            ));
        }

        if self.max_receive_count == 0 {
            return Err(RelayConfigError::invalid(
                "broker.max_receive_count",
                "must be at least 1",
            ));
        }

        Ok(())
    }
}

/// Settings of the polling consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Ingestion endpoint receiving event records
    pub endpoint: String,

    /// Deadline for one ingestion request, in seconds
    pub request_timeout_seconds: u64,

    /// Pause between polls, in seconds
    pub poll_interval_seconds: f64,

    /// Messages requested per poll
    pub batch_size: u32,

    /// Send bodies that are not valid JSON objects straight to the dead
    /// letter queue instead of waiting for their receive count to run out
    pub dead_letter_malformed: bool,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            poll_interval_seconds: 2.0,
            batch_size: 10,
            dead_letter_malformed: false,
        }
    }
}

impl ConsumerSettings {
    /// Pause between polls
    ///
    /// Falls back to the default interval when the configured value is not a
    /// valid duration; [`ConsumerSettings::validate`] rejects such values.
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval_seconds)
            .unwrap_or_else(|_| Duration::from_secs(2))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), RelayConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(RelayConfigError::invalid("consumer.endpoint", "must not be empty"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(RelayConfigError::invalid(
                "consumer.request_timeout_seconds",
                "must be at least 1",
            ));
        }

        let valid_interval = Duration::try_from_secs_f64(self.poll_interval_seconds)
            .map(|interval| !interval.is_zero())
            .unwrap_or(false);
        if !valid_interval {
            return Err(RelayConfigError::invalid(
                "consumer.poll_interval_seconds",
                "must be a positive number of seconds",
            ));
        }

        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(RelayConfigError::invalid(
                "consumer.batch_size",
                format!("must be between 1 and {}", MAX_BATCH_SIZE),
            ));
        }

        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl RelayConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
