//! # Threat Event Producer
//!
//! Publishes threat events to the configured topic. Construction declares
//! the dead letter queue, the primary queue and the topic on a [`Broker`],
//! then subscribes the queue to the topic. The broker returns existing
//! handles for names it already knows, so building a second producer from
//! the same broker reuses the same wiring and does not add a second
//! subscription.

use crate::config::BrokerSettings;
use crate::event::ThreatEvent;
use std::sync::Arc;
use threat_broker::{Broker, BrokerError, FailedDelivery, Queue, Topic, ValidationError};
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while wiring or publishing
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Topic '{topic}' has no subscribers")]
    NoSubscribers { topic: String },

    #[error("Event was not delivered to any subscriber of '{topic}': {failures:?}")]
    Undelivered {
        topic: String,
        failures: Vec<FailedDelivery>,
    },

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Invalid name: {0}")]
    InvalidName(#[from] ValidationError),

    #[error("Batch publish stopped after {published} events: {source}")]
    BatchInterrupted {
        /// Events published before the failure; these stay published
        published: usize,
        #[source]
        source: Box<ProducerError>,
    },
}

impl ProducerError {
    /// Check if error is transient and publishing may be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Undelivered { failures, .. } => failures.iter().all(|f| f.is_transient),
            Self::Broker(error) => error.is_transient(),
            Self::BatchInterrupted { source, .. } => source.is_transient(),
            Self::Serialization(_) | Self::NoSubscribers { .. } | Self::InvalidName(_) => false,
        }
    }
}

// ============================================================================
// Producer
// ============================================================================

/// Publisher of threat events
#[derive(Debug, Clone)]
pub struct ThreatEventProducer {
    topic: Arc<Topic>,
    queue: Queue,
    dead_letter_queue: Queue,
}

impl ThreatEventProducer {
    /// Declare (or look up) the dead letter queue, primary queue and topic
    ///
    /// # Errors
    ///
    /// Fails when a name is invalid or the broker already knows one of the
    /// queues with different settings.
    pub fn new(broker: &Broker, settings: &BrokerSettings) -> Result<Self, ProducerError> {
        let dead_letter_queue = broker.dead_letter_queue(settings.dead_letter_queue_name()?)?;
        let queue = broker.queue(
            settings.queue_name()?,
            settings.queue_settings(),
            Some(&dead_letter_queue),
        )?;
        let topic = broker.topic(&settings.topic_name);

        if topic.subscribe(&queue) {
            info!(
                topic = %topic.name(),
                queue = %queue.name(),
                dead_letter_queue = %dead_letter_queue.name(),
                "Producer initialized"
            );
        } else {
            debug!(topic = %topic.name(), "Producer reusing existing wiring");
        }

        Ok(Self {
            topic,
            queue,
            dead_letter_queue,
        })
    }

    /// Publish one event, returning the message body that was sent
    ///
    /// The event is stamped with the current UTC time when it has no
    /// timestamp. Delivery that reaches only some subscribers is logged and
    /// still counts as published.
    pub async fn publish_event(&self, mut event: ThreatEvent) -> Result<String, ProducerError> {
        event.stamp_if_missing();
        let body = event.to_body()?;

        let report = self.topic.publish(&body).await;

        if report.is_no_op() {
            return Err(ProducerError::NoSubscribers {
                topic: self.topic.name().to_string(),
            });
        }

        if report.is_complete_failure() {
            return Err(ProducerError::Undelivered {
                topic: self.topic.name().to_string(),
                failures: report.failed,
            });
        }

        if !report.is_complete_success() {
            warn!(
                topic = %self.topic.name(),
                indicator = %event.indicator,
                delivered = report.delivered_count(),
                failed = report.failed.len(),
                "Event reached only some subscribers"
            );
        }

        debug!(
            topic = %self.topic.name(),
            indicator = %event.indicator,
            indicator_type = %event.indicator_type,
            delivered = report.delivered_count(),
            "Event published"
        );

        Ok(body)
    }

    /// Publish events one by one, returning how many were published
    ///
    /// Publishing stops at the first failure; events published before it
    /// stay published and their count is carried by
    /// [`ProducerError::BatchInterrupted`].
    pub async fn publish_batch(
        &self,
        events: impl IntoIterator<Item = ThreatEvent>,
    ) -> Result<usize, ProducerError> {
        let mut published = 0;

        for event in events {
            if let Err(error) = self.publish_event(event).await {
                warn!(
                    topic = %self.topic.name(),
                    published = published,
                    error = %error,
                    "Batch publish interrupted"
                );
                return Err(ProducerError::BatchInterrupted {
                    published,
                    source: Box::new(error),
                });
            }
            published += 1;
        }

        info!(topic = %self.topic.name(), published = published, "Batch published");
        Ok(published)
    }

    /// Primary queue subscribed to the topic
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn dead_letter_queue(&self) -> &Queue {
        &self.dead_letter_queue
    }

    pub fn topic(&self) -> &Arc<Topic> {
        &self.topic
    }
}
