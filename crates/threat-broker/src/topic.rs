//! Fan-out topics delivering each published message to every subscriber.

use crate::message::{MessageId, QueueName};
use crate::queue::Queue;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "topic_tests.rs"]
mod tests;

// ============================================================================
// Publish Report
// ============================================================================

/// Result of publishing one message to a topic
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    /// Successful deliveries
    pub delivered: Vec<SuccessfulDelivery>,

    /// Failed deliveries
    pub failed: Vec<FailedDelivery>,
}

impl PublishReport {
    /// Number of subscribers that received the message
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    /// Check if all deliveries were successful
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Check if all deliveries failed
    pub fn is_complete_failure(&self) -> bool {
        self.delivered.is_empty() && !self.failed.is_empty()
    }

    /// Check if there were no subscribers to deliver to
    pub fn is_no_op(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty()
    }
}

/// Successful delivery to a subscriber queue
#[derive(Debug, Clone)]
pub struct SuccessfulDelivery {
    pub queue_name: QueueName,
    pub message_id: MessageId,
}

/// Failed delivery to a subscriber queue
#[derive(Debug, Clone)]
pub struct FailedDelivery {
    pub queue_name: QueueName,
    pub error: String,
    pub is_transient: bool,
}

// ============================================================================
// Topic
// ============================================================================

/// Named set of subscriber queues
///
/// Membership is by queue handle identity. Subscribers are kept in
/// subscription order.
#[derive(Debug)]
pub struct Topic {
    name: String,
    subscribers: RwLock<Vec<Queue>>,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a subscriber, returning `false` if it was already subscribed
    pub fn subscribe(&self, queue: &Queue) -> bool {
        // Entries are pushed and removed whole, so a poisoned list is intact
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if subscribers.iter().any(|q| q.same_queue(queue)) {
            debug!(topic = %self.name, queue = %queue.name(), "Queue already subscribed");
            return false;
        }

        subscribers.push(queue.clone());
        info!(topic = %self.name, queue = %queue.name(), "Queue subscribed");
        true
    }

    /// Remove a subscriber, returning `false` if it was not subscribed
    pub fn unsubscribe(&self, queue: &Queue) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let before = subscribers.len();
        subscribers.retain(|q| !q.same_queue(queue));
        let removed = subscribers.len() != before;

        if removed {
            info!(topic = %self.name, queue = %queue.name(), "Queue unsubscribed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Current subscribers in subscription order
    pub fn subscribers(&self) -> Vec<Queue> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Send `body` to every current subscriber
    ///
    /// Each send is independent: a failing subscriber is recorded in the
    /// report and the remaining subscribers still receive the message.
    pub async fn publish(&self, body: &str) -> PublishReport {
        // Snapshot so the lock is not held across sends
        let subscribers = self.subscribers();
        let mut report = PublishReport::default();

        for queue in subscribers {
            match queue.send(body).await {
                Ok(message_id) => report.delivered.push(SuccessfulDelivery {
                    queue_name: queue.name().clone(),
                    message_id,
                }),
                Err(error) => {
                    warn!(
                        topic = %self.name,
                        queue = %queue.name(),
                        error = %error,
                        "Delivery to subscriber failed"
                    );
                    report.failed.push(FailedDelivery {
                        queue_name: queue.name().clone(),
                        error: error.to_string(),
                        is_transient: error.is_transient(),
                    });
                }
            }
        }

        debug!(
            topic = %self.name,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Publish complete"
        );

        report
    }
}
