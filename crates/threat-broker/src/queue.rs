//! Durable queue handles with visibility leasing and dead-letter routing.
//!
//! A [`Queue`] is a named partition of a [`MessageStore`] plus the lease
//! policy applied when receiving from it. Handles are cheap to clone and all
//! clones refer to the same queue.

use crate::error::{BrokerError, ConfigurationError};
use crate::message::{MessageId, QueueName, QueueSize, ReceiptHandle, ReceivedMessage};
use crate::store::{same_store, LeaseRequest, MessageStore};
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

/// Default lease length for ordinary queues
pub const DEFAULT_VISIBILITY_TIMEOUT_SECONDS: i64 = 30;

/// Longest lease a queue accepts (12 hours)
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: u64 = 43_200;

/// Default number of leases before a message is dead-lettered
pub const DEFAULT_MAX_RECEIVE_COUNT: u32 = 3;

// ============================================================================
// Queue Settings
// ============================================================================

/// Lease policy of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// How long a leased message stays hidden from other receivers
    pub visibility_timeout: Duration,
    /// Leases allowed before the message is moved to the dead letter queue
    pub max_receive_count: u32,
}

impl QueueSettings {
    pub fn new(visibility_timeout: Duration, max_receive_count: u32) -> Self {
        Self {
            visibility_timeout,
            max_receive_count,
        }
    }

    fn validate(&self, queue_name: &QueueName) -> Result<(), ConfigurationError> {
        if self.visibility_timeout <= Duration::zero() {
            return Err(ConfigurationError::Invalid {
                message: format!("visibility timeout of queue '{}' must be positive", queue_name),
            });
        }

        if self.visibility_timeout > Duration::seconds(MAX_VISIBILITY_TIMEOUT_SECONDS as i64) {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "visibility timeout of queue '{}' must not exceed {} seconds",
                    queue_name, MAX_VISIBILITY_TIMEOUT_SECONDS
                ),
            });
        }

        if self.max_receive_count == 0 {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "max receive count of queue '{}' must be at least 1",
                    queue_name
                ),
            });
        }

        Ok(())
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::seconds(DEFAULT_VISIBILITY_TIMEOUT_SECONDS),
            max_receive_count: DEFAULT_MAX_RECEIVE_COUNT,
        }
    }
}

// ============================================================================
// Queue
// ============================================================================

struct QueueInner {
    name: QueueName,
    settings: QueueSettings,
    dead_letter: Option<Queue>,
    /// Set for queues created as terminal dead letter sinks
    terminal: bool,
    store: Arc<dyn MessageStore>,
}

/// Handle to a durable queue
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.inner.name)
            .field("settings", &self.inner.settings)
            .field(
                "dead_letter_queue",
                &self.inner.dead_letter.as_ref().map(|q| q.name().clone()),
            )
            .field("terminal", &self.inner.terminal)
            .field("store", &self.inner.store.kind())
            .finish()
    }
}

impl Queue {
    /// Start building a queue stored in `store`
    pub fn builder(name: QueueName, store: Arc<dyn MessageStore>) -> QueueBuilder {
        QueueBuilder::new(name, store)
    }

    pub(crate) fn terminal(
        name: QueueName,
        settings: QueueSettings,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name,
                settings,
                dead_letter: None,
                terminal: true,
                store,
            }),
        }
    }

    /// Whether both handles refer to the same queue instance
    pub fn same_queue(&self, other: &Queue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn name(&self) -> &QueueName {
        &self.inner.name
    }

    pub fn settings(&self) -> QueueSettings {
        self.inner.settings
    }

    /// Queue receiving this queue's exhausted messages, if any
    pub fn dead_letter_queue(&self) -> Option<&Queue> {
        self.inner.dead_letter.as_ref()
    }

    /// Whether this queue was created as a terminal dead letter sink
    pub fn is_dead_letter(&self) -> bool {
        self.inner.terminal
    }

    pub(crate) fn store(&self) -> &Arc<dyn MessageStore> {
        &self.inner.store
    }

    /// Append a message, visible immediately with a receive count of zero
    pub async fn send(&self, body: &str) -> Result<MessageId, BrokerError> {
        let message_id = self.inner.store.insert(&self.inner.name, body).await?;

        debug!(
            queue = %self.inner.name,
            message_id = %message_id,
            bytes = body.len(),
            "Message sent"
        );

        Ok(message_id)
    }

    /// Lease up to `max_messages` visible messages, oldest first
    ///
    /// Messages whose receive count overflows are moved to the dead letter
    /// queue (or discarded when there is none) and left out of the result.
    pub async fn receive(&self, max_messages: u32) -> Result<Vec<ReceivedMessage>, BrokerError> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let request = LeaseRequest {
            max_messages,
            visibility_timeout: self.inner.settings.visibility_timeout,
            max_receive_count: self.inner.settings.max_receive_count,
            dead_letter_queue: self.inner.dead_letter.as_ref().map(|q| q.name().clone()),
        };

        let outcome = self.inner.store.lease(&self.inner.name, &request).await?;

        for moved in &outcome.dead_lettered {
            warn!(
                queue = %self.inner.name,
                dead_letter_queue = ?request.dead_letter_queue.as_ref().map(|q| q.as_str()),
                message_id = %moved.source_id,
                dead_letter_id = %moved.dead_letter_id,
                receive_count = moved.receive_count,
                "Message exceeded max receive count, moved to dead letter queue"
            );
        }

        for message_id in &outcome.discarded {
            warn!(
                queue = %self.inner.name,
                message_id = %message_id,
                max_receive_count = self.inner.settings.max_receive_count,
                "Message exceeded max receive count with no dead letter queue, discarded"
            );
        }

        debug!(
            queue = %self.inner.name,
            requested = max_messages,
            leased = outcome.leased.len(),
            "Receive complete"
        );

        Ok(outcome.leased)
    }

    /// Delete the message leased under `receipt`
    ///
    /// Returns `false` when the message is already gone, has been received
    /// again, its lease has expired, or it was moved to the dead letter queue.
    pub async fn delete(&self, receipt: &ReceiptHandle) -> Result<bool, BrokerError> {
        let deleted = self.inner.store.delete(&self.inner.name, receipt).await?;

        if !deleted {
            debug!(queue = %self.inner.name, receipt = %receipt, "Delete found no current lease");
        }

        Ok(deleted)
    }

    /// Move the message leased under `receipt` to the dead letter queue now
    pub async fn dead_letter(&self, receipt: &ReceiptHandle) -> Result<bool, BrokerError> {
        let dead_letter_queue =
            self.inner
                .dead_letter
                .as_ref()
                .ok_or_else(|| ConfigurationError::MissingDeadLetterQueue {
                    queue_name: self.inner.name.to_string(),
                })?;

        let moved = self
            .inner
            .store
            .dead_letter(&self.inner.name, receipt, dead_letter_queue.name())
            .await?;

        if moved {
            warn!(
                queue = %self.inner.name,
                dead_letter_queue = %dead_letter_queue.name(),
                "Message dead-lettered on request"
            );
        }

        Ok(moved)
    }

    /// Snapshot of visible and in-flight counts
    pub async fn size(&self) -> Result<QueueSize, BrokerError> {
        self.inner.store.counts(&self.inner.name).await
    }

    /// Remove every message of this queue
    pub async fn purge(&self) -> Result<u64, BrokerError> {
        let removed = self.inner.store.purge(&self.inner.name).await?;
        info!(queue = %self.inner.name, removed = removed, "Queue purged");
        Ok(removed)
    }
}

// ============================================================================
// Queue Builder
// ============================================================================

/// Builder validating queue wiring before a handle is handed out
pub struct QueueBuilder {
    name: QueueName,
    store: Arc<dyn MessageStore>,
    settings: QueueSettings,
    dead_letter: Option<Queue>,
}

impl QueueBuilder {
    pub fn new(name: QueueName, store: Arc<dyn MessageStore>) -> Self {
        Self {
            name,
            store,
            settings: QueueSettings::default(),
            dead_letter: None,
        }
    }

    pub fn settings(mut self, settings: QueueSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn visibility_timeout(mut self, timeout: Duration) -> Self {
        self.settings.visibility_timeout = timeout;
        self
    }

    pub fn max_receive_count(mut self, count: u32) -> Self {
        self.settings.max_receive_count = count;
        self
    }

    pub fn dead_letter_queue(mut self, queue: Queue) -> Self {
        self.dead_letter = Some(queue);
        self
    }

    /// Validate and build the queue
    pub fn build(self) -> Result<Queue, BrokerError> {
        self.settings.validate(&self.name)?;

        if let Some(dead_letter) = &self.dead_letter {
            if dead_letter.name() == &self.name {
                return Err(ConfigurationError::SelfDeadLetter {
                    queue_name: self.name.to_string(),
                }
                .into());
            }

            if dead_letter.dead_letter_queue().is_some() {
                return Err(ConfigurationError::DeadLetterChain {
                    dead_letter_queue: dead_letter.name().to_string(),
                }
                .into());
            }

            // Overflow moves happen inside one store transaction
            if !same_store(&self.store, dead_letter.store()) {
                return Err(ConfigurationError::StoreMismatch {
                    queue_name: self.name.to_string(),
                    dead_letter_queue: dead_letter.name().to_string(),
                }
                .into());
            }
        }

        Ok(Queue {
            inner: Arc::new(QueueInner {
                name: self.name,
                settings: self.settings,
                dead_letter: self.dead_letter,
                terminal: false,
                store: self.store,
            }),
        })
    }
}
