//! # Threat Event Consumer
//!
//! Polls a queue in batches, turns each message into an [`EventRecord`] and
//! posts it to the ingestion endpoint. A message is deleted only after the
//! endpoint accepts it; anything else leaves it leased, so it becomes
//! receivable again once its visibility timeout lapses and is eventually
//! dead-lettered by the queue's receive-count policy.
//!
//! The polling loop ([`ThreatEventConsumer::start`]) observes stop requests
//! between batches only. A batch in progress always runs to completion.

use crate::config::{ConsumerSettings, RelayConfigError};
use crate::event::EventRecord;
use crate::ingest::IngestionClient;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use threat_broker::{BrokerError, Queue, QueueSize, ReceivedMessage};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

// ============================================================================
// Result Types
// ============================================================================

/// Counts for one polled batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub processed: u64,
    pub failed: u64,
}

impl BatchResult {
    pub fn is_empty(&self) -> bool {
        self.processed == 0 && self.failed == 0
    }
}

/// Lifetime counters plus a snapshot of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerStats {
    pub processed: u64,
    pub failed: u64,
    pub queue_size: QueueSize,
}

/// Errors ending the polling loop or preventing it from starting
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("Consumer for queue '{queue_name}' is already running")]
    AlreadyRunning { queue_name: String },

    #[error("Invalid consumer settings: {0}")]
    Configuration(#[from] RelayConfigError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Stopped,
    Running,
    Stopping,
}

/// How a single message fared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageOutcome {
    Ingested,
    Malformed,
    Rejected,
}

// ============================================================================
// Consumer
// ============================================================================

/// Polling consumer forwarding queued events to the ingestion endpoint
pub struct ThreatEventConsumer {
    queue: Queue,
    client: Arc<dyn IngestionClient>,
    poll_interval: Duration,
    batch_size: u32,
    dead_letter_malformed: bool,
    state: watch::Sender<LoopState>,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl std::fmt::Debug for ThreatEventConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreatEventConsumer")
            .field("queue", self.queue.name())
            .field("endpoint", &self.client.endpoint())
            .field("poll_interval", &self.poll_interval)
            .field("batch_size", &self.batch_size)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl ThreatEventConsumer {
    /// Create a stopped consumer
    ///
    /// # Errors
    ///
    /// Returns `ConsumerError::Configuration` if the settings are invalid.
    pub fn new(
        queue: Queue,
        client: Arc<dyn IngestionClient>,
        settings: &ConsumerSettings,
    ) -> Result<Self, ConsumerError> {
        settings.validate()?;

        let (state, _) = watch::channel(LoopState::Stopped);
        Ok(Self {
            queue,
            client,
            poll_interval: settings.poll_interval(),
            batch_size: settings.batch_size,
            dead_letter_malformed: settings.dead_letter_malformed,
            state,
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Forward one message to the ingestion endpoint
    ///
    /// Returns `true` only when the endpoint accepted the record. Every
    /// failure is logged and reported as `false`; the message is left alone.
    pub async fn process_message(&self, message: &ReceivedMessage) -> bool {
        self.handle_message(message).await == MessageOutcome::Ingested
    }

    async fn handle_message(&self, message: &ReceivedMessage) -> MessageOutcome {
        let record = match EventRecord::from_body(&message.body) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    queue = %message.queue,
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    error = %e,
                    "Message body is not a valid event"
                );
                return MessageOutcome::Malformed;
            }
        };

        match self.client.create_event(&record).await {
            Ok(()) => {
                info!(
                    queue = %message.queue,
                    message_id = %message.message_id,
                    indicator = %record.indicator_label(),
                    "Created event"
                );
                MessageOutcome::Ingested
            }
            Err(e) => {
                warn!(
                    queue = %message.queue,
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    endpoint = %self.client.endpoint(),
                    transient = e.is_transient(),
                    error = %e,
                    "Event ingestion failed"
                );
                MessageOutcome::Rejected
            }
        }
    }

    /// Receive one batch and process every message in it
    ///
    /// # Errors
    ///
    /// Only a failure to receive from the queue is returned. Per-message
    /// failures are counted in the result.
    pub async fn process_batch(&self) -> Result<BatchResult, BrokerError> {
        let messages = self.queue.receive(self.batch_size).await?;
        let mut result = BatchResult::default();

        for message in &messages {
            match self.handle_message(message).await {
                MessageOutcome::Ingested => {
                    self.acknowledge(message).await;
                    result.processed += 1;
                    self.processed.fetch_add(1, Ordering::Relaxed);
                }
                outcome => {
                    if outcome == MessageOutcome::Malformed && self.dead_letter_malformed {
                        self.dead_letter_malformed(message).await;
                    }
                    result.failed += 1;
                    self.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        Ok(result)
    }

    async fn acknowledge(&self, message: &ReceivedMessage) {
        match self.queue.delete(&message.receipt_handle).await {
            Ok(true) => {}
            Ok(false) if message.receipt_handle.is_expired() => warn!(
                queue = %message.queue,
                message_id = %message.message_id,
                lease_expired_at = %message.receipt_handle.expires_at(),
                "Lease expired before delete, event may be delivered again"
            ),
            Ok(false) => warn!(
                queue = %message.queue,
                message_id = %message.message_id,
                "Message was removed or leased again before delete"
            ),
            Err(e) => warn!(
                queue = %message.queue,
                message_id = %message.message_id,
                error = %e,
                "Failed to delete ingested message, event may be delivered again"
            ),
        }
    }

    async fn dead_letter_malformed(&self, message: &ReceivedMessage) {
        match self.queue.dead_letter(&message.receipt_handle).await {
            Ok(true) => info!(
                queue = %message.queue,
                message_id = %message.message_id,
                "Malformed message moved to dead letter queue"
            ),
            Ok(false) => debug!(
                queue = %message.queue,
                message_id = %message.message_id,
                "Malformed message was no longer leased"
            ),
            Err(e) => warn!(
                queue = %message.queue,
                message_id = %message.message_id,
                error = %e,
                "Failed to dead-letter malformed message"
            ),
        }
    }

    /// Poll until [`ThreatEventConsumer::stop`] is called
    ///
    /// Transient receive failures are logged and polling continues after the
    /// usual pause. Any other receive failure ends the loop with an error.
    /// The consumer can be started again after it returns.
    pub async fn start(&self) -> Result<(), ConsumerError> {
        let started = self.state.send_if_modified(|state| {
            if *state == LoopState::Stopped {
                *state = LoopState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(ConsumerError::AlreadyRunning {
                queue_name: self.queue.name().to_string(),
            });
        }

        let mut state = self.state.subscribe();
        info!(
            queue = %self.queue.name(),
            endpoint = %self.client.endpoint(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Consumer starting"
        );

        let outcome = loop {
            if *state.borrow_and_update() == LoopState::Stopping {
                break Ok(());
            }

            match self.process_batch().await {
                Ok(batch) if !batch.is_empty() => info!(
                    queue = %self.queue.name(),
                    processed = batch.processed,
                    failed = batch.failed,
                    "Batch complete"
                ),
                Ok(_) => {}
                Err(e) if e.is_transient() => warn!(
                    queue = %self.queue.name(),
                    error = %e,
                    "Receive failed, retrying after poll interval"
                ),
                Err(e) => {
                    error!(queue = %self.queue.name(), error = %e, "Receive failed, consumer stopping");
                    break Err(ConsumerError::Broker(e));
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = state.changed() => {}
            }
        };

        self.state.send_replace(LoopState::Stopped);
        info!(
            queue = %self.queue.name(),
            processed = self.processed.load(Ordering::Relaxed),
            failed = self.failed.load(Ordering::Relaxed),
            "Consumer stopped"
        );

        outcome
    }

    /// Ask a running loop to exit before its next poll
    ///
    /// Returns `false` when the consumer is not running.
    pub fn stop(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == LoopState::Running {
                *state = LoopState::Stopping;
                true
            } else {
                false
            }
        })
    }

    /// Whether the polling loop is active (including while it winds down)
    pub fn is_running(&self) -> bool {
        *self.state.borrow() != LoopState::Stopped
    }

    /// Lifetime counters and the current queue size
    pub async fn get_stats(&self) -> Result<ConsumerStats, BrokerError> {
        Ok(ConsumerStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            queue_size: self.queue.size().await?,
        })
    }
}
