//! In-memory message store for testing and development.
//!
//! This module provides a fully functional process-local store that:
//! - Keeps one arrival-ordered partition per queue
//! - Implements visibility timeouts and receive counting
//! - Moves exhausted messages to dead letter partitions
//! - Provides thread-safe concurrent access
//!
//! Every operation runs under a single mutex, which makes leasing trivially
//! exclusive within the process. Nothing is shared with other processes.

use crate::error::BrokerError;
use crate::message::{
    DeadLetteredMessage, MessageId, QueueName, QueueSize, ReceiptHandle, ReceivedMessage,
    Timestamp,
};
use crate::store::{LeaseOutcome, LeaseRequest, MessageStore, StoreKind};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A message stored in a queue partition with its lease state
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: String,
    receive_count: u32,
    visible_after: Timestamp,
    created_at: Timestamp,
    /// Receipt of the current or most recent lease
    receipt: Option<String>,
}

impl StoredMessage {
    fn new(body: &str) -> Self {
        let now = Timestamp::now();
        Self {
            message_id: MessageId::new(),
            body: body.to_string(),
            receive_count: 0,
            visible_after: now,
            created_at: now,
            receipt: None,
        }
    }

    /// Check if message is available for leasing at `now`
    fn is_visible(&self, now: Timestamp) -> bool {
        now >= self.visible_after
    }
}

// ============================================================================
// InMemoryStore
// ============================================================================

/// Process-local message store
#[derive(Default)]
pub struct InMemoryStore {
    partitions: Mutex<HashMap<QueueName, VecDeque<StoredMessage>>>,
}

impl InMemoryStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
        queue: &QueueName,
    ) -> Result<MutexGuard<'_, HashMap<QueueName, VecDeque<StoredMessage>>>, BrokerError> {
        self.partitions
            .lock()
            .map_err(|_| BrokerError::LockPoisoned {
                queue_name: queue.to_string(),
            })
    }
}

/// Remove the message leased under `receipt` from a partition
///
/// The lease must still be running at `now`.
fn take_leased(
    partition: &mut VecDeque<StoredMessage>,
    receipt: &ReceiptHandle,
    now: Timestamp,
) -> Option<StoredMessage> {
    let position = partition.iter().position(|m| {
        m.receipt.as_deref() == Some(receipt.handle()) && !m.is_visible(now)
    })?;
    partition.remove(position)
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn insert(&self, queue: &QueueName, body: &str) -> Result<MessageId, BrokerError> {
        let stored = StoredMessage::new(body);
        let message_id = stored.message_id.clone();

        let mut partitions = self.lock(queue)?;
        partitions.entry(queue.clone()).or_default().push_back(stored);

        Ok(message_id)
    }

    async fn lease(
        &self,
        queue: &QueueName,
        request: &LeaseRequest,
    ) -> Result<LeaseOutcome, BrokerError> {
        let now = Timestamp::now();
        let visible_after = request.lease_expiry(now)?;
        let mut outcome = LeaseOutcome::default();
        let mut exhausted = Vec::new();

        let mut partitions = self.lock(queue)?;
        let Some(partition) = partitions.get_mut(queue) else {
            return Ok(outcome);
        };

        // Arrival order is preserved by the VecDeque, so the first visible
        // entries are the oldest eligible ones.
        let mut selected = 0;
        let mut index = 0;
        while index < partition.len() && selected < request.max_messages {
            if !partition[index].is_visible(now) {
                index += 1;
                continue;
            }
            selected += 1;

            let receive_count = partition[index].receive_count + 1;
            if receive_count > request.max_receive_count {
                if let Some(mut message) = partition.remove(index) {
                    message.receive_count = receive_count;
                    exhausted.push(message);
                }
                continue;
            }

            let message = &mut partition[index];
            let receipt_handle = ReceiptHandle::generate(visible_after);
            message.receive_count = receive_count;
            message.visible_after = visible_after;
            message.receipt = Some(receipt_handle.handle().to_string());

            outcome.leased.push(ReceivedMessage {
                message_id: message.message_id.clone(),
                queue: queue.clone(),
                body: message.body.clone(),
                receipt_handle,
                receive_count,
                created_at: message.created_at,
                visible_after,
            });
            index += 1;
        }

        for message in exhausted {
            match &request.dead_letter_queue {
                Some(dead_letter_queue) => {
                    let copy = StoredMessage::new(&message.body);
                    outcome.dead_lettered.push(DeadLetteredMessage {
                        source_id: message.message_id,
                        dead_letter_id: copy.message_id.clone(),
                        receive_count: message.receive_count,
                    });
                    partitions
                        .entry(dead_letter_queue.clone())
                        .or_default()
                        .push_back(copy);
                }
                None => outcome.discarded.push(message.message_id),
            }
        }

        debug!(
            queue = %queue,
            leased = outcome.leased.len(),
            dead_lettered = outcome.dead_lettered.len(),
            "In-memory lease complete"
        );

        Ok(outcome)
    }

    async fn delete(&self, queue: &QueueName, receipt: &ReceiptHandle) -> Result<bool, BrokerError> {
        let now = Timestamp::now();
        let mut partitions = self.lock(queue)?;
        let removed = partitions
            .get_mut(queue)
            .and_then(|partition| take_leased(partition, receipt, now));

        Ok(removed.is_some())
    }

    async fn dead_letter(
        &self,
        queue: &QueueName,
        receipt: &ReceiptHandle,
        dead_letter_queue: &QueueName,
    ) -> Result<bool, BrokerError> {
        let now = Timestamp::now();
        let mut partitions = self.lock(queue)?;
        let Some(message) = partitions
            .get_mut(queue)
            .and_then(|partition| take_leased(partition, receipt, now))
        else {
            return Ok(false);
        };

        partitions
            .entry(dead_letter_queue.clone())
            .or_default()
            .push_back(StoredMessage::new(&message.body));

        Ok(true)
    }

    async fn counts(&self, queue: &QueueName) -> Result<QueueSize, BrokerError> {
        let now = Timestamp::now();
        let partitions = self.lock(queue)?;

        let (visible, in_flight) = partitions
            .get(queue)
            .map(|partition| {
                partition.iter().fold((0, 0), |(visible, in_flight), m| {
                    if m.is_visible(now) {
                        (visible + 1, in_flight)
                    } else {
                        (visible, in_flight + 1)
                    }
                })
            })
            .unwrap_or((0, 0));

        Ok(QueueSize::new(visible, in_flight))
    }

    async fn purge(&self, queue: &QueueName) -> Result<u64, BrokerError> {
        let mut partitions = self.lock(queue)?;
        let removed = partitions
            .remove(queue)
            .map(|partition| partition.len() as u64)
            .unwrap_or(0);

        Ok(removed)
    }

    fn kind(&self) -> StoreKind {
        StoreKind::InMemory
    }
}
