//! Storage abstraction shared by every queue.
//!
//! A [`MessageStore`] holds the messages of many queues, partitioned by
//! [`QueueName`]. Queue semantics (visibility, receive counting and
//! dead-lettering) are expressed through the [`MessageStore::lease`]
//! primitive, which every backend must execute atomically per message: two
//! concurrent leases never hand out the same message.

use crate::error::{BrokerError, ConfigurationError};
use crate::message::{
    DeadLetteredMessage, MessageId, QueueName, QueueSize, ReceiptHandle, ReceivedMessage,
    Timestamp,
};
use crate::stores::{InMemoryStore, SqliteStore};
use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Parameters for a single lease call
#[derive(Debug, Clone)]
pub struct LeaseRequest {
    /// Upper bound on messages returned
    pub max_messages: u32,
    /// How long leased messages stay hidden
    pub visibility_timeout: Duration,
    /// Leases allowed before a message is dead-lettered
    pub max_receive_count: u32,
    /// Destination for messages whose receive count overflows, if any
    pub dead_letter_queue: Option<QueueName>,
}

impl LeaseRequest {
    /// Instant at which a message leased at `now` becomes visible again
    pub fn lease_expiry(&self, now: Timestamp) -> Result<Timestamp, BrokerError> {
        now.checked_plus(self.visibility_timeout).ok_or_else(|| {
            ConfigurationError::Invalid {
                message: format!(
                    "visibility timeout of {}s is out of range",
                    self.visibility_timeout.num_seconds()
                ),
            }
            .into()
        })
    }
}

/// Result of a lease call
#[derive(Debug, Default)]
pub struct LeaseOutcome {
    /// Messages leased to the caller, oldest first
    pub leased: Vec<ReceivedMessage>,
    /// Messages moved to the dead letter queue instead of being leased
    pub dead_lettered: Vec<DeadLetteredMessage>,
    /// Messages dropped because they overflowed and no dead letter queue exists
    pub discarded: Vec<MessageId>,
}

impl LeaseOutcome {
    /// True when the call neither leased nor moved any message
    pub fn is_empty(&self) -> bool {
        self.leased.is_empty() && self.dead_lettered.is_empty() && self.discarded.is_empty()
    }
}

/// Interface implemented by message storage backends
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message to a queue partition, visible immediately
    async fn insert(&self, queue: &QueueName, body: &str) -> Result<MessageId, BrokerError>;

    /// Lease up to `request.max_messages` eligible messages
    ///
    /// Eligible messages are those whose `visible_after` has passed, taken in
    /// arrival order. Each selected message has its receive count advanced; if
    /// that exceeds `request.max_receive_count` the message is moved to
    /// `request.dead_letter_queue` (or discarded when there is none) within
    /// the same atomic step and is not returned.
    async fn lease(
        &self,
        queue: &QueueName,
        request: &LeaseRequest,
    ) -> Result<LeaseOutcome, BrokerError>;

    /// Delete the message currently leased under `receipt`
    ///
    /// Returns `false` if the message is gone, has been leased again since,
    /// or the lease behind `receipt` has expired.
    async fn delete(&self, queue: &QueueName, receipt: &ReceiptHandle) -> Result<bool, BrokerError>;

    /// Move the message currently leased under `receipt` to `dead_letter_queue`
    ///
    /// Subject to the same receipt checks as [`MessageStore::delete`].
    async fn dead_letter(
        &self,
        queue: &QueueName,
        receipt: &ReceiptHandle,
        dead_letter_queue: &QueueName,
    ) -> Result<bool, BrokerError>;

    /// Count visible and in-flight messages
    async fn counts(&self, queue: &QueueName) -> Result<QueueSize, BrokerError>;

    /// Remove every message of a queue, returning how many were removed
    async fn purge(&self, queue: &QueueName) -> Result<u64, BrokerError>;

    /// Get store kind
    fn kind(&self) -> StoreKind;
}

/// Enumeration of supported store backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreKind {
    Sqlite,
    InMemory,
}

/// Store selection as it appears in configuration files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// SQLite database file shared by every producer and consumer process
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
    /// Process-local store, lost on exit
    InMemory,
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("queue.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

impl StoreConfig {
    /// Open the configured store
    pub async fn open(&self) -> Result<Arc<dyn MessageStore>, BrokerError> {
        let store: Arc<dyn MessageStore> = match self {
            Self::Sqlite { path } => Arc::new(SqliteStore::open(path).await?),
            Self::InMemory => Arc::new(InMemoryStore::new()),
        };
        Ok(store)
    }
}

/// Whether two handles point at the same store instance
pub(crate) fn same_store(a: &Arc<dyn MessageStore>, b: &Arc<dyn MessageStore>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
