//! # Threat Broker
//!
//! Durable message broker used to hand threat events from producers to
//! consumers running in other processes.
//!
//! This library provides:
//! - Queues with visibility leasing and receive counting
//! - Dead letter queues for messages that exhaust their retry budget
//! - Fan-out topics delivering one message to many queues
//! - SQLite storage shared between processes, plus an in-memory store for tests
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all broker operations
//! - [`message`] - Identifiers, leased messages and receipt handles
//! - [`store`] - Storage trait and store configuration
//! - [`stores`] - SQLite and in-memory store implementations
//! - [`queue`] - Queue handles and the queue builder
//! - [`dlq`] - Dead letter queue factory
//! - [`topic`] - Fan-out topics
//! - [`broker`] - Registry of declared queues and topics

pub mod broker;
pub mod dlq;
pub mod error;
pub mod message;
pub mod queue;
pub mod store;
pub mod stores;
pub mod topic;

// Re-export commonly used types at crate root for convenience
pub use broker::Broker;
pub use dlq::{create_dlq, dead_letter_settings, DEAD_LETTER_VISIBILITY_TIMEOUT_SECONDS};
pub use error::{BrokerError, ConfigurationError, ValidationError};
pub use message::{
    DeadLetteredMessage, MessageId, QueueName, QueueSize, ReceiptHandle, ReceivedMessage,
    Timestamp,
};
pub use queue::{
    Queue, QueueBuilder, QueueSettings, DEFAULT_MAX_RECEIVE_COUNT,
    DEFAULT_VISIBILITY_TIMEOUT_SECONDS, MAX_VISIBILITY_TIMEOUT_SECONDS,
};
pub use store::{LeaseOutcome, LeaseRequest, MessageStore, StoreConfig, StoreKind};
pub use stores::{InMemoryStore, SqliteStore};
pub use topic::{FailedDelivery, PublishReport, SuccessfulDelivery, Topic};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
