//! # Threat Relay Core
//!
//! Moves threat events from producers to the ingestion endpoint through the
//! durable broker.
//!
//! This crate contains:
//! - The published event and the ingestion record ([`event`])
//! - The HTTP ingestion client ([`ingest`])
//! - The producer that wires and publishes to the event topic ([`producer`])
//! - The polling consumer forwarding queued events downstream ([`consumer`])
//! - Relay configuration with defaults and validation ([`config`])
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use threat_broker::{Broker, InMemoryStore};
//! use threat_relay_core::{BrokerSettings, ThreatEvent, ThreatEventProducer};
//!
//! # tokio_test::block_on(async {
//! let broker = Broker::new(Arc::new(InMemoryStore::new()));
//! let producer = ThreatEventProducer::new(&broker, &BrokerSettings::default()).unwrap();
//!
//! let event = ThreatEvent::new("192.168.1.1", "ip", "demo_feed").with_confidence(80);
//! producer.publish_event(event).await.unwrap();
//!
//! assert_eq!(producer.queue().size().await.unwrap().visible, 1);
//! # });
//! ```

pub mod config;
pub mod consumer;
pub mod event;
pub mod ingest;
pub mod producer;

pub use config::{BrokerSettings, ConsumerSettings, LoggingSettings, RelayConfig, RelayConfigError};
pub use consumer::{BatchResult, ConsumerError, ConsumerStats, ThreatEventConsumer};
pub use event::{EventDecodeError, EventRecord, ThreatEvent, UNKNOWN_SOURCE};
pub use ingest::{
    HttpIngestionClient, IngestError, IngestionClient, DEFAULT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT,
};
pub use producer::{ProducerError, ThreatEventProducer};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
