//! Common test utilities for threat relay integration tests
//!
//! This module provides:
//! - SQLite-backed brokers in temporary directories
//! - Queue wiring helpers
//! - Shared event fixtures

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use threat_broker::{Broker, MessageStore, Queue, QueueName, SqliteStore};
use threat_relay_core::{BrokerSettings, ThreatEvent};

/// Temporary directory holding one shared database file
pub struct TestDatabase {
    _dir: TempDir,
    path: PathBuf,
}

impl TestDatabase {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        Self { _dir: dir, path }
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new, independent store handle on the database file
    pub async fn open(&self) -> Arc<dyn MessageStore> {
        Arc::new(SqliteStore::open(&self.path).await.unwrap())
    }

    /// Open a broker on its own store handle, as a separate process would
    #[allow(dead_code)]
    pub async fn broker(&self) -> Broker {
        Broker::new(self.open().await)
    }

    /// Broker settings pointing at this database
    #[allow(dead_code)]
    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            store: threat_broker::StoreConfig::Sqlite {
                path: self.path.clone(),
            },
            ..Default::default()
        }
    }
}

#[allow(dead_code)]
pub fn queue_name(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

/// Queue with a short lease and its dead letter queue
#[allow(dead_code)]
pub fn short_lease_queue(
    store: Arc<dyn MessageStore>,
    name: &str,
    max_receive_count: u32,
) -> (Queue, Queue) {
    let dlq = threat_broker::create_dlq(queue_name(&format!("{}-dlq", name)), store.clone());
    let queue = Queue::builder(queue_name(name), store)
        .visibility_timeout(chrono::Duration::seconds(1))
        .max_receive_count(max_receive_count)
        .dead_letter_queue(dlq.clone())
        .build()
        .unwrap();
    (queue, dlq)
}

#[allow(dead_code)]
pub fn sample_event(indicator: &str) -> ThreatEvent {
    ThreatEvent::new(indicator, "ip", "integration_test")
        .with_related_technique("T1059")
        .with_confidence(80)
}

/// Comfortably past a one second lease, given millisecond persistence
#[allow(dead_code)]
pub const LEASE_EXPIRY_WAIT: std::time::Duration = std::time::Duration::from_millis(1_100);
