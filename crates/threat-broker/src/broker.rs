//! Process-level registry of queues and topics.
//!
//! A [`Broker`] is created once at startup and passed by reference to every
//! component that needs a queue or topic. Declaring a name that already
//! exists returns the existing handle, which keeps repeated wiring (for
//! example constructing a producer twice) from duplicating subscriptions.

use crate::dlq::{create_dlq, dead_letter_settings};
use crate::error::{BrokerError, ConfigurationError};
use crate::message::QueueName;
use crate::queue::{Queue, QueueSettings};
use crate::store::MessageStore;
use crate::topic::Topic;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;

/// Registry of declared queues and topics over one store
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use threat_broker::{Broker, InMemoryStore, QueueName, QueueSettings};
///
/// # tokio_test::block_on(async {
/// let broker = Broker::new(Arc::new(InMemoryStore::new()));
/// let dlq = broker
///     .dead_letter_queue(QueueName::new("threat-events-dlq".to_string()).unwrap())
///     .unwrap();
/// let queue = broker
///     .queue(
///         QueueName::new("threat-events-queue".to_string()).unwrap(),
///         QueueSettings::default(),
///         Some(&dlq),
///     )
///     .unwrap();
///
/// let topic = broker.topic("threat-events");
/// topic.subscribe(&queue);
/// assert_eq!(topic.publish("{}").await.delivered_count(), 1);
/// # });
/// ```
pub struct Broker {
    store: Arc<dyn MessageStore>,
    queues: Mutex<HashMap<QueueName, Queue>>,
    topics: Mutex<HashMap<String, Arc<Topic>>>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("store", &self.store.kind())
            .finish_non_exhaustive()
    }
}

// Registry maps only ever gain or lose whole entries, so a poisoned lock
// still guards a consistent map.
fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Broker {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            store,
            queues: Mutex::new(HashMap::new()),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Store backing every queue of this broker
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Declare an ordinary queue, or get the one already declared
    ///
    /// Redeclaring a name with different settings or a different dead
    /// letter queue fails with a conflicting declaration error.
    pub fn queue(
        &self,
        name: QueueName,
        settings: QueueSettings,
        dead_letter_queue: Option<&Queue>,
    ) -> Result<Queue, BrokerError> {
        let mut queues = relock(&self.queues);

        if let Some(existing) = queues.get(&name) {
            let same_dead_letter = match (existing.dead_letter_queue(), dead_letter_queue) {
                (Some(current), Some(requested)) => current.same_queue(requested),
                (None, None) => true,
                _ => false,
            };

            if existing.is_dead_letter() || existing.settings() != settings || !same_dead_letter {
                return Err(ConfigurationError::ConflictingDeclaration {
                    name: name.to_string(),
                }
                .into());
            }
            return Ok(existing.clone());
        }

        let mut builder = Queue::builder(name.clone(), Arc::clone(&self.store)).settings(settings);
        if let Some(dead_letter_queue) = dead_letter_queue {
            builder = builder.dead_letter_queue(dead_letter_queue.clone());
        }
        let queue = builder.build()?;

        info!(
            queue = %name,
            visibility_timeout_ms = settings.visibility_timeout.num_milliseconds(),
            max_receive_count = settings.max_receive_count,
            dead_letter_queue = ?dead_letter_queue.map(|q| q.name().as_str()),
            "Queue declared"
        );

        queues.insert(name, queue.clone());
        Ok(queue)
    }

    /// Declare a terminal dead letter queue, or get the one already declared
    pub fn dead_letter_queue(&self, name: QueueName) -> Result<Queue, BrokerError> {
        let mut queues = relock(&self.queues);

        if let Some(existing) = queues.get(&name) {
            if !existing.is_dead_letter() || existing.settings() != dead_letter_settings() {
                return Err(ConfigurationError::ConflictingDeclaration {
                    name: name.to_string(),
                }
                .into());
            }
            return Ok(existing.clone());
        }

        let queue = create_dlq(name.clone(), Arc::clone(&self.store));
        info!(queue = %name, "Dead letter queue declared");

        queues.insert(name, queue.clone());
        Ok(queue)
    }

    /// Declare a topic, or get the one already declared
    pub fn topic(&self, name: &str) -> Arc<Topic> {
        let mut topics = relock(&self.topics);

        let topic = topics.entry(name.to_string()).or_insert_with(|| {
            info!(topic = %name, "Topic declared");
            Arc::new(Topic::new(name))
        });
        Arc::clone(topic)
    }

    /// Previously declared queue by name
    pub fn find_queue(&self, name: &QueueName) -> Option<Queue> {
        relock(&self.queues).get(name).cloned()
    }
}
