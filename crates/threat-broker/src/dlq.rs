//! Factory for terminal dead letter queues.

use crate::message::QueueName;
use crate::queue::{Queue, QueueSettings};
use crate::store::MessageStore;
use chrono::Duration;
use std::sync::Arc;

#[cfg(test)]
#[path = "dlq_tests.rs"]
mod tests;

/// Lease length for dead letter queues, ten times the ordinary default
pub const DEAD_LETTER_VISIBILITY_TIMEOUT_SECONDS: i64 = 300;

/// Settings applied to every dead letter queue
///
/// The receive count never overflows, so messages only leave a dead letter
/// queue through an explicit delete, purge or redrive.
pub fn dead_letter_settings() -> QueueSettings {
    QueueSettings::new(
        Duration::seconds(DEAD_LETTER_VISIBILITY_TIMEOUT_SECONDS),
        u32::MAX,
    )
}

/// Create a terminal dead letter queue
///
/// The returned queue has no onward dead letter queue and none can be
/// attached to it.
pub fn create_dlq(name: QueueName, store: Arc<dyn MessageStore>) -> Queue {
    Queue::terminal(name, dead_letter_settings(), store)
}
