//! Tests for the dead letter queue factory.

use super::*;
use crate::stores::InMemoryStore;

fn dlq() -> Queue {
    create_dlq(
        QueueName::new("threat-events-dlq".to_string()).unwrap(),
        Arc::new(InMemoryStore::new()),
    )
}

#[test]
fn test_dead_letter_queue_is_terminal() {
    let queue = dlq();

    assert!(queue.is_dead_letter());
    assert!(queue.dead_letter_queue().is_none());
}

#[test]
fn test_dead_letter_queue_settings() {
    let settings = dlq().settings();

    assert_eq!(settings.visibility_timeout, Duration::seconds(300));
    assert_eq!(settings.max_receive_count, u32::MAX);
}

#[tokio::test]
async fn test_dead_letter_queue_keeps_messages_across_many_receives() {
    let queue = dlq();
    queue.send("poison").await.unwrap();

    let first = queue.receive(1).await.unwrap();
    assert_eq!(first.len(), 1);
    assert!(queue.receive(1).await.unwrap().is_empty());
    assert_eq!(queue.size().await.unwrap().total, 1);
}
