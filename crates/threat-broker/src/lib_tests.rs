//! Tests for the threat-broker library module.

use super::*;
use std::sync::Arc;

#[tokio::test]
async fn test_wiring_from_store_config() {
    let store = StoreConfig::InMemory.open().await.unwrap();
    let broker = Broker::new(Arc::clone(&store));

    let dlq = broker
        .dead_letter_queue(QueueName::new("threat-events-dlq".to_string()).unwrap())
        .unwrap();
    let queue = broker
        .queue(
            QueueName::new("threat-events-queue".to_string()).unwrap(),
            QueueSettings::default(),
            Some(&dlq),
        )
        .unwrap();
    let topic = broker.topic("threat-events");
    topic.subscribe(&queue);

    let report = topic.publish(r#"{"indicator":"evil.example"}"#).await;
    assert_eq!(report.delivered_count(), 1);

    let received = queue.receive(10).await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].queue.as_str(), "threat-events-queue");
    assert!(queue.delete(&received[0].receipt_handle).await.unwrap());
    assert!(queue.size().await.unwrap().is_empty());
}

#[test]
fn test_default_settings() {
    let settings = QueueSettings::default();
    assert_eq!(
        settings.visibility_timeout.num_seconds(),
        DEFAULT_VISIBILITY_TIMEOUT_SECONDS
    );
    assert_eq!(settings.max_receive_count, DEFAULT_MAX_RECEIVE_COUNT);
    assert_eq!(
        dead_letter_settings().visibility_timeout.num_seconds(),
        DEAD_LETTER_VISIBILITY_TIMEOUT_SECONDS
    );
}
