//! Integration tests for topic fan-out and producer wiring
//!
//! These tests verify:
//! - One publish reaches every subscribed queue
//! - Re-constructing the producer does not duplicate the subscription
//! - Producer and consumer processes share queues through one database file

mod common;

use common::{queue_name, sample_event, TestDatabase};
use std::sync::Arc;
use threat_broker::Topic;
use threat_relay_core::{EventRecord, ThreatEventProducer};

#[tokio::test]
async fn test_publish_reaches_every_subscriber() {
    let db = TestDatabase::new();
    let broker = db.broker().await;
    let q1 = broker.queue(queue_name("q1"), Default::default(), None).unwrap();
    let q2 = broker.queue(queue_name("q2"), Default::default(), None).unwrap();
    let topic = broker.topic("T");
    topic.subscribe(&q1);
    topic.subscribe(&q2);

    let report = topic.publish("x").await;

    assert_eq!(report.delivered_count(), 2);
    assert_eq!(q1.size().await.unwrap().total, 1);
    assert_eq!(q2.size().await.unwrap().total, 1);
    assert_eq!(q1.receive(1).await.unwrap()[0].body, "x");
    assert_eq!(q2.receive(1).await.unwrap()[0].body, "x");
}

#[tokio::test]
async fn test_publish_without_subscribers_delivers_nothing() {
    let topic = Topic::new("empty");

    let report = topic.publish("x").await;

    assert_eq!(report.delivered_count(), 0);
    assert!(report.is_no_op());
}

#[tokio::test]
async fn test_producer_construction_is_idempotent() {
    let db = TestDatabase::new();
    let broker = db.broker().await;
    let settings = db.broker_settings();

    let first = ThreatEventProducer::new(&broker, &settings).unwrap();
    let second = ThreatEventProducer::new(&broker, &settings).unwrap();

    assert_eq!(second.topic().subscriber_count(), 1);
    assert!(Arc::ptr_eq(first.topic(), second.topic()));

    second.publish_event(sample_event("10.0.0.1")).await.unwrap();
    assert_eq!(first.queue().size().await.unwrap().total, 1);
}

/// A publisher and a consumer in different processes only share the file
#[tokio::test]
async fn test_separate_brokers_share_queue_through_database() {
    let db = TestDatabase::new();
    let settings = db.broker_settings();
    let publisher_broker = db.broker().await;
    let consumer_broker = db.broker().await;
    let publisher = ThreatEventProducer::new(&publisher_broker, &settings).unwrap();
    let consumer_side = ThreatEventProducer::new(&consumer_broker, &settings).unwrap();

    publisher
        .publish_event(sample_event("10.0.0.7").with_timestamp("2025-01-19T04:16:00Z"))
        .await
        .unwrap();

    let received = consumer_side.queue().receive(10).await.unwrap();
    assert_eq!(received.len(), 1);
    let record = EventRecord::from_body(&received[0].body).unwrap();
    assert_eq!(record.indicator_label(), "10.0.0.7");
    assert_eq!(record.timestamp, "2025-01-19T04:16:00Z");
    assert_eq!(record.source, "integration_test");
}
