//! Tests for the broker registry.

use super::*;
use crate::stores::InMemoryStore;
use chrono::Duration;

fn broker() -> Broker {
    Broker::new(Arc::new(InMemoryStore::new()))
}

fn name(value: &str) -> QueueName {
    QueueName::new(value.to_string()).unwrap()
}

// ============================================================================
// Queue Declaration Tests
// ============================================================================

mod queues {
    use super::*;

    #[test]
    fn test_redeclaring_queue_returns_same_handle() {
        let broker = broker();
        let dlq = broker.dead_letter_queue(name("events-dlq")).unwrap();

        let first = broker
            .queue(name("events"), QueueSettings::default(), Some(&dlq))
            .unwrap();
        let second = broker
            .queue(name("events"), QueueSettings::default(), Some(&dlq))
            .unwrap();

        assert!(first.same_queue(&second));
        assert!(first.dead_letter_queue().unwrap().same_queue(&dlq));
    }

    #[test]
    fn test_redeclaring_with_different_settings_conflicts() {
        let broker = broker();
        broker
            .queue(name("events"), QueueSettings::default(), None)
            .unwrap();

        let result = broker.queue(
            name("events"),
            QueueSettings::new(Duration::seconds(5), 3),
            None,
        );

        assert!(matches!(
            result,
            Err(BrokerError::ConfigurationError(
                ConfigurationError::ConflictingDeclaration { .. }
            ))
        ));
    }

    #[test]
    fn test_redeclaring_with_different_dead_letter_queue_conflicts() {
        let broker = broker();
        let dlq = broker.dead_letter_queue(name("events-dlq")).unwrap();
        broker
            .queue(name("events"), QueueSettings::default(), Some(&dlq))
            .unwrap();

        let result = broker.queue(name("events"), QueueSettings::default(), None);

        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_queue_is_not_registered() {
        let broker = broker();

        let result = broker.queue(name("events"), QueueSettings::new(Duration::zero(), 3), None);

        assert!(result.is_err());
        assert!(broker.find_queue(&name("events")).is_none());
    }

    #[test]
    fn test_queue_and_dead_letter_queue_names_do_not_mix() {
        let broker = broker();
        broker.dead_letter_queue(name("events-dlq")).unwrap();
        broker
            .queue(name("events"), QueueSettings::default(), None)
            .unwrap();

        assert!(broker
            .queue(name("events-dlq"), QueueSettings::default(), None)
            .is_err());
        assert!(broker.dead_letter_queue(name("events")).is_err());
    }

    #[test]
    fn test_redeclaring_dead_letter_queue_returns_same_handle() {
        let broker = broker();

        let first = broker.dead_letter_queue(name("events-dlq")).unwrap();
        let second = broker.dead_letter_queue(name("events-dlq")).unwrap();

        assert!(first.same_queue(&second));
        assert!(first.is_dead_letter());
    }
}

// ============================================================================
// Topic Declaration Tests
// ============================================================================

#[test]
fn test_redeclaring_topic_returns_same_topic() {
    let broker = broker();
    let queue = broker
        .queue(name("events"), QueueSettings::default(), None)
        .unwrap();

    broker.topic("threat-events").subscribe(&queue);
    broker.topic("threat-events").subscribe(&queue);

    assert!(Arc::ptr_eq(
        &broker.topic("threat-events"),
        &broker.topic("threat-events")
    ));
    assert_eq!(broker.topic("threat-events").subscriber_count(), 1);
}
