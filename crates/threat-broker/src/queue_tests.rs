//! Tests for queue handles and the queue builder.

use super::*;
use crate::dlq::create_dlq;
use crate::stores::InMemoryStore;

fn name(value: &str) -> QueueName {
    QueueName::new(value.to_string()).unwrap()
}

fn memory_store() -> Arc<dyn MessageStore> {
    Arc::new(InMemoryStore::new())
}

fn short_lease_queue(store: &Arc<dyn MessageStore>, max_receive_count: u32) -> (Queue, Queue) {
    let dlq = create_dlq(name("events-dlq"), Arc::clone(store));
    let queue = Queue::builder(name("events"), Arc::clone(store))
        .visibility_timeout(Duration::milliseconds(50))
        .max_receive_count(max_receive_count)
        .dead_letter_queue(dlq.clone())
        .build()
        .unwrap();
    (queue, dlq)
}

async fn wait_for_lease_expiry() {
    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
}

// ============================================================================
// Builder Validation Tests
// ============================================================================

mod builder {
    use super::*;

    #[test]
    fn test_defaults() {
        let queue = Queue::builder(name("events"), memory_store()).build().unwrap();

        assert_eq!(queue.settings().visibility_timeout, Duration::seconds(30));
        assert_eq!(queue.settings().max_receive_count, 3);
        assert!(queue.dead_letter_queue().is_none());
        assert!(!queue.is_dead_letter());
    }

    #[test]
    fn test_rejects_non_positive_visibility_timeout() {
        let result = Queue::builder(name("events"), memory_store())
            .visibility_timeout(Duration::zero())
            .build();

        assert!(matches!(
            result,
            Err(BrokerError::ConfigurationError(ConfigurationError::Invalid { .. }))
        ));
    }

    #[test]
    fn test_rejects_visibility_timeout_above_cap() {
        let at_cap = Queue::builder(name("events"), memory_store())
            .visibility_timeout(Duration::seconds(MAX_VISIBILITY_TIMEOUT_SECONDS as i64))
            .build();
        let oversized = Queue::builder(name("events"), memory_store())
            .visibility_timeout(Duration::days(365 * 300_000))
            .build();

        assert!(at_cap.is_ok());
        assert!(matches!(
            oversized,
            Err(BrokerError::ConfigurationError(ConfigurationError::Invalid { .. }))
        ));
    }

    #[test]
    fn test_rejects_zero_max_receive_count() {
        let result = Queue::builder(name("events"), memory_store())
            .max_receive_count(0)
            .build();

        assert!(matches!(
            result,
            Err(BrokerError::ConfigurationError(ConfigurationError::Invalid { .. }))
        ));
    }

    #[test]
    fn test_rejects_self_dead_letter() {
        let store = memory_store();
        let same_name = Queue::builder(name("events"), Arc::clone(&store))
            .build()
            .unwrap();

        let result = Queue::builder(name("events"), store)
            .dead_letter_queue(same_name)
            .build();

        assert!(matches!(
            result,
            Err(BrokerError::ConfigurationError(
                ConfigurationError::SelfDeadLetter { .. }
            ))
        ));
    }

    #[test]
    fn test_rejects_dead_letter_queue_with_onward_dead_letter_queue() {
        let store = memory_store();
        let (middle, _) = short_lease_queue(&store, 3);

        let result = Queue::builder(name("ingress"), store)
            .dead_letter_queue(middle)
            .build();

        assert!(matches!(
            result,
            Err(BrokerError::ConfigurationError(
                ConfigurationError::DeadLetterChain { .. }
            ))
        ));
    }

    #[test]
    fn test_rejects_dead_letter_queue_in_other_store() {
        let dlq = create_dlq(name("events-dlq"), memory_store());

        let result = Queue::builder(name("events"), memory_store())
            .dead_letter_queue(dlq)
            .build();

        assert!(matches!(
            result,
            Err(BrokerError::ConfigurationError(
                ConfigurationError::StoreMismatch { .. }
            ))
        ));
    }

    #[test]
    fn test_clones_share_identity() {
        let store = memory_store();
        let queue = Queue::builder(name("events"), Arc::clone(&store))
            .build()
            .unwrap();
        let twin = Queue::builder(name("events"), store).build().unwrap();

        assert!(queue.same_queue(&queue.clone()));
        assert!(!queue.same_queue(&twin));
    }
}

// ============================================================================
// Queue Operation Tests
// ============================================================================

mod operations {
    use super::*;

    #[tokio::test]
    async fn test_send_makes_message_visible() {
        let queue = Queue::builder(name("events"), memory_store()).build().unwrap();

        queue.send("A").await.unwrap();

        let size = queue.size().await.unwrap();
        assert_eq!(size.visible, 1);
        assert_eq!(size.total, 1);
    }

    #[tokio::test]
    async fn test_receive_zero_returns_nothing() {
        let queue = Queue::builder(name("events"), memory_store()).build().unwrap();
        queue.send("A").await.unwrap();

        assert!(queue.receive(0).await.unwrap().is_empty());
        assert_eq!(queue.size().await.unwrap().visible, 1);
    }

    #[tokio::test]
    async fn test_received_message_is_hidden_until_lease_expires() {
        let store = memory_store();
        let (queue, _) = short_lease_queue(&store, 3);
        queue.send("A").await.unwrap();

        let first = queue.receive(1).await.unwrap();
        assert_eq!(first[0].receive_count, 1);
        assert!(queue.receive(1).await.unwrap().is_empty());
        assert_eq!(queue.size().await.unwrap().in_flight, 1);

        wait_for_lease_expiry().await;

        let second = queue.receive(1).await.unwrap();
        assert_eq!(second[0].body, "A");
        assert_eq!(second[0].receive_count, 2);
    }

    #[tokio::test]
    async fn test_delete_semantics() {
        let queue = Queue::builder(name("events"), memory_store()).build().unwrap();
        queue.send("A").await.unwrap();
        let received = queue.receive(1).await.unwrap();

        assert!(queue.delete(&received[0].receipt_handle).await.unwrap());
        assert!(!queue.delete(&received[0].receipt_handle).await.unwrap());
        assert!(queue.size().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge() {
        let queue = Queue::builder(name("events"), memory_store()).build().unwrap();
        queue.send("A").await.unwrap();
        queue.send("B").await.unwrap();

        assert_eq!(queue.purge().await.unwrap(), 2);
        assert!(queue.size().await.unwrap().is_empty());
    }
}

// ============================================================================
// Dead Letter Routing Tests
// ============================================================================

mod dead_letter_routing {
    use super::*;

    #[tokio::test]
    async fn test_message_moves_to_dead_letter_queue_after_max_receives() {
        let store = memory_store();
        let (queue, dlq) = short_lease_queue(&store, 2);
        queue.send("A").await.unwrap();

        assert_eq!(queue.receive(1).await.unwrap()[0].receive_count, 1);
        wait_for_lease_expiry().await;
        assert_eq!(queue.receive(1).await.unwrap()[0].receive_count, 2);
        wait_for_lease_expiry().await;

        assert!(queue.receive(1).await.unwrap().is_empty());
        assert!(queue.receive(1).await.unwrap().is_empty());
        assert!(queue.size().await.unwrap().is_empty());

        let dead = dlq.receive(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].body, "A");
    }

    #[tokio::test]
    async fn test_explicit_dead_letter() {
        let store = memory_store();
        let (queue, dlq) = short_lease_queue(&store, 3);
        queue.send("not json").await.unwrap();
        let received = queue.receive(1).await.unwrap();

        assert!(queue.dead_letter(&received[0].receipt_handle).await.unwrap());

        assert!(queue.size().await.unwrap().is_empty());
        assert_eq!(dlq.size().await.unwrap().visible, 1);
    }

    #[tokio::test]
    async fn test_explicit_dead_letter_without_dead_letter_queue_fails() {
        let queue = Queue::builder(name("events"), memory_store()).build().unwrap();
        queue.send("A").await.unwrap();
        let received = queue.receive(1).await.unwrap();

        let result = queue.dead_letter(&received[0].receipt_handle).await;

        assert!(matches!(
            result,
            Err(BrokerError::ConfigurationError(
                ConfigurationError::MissingDeadLetterQueue { .. }
            ))
        ));
        assert_eq!(queue.size().await.unwrap().in_flight, 1);
    }
}
