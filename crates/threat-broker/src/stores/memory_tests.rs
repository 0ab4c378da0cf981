//! Tests for the in-memory message store.

use super::*;
use chrono::Duration;

fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

fn request(max_messages: u32, max_receive_count: u32) -> LeaseRequest {
    LeaseRequest {
        max_messages,
        visibility_timeout: Duration::seconds(30),
        max_receive_count,
        dead_letter_queue: None,
    }
}

// ============================================================================
// Storage Initialization Tests
// ============================================================================

mod storage_initialization {
    use super::*;

    #[test]
    fn test_create_store() {
        let store = InMemoryStore::new();
        assert_eq!(store.kind(), StoreKind::InMemory);
    }

    #[tokio::test]
    async fn test_unknown_queue_is_empty() {
        let store = InMemoryStore::new();
        let q = queue("missing");

        assert!(store.counts(&q).await.unwrap().is_empty());
        assert!(store.lease(&q, &request(10, 3)).await.unwrap().leased.is_empty());
        assert_eq!(store.purge(&q).await.unwrap(), 0);
    }
}

// ============================================================================
// Send and Lease Tests
// ============================================================================

mod send_and_lease {
    use super::*;

    #[tokio::test]
    async fn test_insert_is_immediately_visible() {
        let store = InMemoryStore::new();
        let q = queue("events");

        store.insert(&q, "A").await.unwrap();

        assert_eq!(store.counts(&q).await.unwrap(), QueueSize::new(1, 0));
    }

    #[tokio::test]
    async fn test_lease_returns_oldest_first() {
        let store = InMemoryStore::new();
        let q = queue("events");
        for body in ["first", "second", "third"] {
            store.insert(&q, body).await.unwrap();
        }

        let outcome = store.lease(&q, &request(2, 3)).await.unwrap();
        let bodies: Vec<_> = outcome.leased.iter().map(|m| m.body.as_str()).collect();

        assert_eq!(bodies, vec!["first", "second"]);
        assert!(outcome.leased.iter().all(|m| m.receive_count == 1));
        assert_eq!(store.counts(&q).await.unwrap(), QueueSize::new(1, 2));
    }

    #[tokio::test]
    async fn test_leased_message_is_hidden() {
        let store = InMemoryStore::new();
        let q = queue("events");
        store.insert(&q, "A").await.unwrap();

        let first = store.lease(&q, &request(1, 3)).await.unwrap();
        let second = store.lease(&q, &request(1, 3)).await.unwrap();

        assert_eq!(first.leased.len(), 1);
        assert!(second.leased.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_visibility_leaves_store_usable() {
        let store = InMemoryStore::new();
        let q = queue("events");
        store.insert(&q, "A").await.unwrap();
        let unbounded = LeaseRequest {
            visibility_timeout: Duration::days(365 * 300_000),
            ..request(1, 3)
        };

        let result = store.lease(&q, &unbounded).await;

        assert!(matches!(result, Err(BrokerError::ConfigurationError(_))));
        assert_eq!(store.counts(&q).await.unwrap(), QueueSize::new(1, 0));
        let leased = store.lease(&q, &request(1, 3)).await.unwrap().leased;
        assert_eq!(leased[0].receive_count, 1);
    }

    #[tokio::test]
    async fn test_partitions_are_independent() {
        let store = InMemoryStore::new();
        store.insert(&queue("one"), "A").await.unwrap();

        assert!(store.counts(&queue("two")).await.unwrap().is_empty());
    }
}

// ============================================================================
// Delete Tests
// ============================================================================

mod delete {
    use super::*;

    #[tokio::test]
    async fn test_delete_with_current_receipt() {
        let store = InMemoryStore::new();
        let q = queue("events");
        store.insert(&q, "A").await.unwrap();
        let leased = store.lease(&q, &request(1, 3)).await.unwrap().leased;

        assert!(store.delete(&q, &leased[0].receipt_handle).await.unwrap());
        assert!(!store.delete(&q, &leased[0].receipt_handle).await.unwrap());
        assert!(store.counts(&q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_with_stale_receipt_fails() {
        let store = InMemoryStore::new();
        let q = queue("events");
        store.insert(&q, "A").await.unwrap();
        let immediate = LeaseRequest {
            visibility_timeout: Duration::zero(),
            ..request(1, 3)
        };

        let first = store.lease(&q, &immediate).await.unwrap().leased;
        let second = store.lease(&q, &request(1, 3)).await.unwrap().leased;

        assert!(!store.delete(&q, &first[0].receipt_handle).await.unwrap());
        assert!(store.delete(&q, &second[0].receipt_handle).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_with_expired_receipt_fails() {
        let store = InMemoryStore::new();
        let q = queue("events");
        let dlq = queue("events-dlq");
        store.insert(&q, "A").await.unwrap();
        let short = LeaseRequest {
            visibility_timeout: Duration::milliseconds(20),
            ..request(1, 3)
        };
        let leased = store.lease(&q, &short).await.unwrap().leased;

        tokio::time::sleep(std::time::Duration::from_millis(40)).await;

        assert!(leased[0].receipt_handle.is_expired());
        assert!(!store.delete(&q, &leased[0].receipt_handle).await.unwrap());
        assert!(!store
            .dead_letter(&q, &leased[0].receipt_handle, &dlq)
            .await
            .unwrap());
        assert_eq!(store.counts(&q).await.unwrap(), QueueSize::new(1, 0));
        assert!(store.counts(&dlq).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_requires_owning_queue() {
        let store = InMemoryStore::new();
        let q = queue("events");
        store.insert(&q, "A").await.unwrap();
        let leased = store.lease(&q, &request(1, 3)).await.unwrap().leased;

        assert!(!store
            .delete(&queue("other"), &leased[0].receipt_handle)
            .await
            .unwrap());
    }
}

// ============================================================================
// Dead Letter Tests
// ============================================================================

mod dead_letter {
    use super::*;

    #[tokio::test]
    async fn test_overflowing_message_moves_to_dead_letter_partition() {
        let store = InMemoryStore::new();
        let q = queue("events");
        let dlq = queue("events-dlq");
        store.insert(&q, "A").await.unwrap();
        let lease = LeaseRequest {
            visibility_timeout: Duration::zero(),
            dead_letter_queue: Some(dlq.clone()),
            ..request(1, 1)
        };

        let first = store.lease(&q, &lease).await.unwrap();
        assert_eq!(first.leased.len(), 1);

        let second = store.lease(&q, &lease).await.unwrap();
        assert!(second.leased.is_empty());
        assert_eq!(second.dead_lettered.len(), 1);
        assert_eq!(second.dead_lettered[0].receive_count, 2);

        assert!(store.counts(&q).await.unwrap().is_empty());
        let moved = store.lease(&dlq, &request(1, u32::MAX)).await.unwrap().leased;
        assert_eq!(moved[0].body, "A");
        assert_eq!(moved[0].receive_count, 1);
    }

    #[tokio::test]
    async fn test_overflow_without_dead_letter_queue_discards() {
        let store = InMemoryStore::new();
        let q = queue("events");
        store.insert(&q, "A").await.unwrap();
        let lease = LeaseRequest {
            visibility_timeout: Duration::zero(),
            ..request(1, 0)
        };

        let outcome = store.lease(&q, &lease).await.unwrap();

        assert!(outcome.leased.is_empty());
        assert_eq!(outcome.discarded.len(), 1);
        assert!(store.counts(&q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_dead_letter_of_leased_message() {
        let store = InMemoryStore::new();
        let q = queue("events");
        let dlq = queue("events-dlq");
        store.insert(&q, "not json").await.unwrap();
        let leased = store.lease(&q, &request(1, 3)).await.unwrap().leased;

        assert!(store
            .dead_letter(&q, &leased[0].receipt_handle, &dlq)
            .await
            .unwrap());
        assert!(!store
            .dead_letter(&q, &leased[0].receipt_handle, &dlq)
            .await
            .unwrap());

        assert!(store.counts(&q).await.unwrap().is_empty());
        assert_eq!(store.counts(&dlq).await.unwrap().total, 1);
    }
}

// ============================================================================
// Purge Tests
// ============================================================================

#[tokio::test]
async fn test_purge_removes_visible_and_in_flight() {
    let store = InMemoryStore::new();
    let q = queue("events");
    store.insert(&q, "A").await.unwrap();
    store.insert(&q, "B").await.unwrap();
    store.lease(&q, &request(1, 3)).await.unwrap();

    assert_eq!(store.purge(&q).await.unwrap(), 2);
    assert!(store.counts(&q).await.unwrap().is_empty());
}
