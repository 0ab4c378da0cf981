//! Tests for error types.

use super::*;

#[test]
fn test_error_transience() {
    assert!(BrokerError::StoreBusy {
        message: "database is locked".to_string(),
    }
    .is_transient());

    assert!(!BrokerError::Storage {
        message: "disk full".to_string(),
    }
    .is_transient());

    assert!(!BrokerError::ConfigurationError(ConfigurationError::SelfDeadLetter {
        queue_name: "threat-events-queue".to_string(),
    })
    .is_transient());

    assert!(!BrokerError::ValidationError(ValidationError::Required {
        field: "queue_name".to_string(),
    })
    .is_transient());
}

#[test]
fn test_pool_timeout_is_transient() {
    let error = BrokerError::from(sqlx::Error::PoolTimedOut);
    assert!(matches!(error, BrokerError::StoreBusy { .. }));
    assert!(error.is_transient());
}

#[test]
fn test_other_database_errors_are_permanent() {
    let error = BrokerError::from(sqlx::Error::RowNotFound);
    assert!(matches!(error, BrokerError::Database(_)));
    assert!(!error.is_transient());
}

#[test]
fn test_configuration_error_messages_name_the_queues() {
    let error = ConfigurationError::StoreMismatch {
        queue_name: "primary".to_string(),
        dead_letter_queue: "primary-dlq".to_string(),
    };

    let text = error.to_string();
    assert!(text.contains("primary-dlq"));
    assert!(text.contains("'primary'"));
}
