//! Error types for broker operations.

use thiserror::Error;

/// Error type for all queue, topic and store operations
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Storage is busy or locked: {message}")]
    StoreBusy { message: String },

    #[error("Storage failure: {message}")]
    Storage { message: String },

    #[error("Store lock poisoned for queue {queue_name}")]
    LockPoisoned { queue_name: String },

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl BrokerError {
    /// Check if error is transient and the operation may succeed when retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::StoreBusy { .. } => true,
            Self::Storage { .. } => false,
            Self::LockPoisoned { .. } => false,
            Self::Database(_) => false,
            Self::ConfigurationError(_) => false,
            Self::ValidationError(_) => false,
        }
    }
}

impl From<sqlx::Error> for BrokerError {
    fn from(error: sqlx::Error) -> Self {
        // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended
        // codes, clear once the competing writer commits.
        if let sqlx::Error::Database(ref db_error) = error {
            let primary_code = db_error
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            if matches!(primary_code, Some(5) | Some(6)) {
                return Self::StoreBusy {
                    message: db_error.message().to_string(),
                };
            }
        }

        match error {
            sqlx::Error::PoolTimedOut => Self::StoreBusy {
                message: "timed out waiting for a store connection".to_string(),
            },
            other => Self::Database(other),
        }
    }
}

/// Structural configuration errors, raised when queues or topics are built
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Queue '{queue_name}' cannot be its own dead letter queue")]
    SelfDeadLetter { queue_name: String },

    #[error("Dead letter queue '{dead_letter_queue}' has its own dead letter queue and cannot be used as a terminal sink")]
    DeadLetterChain { dead_letter_queue: String },

    #[error("Dead letter queue '{dead_letter_queue}' is backed by a different store than '{queue_name}'")]
    StoreMismatch {
        queue_name: String,
        dead_letter_queue: String,
    },

    #[error("Queue '{queue_name}' has no dead letter queue")]
    MissingDeadLetterQueue { queue_name: String },

    #[error("'{name}' is already declared with different settings")]
    ConflictingDeclaration { name: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
