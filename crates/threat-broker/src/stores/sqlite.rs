//! SQLite-backed message store shared by producer and consumer processes.
//!
//! All queues live in a single `messages` table partitioned by `queue_name`.
//! Leasing never uses check-then-update: every lease is a compare-and-set on
//! `(receive_count, visible_after)`, so when two processes select the same
//! eligible row only one UPDATE (or dead-letter DELETE) matches and the loser
//! simply skips the row.

use crate::error::BrokerError;
use crate::message::{
    DeadLetteredMessage, MessageId, QueueName, QueueSize, ReceiptHandle, ReceivedMessage,
    Timestamp,
};
use crate::store::{LeaseOutcome, LeaseRequest, MessageStore, StoreKind};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        queue_name TEXT NOT NULL,
        body TEXT NOT NULL,
        receive_count INTEGER NOT NULL DEFAULT 0,
        visible_after INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        receipt TEXT
    )
"#;

const CREATE_VISIBILITY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_messages_queue_visible ON messages (queue_name, visible_after)";

const CREATE_RECEIPT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_messages_receipt ON messages (receipt)";

const INSERT_MESSAGE: &str = r#"
    INSERT INTO messages (id, queue_name, body, receive_count, visible_after, created_at)
    VALUES (?, ?, ?, 0, ?, ?)
"#;

/// `(id, body, receive_count, created_at)` of a message eligible for lease
type CandidateRow = (String, String, i64, i64);

/// How long a connection waits on another process's write lock
const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Durable message store backed by a SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    location: String,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`
    ///
    /// The database runs in WAL mode so readers in other processes are not
    /// blocked by a writer.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, BrokerError> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            location: path.display().to_string(),
        };
        store.migrate().await?;

        info!(location = %store.location, "Opened SQLite message store");
        Ok(store)
    }

    /// Open a private in-memory database
    ///
    /// Uses a single long-lived connection, since every new in-memory
    /// connection would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self, BrokerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            location: ":memory:".to_string(),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Database location, for diagnostics
    pub fn location(&self) -> &str {
        &self.location
    }

    async fn migrate(&self) -> Result<(), BrokerError> {
        for statement in [CREATE_TABLE, CREATE_VISIBILITY_INDEX, CREATE_RECEIPT_INDEX] {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Lease or dead-letter one candidate row, recording the result in `outcome`
    ///
    /// A row another receiver claimed first is skipped without error.
    async fn lease_row(
        &self,
        queue: &QueueName,
        request: &LeaseRequest,
        now: Timestamp,
        visible_after: Timestamp,
        (id, body, stored_count, created_at): CandidateRow,
        outcome: &mut LeaseOutcome,
    ) -> Result<(), BrokerError> {
        let message_id = MessageId::from_str(&id)?;
        let receive_count = receive_count_from_column(stored_count).saturating_add(1);

        if receive_count > request.max_receive_count {
            let mut tx = self.pool.begin().await?;

            let removed = sqlx::query(
                r#"
                DELETE FROM messages
                WHERE id = ? AND queue_name = ? AND receive_count = ? AND visible_after <= ?
                "#,
            )
            .bind(id.as_str())
            .bind(queue.as_str())
            .bind(stored_count)
            .bind(now.as_millis())
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if removed == 0 {
                // Another receiver got to this row first
                tx.rollback().await?;
                return Ok(());
            }

            match &request.dead_letter_queue {
                Some(dead_letter_queue) => {
                    let dead_letter_id = MessageId::new();
                    sqlx::query(INSERT_MESSAGE)
                        .bind(dead_letter_id.as_str())
                        .bind(dead_letter_queue.as_str())
                        .bind(body.as_str())
                        .bind(now.as_millis())
                        .bind(now.as_millis())
                        .execute(&mut *tx)
                        .await?;
                    tx.commit().await?;

                    outcome.dead_lettered.push(DeadLetteredMessage {
                        source_id: message_id,
                        dead_letter_id,
                        receive_count,
                    });
                }
                None => {
                    tx.commit().await?;
                    outcome.discarded.push(message_id);
                }
            }
            return Ok(());
        }

        let created_at = timestamp_from_column(created_at, "created_at")?;
        let receipt_handle = ReceiptHandle::generate(visible_after);

        let updated = sqlx::query(
            r#"
            UPDATE messages
            SET receive_count = ?, visible_after = ?, receipt = ?
            WHERE id = ? AND queue_name = ? AND receive_count = ? AND visible_after <= ?
            "#,
        )
        .bind(i64::from(receive_count))
        .bind(visible_after.as_millis())
        .bind(receipt_handle.handle())
        .bind(id.as_str())
        .bind(queue.as_str())
        .bind(stored_count)
        .bind(now.as_millis())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            debug!(queue = %queue, message_id = %id, "Lost lease race, skipping message");
            return Ok(());
        }

        outcome.leased.push(ReceivedMessage {
            message_id,
            queue: queue.clone(),
            body,
            receipt_handle,
            receive_count,
            created_at,
            visible_after,
        });
        Ok(())
    }
}

fn timestamp_from_column(millis: i64, column: &str) -> Result<Timestamp, BrokerError> {
    Timestamp::from_millis(millis).ok_or_else(|| BrokerError::Storage {
        message: format!("{} value {} is out of range", column, millis),
    })
}

fn receive_count_from_column(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert(&self, queue: &QueueName, body: &str) -> Result<MessageId, BrokerError> {
        let message_id = MessageId::new();
        let now = Timestamp::now();

        sqlx::query(INSERT_MESSAGE)
            .bind(message_id.as_str())
            .bind(queue.as_str())
            .bind(body)
            .bind(now.as_millis())
            .bind(now.as_millis())
            .execute(&self.pool)
            .await?;

        Ok(message_id)
    }

    async fn lease(
        &self,
        queue: &QueueName,
        request: &LeaseRequest,
    ) -> Result<LeaseOutcome, BrokerError> {
        let now = Timestamp::now();
        let visible_after = request.lease_expiry(now)?;
        let mut outcome = LeaseOutcome::default();

        let candidates: Vec<CandidateRow> = sqlx::query_as(
            r#"
            SELECT id, body, receive_count, created_at
            FROM messages
            WHERE queue_name = ? AND visible_after <= ?
            ORDER BY created_at, rowid
            LIMIT ?
            "#,
        )
        .bind(queue.as_str())
        .bind(now.as_millis())
        .bind(i64::from(request.max_messages))
        .fetch_all(&self.pool)
        .await?;

        for row in candidates {
            if let Err(error) = self
                .lease_row(queue, request, now, visible_after, row, &mut outcome)
                .await
            {
                if outcome.is_empty() {
                    return Err(error);
                }

                // Rows already leased or moved are committed; their receipts
                // must reach the caller.
                warn!(
                    queue = %queue,
                    leased = outcome.leased.len(),
                    dead_lettered = outcome.dead_lettered.len(),
                    error = %error,
                    "Lease stopped early, returning messages leased so far"
                );
                break;
            }
        }

        Ok(outcome)
    }

    async fn delete(&self, queue: &QueueName, receipt: &ReceiptHandle) -> Result<bool, BrokerError> {
        let removed = sqlx::query(
            "DELETE FROM messages WHERE queue_name = ? AND receipt = ? AND visible_after > ?",
        )
        .bind(queue.as_str())
        .bind(receipt.handle())
        .bind(Timestamp::now().as_millis())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(removed > 0)
    }

    async fn dead_letter(
        &self,
        queue: &QueueName,
        receipt: &ReceiptHandle,
        dead_letter_queue: &QueueName,
    ) -> Result<bool, BrokerError> {
        let now = Timestamp::now();
        let mut tx = self.pool.begin().await?;

        let removed: Option<(String,)> = sqlx::query_as(
            r#"
            DELETE FROM messages
            WHERE queue_name = ? AND receipt = ? AND visible_after > ?
            RETURNING body
            "#,
        )
        .bind(queue.as_str())
        .bind(receipt.handle())
        .bind(now.as_millis())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((body,)) = removed else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query(INSERT_MESSAGE)
            .bind(MessageId::new().as_str())
            .bind(dead_letter_queue.as_str())
            .bind(body.as_str())
            .bind(now.as_millis())
            .bind(now.as_millis())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn counts(&self, queue: &QueueName) -> Result<QueueSize, BrokerError> {
        let (visible, total): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(CASE WHEN visible_after <= ? THEN 1 ELSE 0 END), 0), COUNT(*)
            FROM messages
            WHERE queue_name = ?
            "#,
        )
        .bind(Timestamp::now().as_millis())
        .bind(queue.as_str())
        .fetch_one(&self.pool)
        .await?;

        let visible = u64::try_from(visible).unwrap_or(0);
        let total = u64::try_from(total).unwrap_or(0);
        Ok(QueueSize::new(visible, total.saturating_sub(visible)))
    }

    async fn purge(&self, queue: &QueueName) -> Result<u64, BrokerError> {
        let removed = sqlx::query("DELETE FROM messages WHERE queue_name = ?")
            .bind(queue.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(removed)
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Sqlite
    }
}
