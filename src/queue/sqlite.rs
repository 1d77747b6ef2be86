use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{poison_queue_name, QueueMessage, WorkQueue};
use crate::db::Database;
use crate::error::{Result, TandemError};

/// Queue persisted in a SQLite file. Several named queues may share one file.
///
/// Receiving runs in an immediate transaction, so two processes polling the same queue never
/// lease the same message at the same time.
pub struct SqliteQueue {
    db: Database,
    name: String,
    poison_name: String,
    max_delivery_count: u32,
}

impl SqliteQueue {
    pub fn open<P: AsRef<Path>>(path: P, name: &str, max_delivery_count: u32) -> Result<Self> {
        Self::with_database(Database::open(path)?, name, max_delivery_count)
    }

    pub fn open_in_memory(name: &str, max_delivery_count: u32) -> Result<Self> {
        Self::with_database(Database::open_in_memory()?, name, max_delivery_count)
    }

    pub fn with_database(db: Database, name: &str, max_delivery_count: u32) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(TandemError::Config("Queue name must not be empty".to_string()));
        }
        db.call_sync(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS queue_messages (
                  id TEXT PRIMARY KEY,
                  queue TEXT NOT NULL,
                  content TEXT NOT NULL,
                  inserted_at_ms INTEGER NOT NULL,
                  visible_at_ms INTEGER NOT NULL,
                  pop_receipt TEXT,
                  dequeue_count INTEGER NOT NULL DEFAULT 0
                );

                CREATE INDEX IF NOT EXISTS idx_queue_messages_visible
                  ON queue_messages(queue, visible_at_ms);
                "#,
            )?;
            Ok(())
        })?;

        Ok(Self {
            db,
            name: name.to_string(),
            poison_name: poison_queue_name(name),
            max_delivery_count,
        })
    }

    /// Messages moved aside after too many deliveries
    pub async fn poison_length(&self) -> Result<usize> {
        let poison_name = self.poison_name.clone();
        self.db
            .call(move |conn| count_messages(conn, &poison_name))
            .await
    }
}

#[async_trait]
impl WorkQueue for SqliteQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_message(&self, content: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now_ms = Utc::now().timestamp_millis();
        let name = self.name.clone();
        let content = content.to_string();
        let message_id = id.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO queue_messages(id, queue, content, inserted_at_ms, visible_at_ms, pop_receipt, dequeue_count)
                    VALUES (?1, ?2, ?3, ?4, ?4, NULL, 0)
                    "#,
                    params![message_id, name, content, now_ms],
                )?;
                Ok(())
            })
            .await?;
        debug!("Enqueued message {} on {}", id, self.name);
        Ok(id)
    }

    async fn receive_messages(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let now_ms = Utc::now().timestamp_millis();
        let lease_ms = i64::try_from(visibility_timeout.as_millis()).unwrap_or(i64::MAX);
        let visible_at_ms = now_ms.saturating_add(lease_ms);
        let limit = i64::try_from(max).unwrap_or(i64::MAX);
        let name = self.name.clone();
        let poison_name = self.poison_name.clone();
        let max_delivery_count = self.max_delivery_count;

        self.db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let poisoned = tx.execute(
                    r#"
                    UPDATE queue_messages SET queue = ?2, visible_at_ms = ?3, pop_receipt = NULL
                    WHERE queue = ?1 AND visible_at_ms <= ?3 AND dequeue_count >= ?4
                    "#,
                    params![name, poison_name, now_ms, max_delivery_count],
                )?;
                if poisoned > 0 {
                    warn!(
                        "{} message(s) exceeded {} deliveries, moved to {}",
                        poisoned, max_delivery_count, poison_name
                    );
                }

                let candidates: Vec<(String, String, u32)> = {
                    let mut stmt = tx.prepare(
                        r#"
                        SELECT id, content, dequeue_count FROM queue_messages
                        WHERE queue = ?1 AND visible_at_ms <= ?2
                        ORDER BY inserted_at_ms ASC, rowid ASC
                        LIMIT ?3
                        "#,
                    )?;
                    let rows = stmt.query_map(params![name, now_ms, limit], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                };

                let mut received = Vec::with_capacity(candidates.len());
                for (id, content, dequeue_count) in candidates {
                    let pop_receipt = Uuid::new_v4().to_string();
                    let dequeue_count = dequeue_count + 1;
                    tx.execute(
                        r#"
                        UPDATE queue_messages
                        SET visible_at_ms = ?2, pop_receipt = ?3, dequeue_count = ?4
                        WHERE id = ?1
                        "#,
                        params![id, visible_at_ms, pop_receipt, dequeue_count],
                    )?;
                    received.push(QueueMessage {
                        id,
                        pop_receipt,
                        content,
                        dequeue_count,
                    });
                }

                tx.commit()?;
                Ok(received)
            })
            .await
    }

    async fn delete_message(&self, id: &str, pop_receipt: &str) -> Result<()> {
        let name = self.name.clone();
        let id = id.to_string();
        let pop_receipt = pop_receipt.to_string();
        self.db
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM queue_messages WHERE id = ?1 AND queue = ?2 AND pop_receipt = ?3",
                    params![id, name, pop_receipt],
                )?;
                if deleted == 0 {
                    return Err(TandemError::Queue(format!(
                        "Message {} not found or its lease has been taken over",
                        id
                    )));
                }
                Ok(())
            })
            .await
    }

    async fn approximate_length(&self) -> Result<usize> {
        let name = self.name.clone();
        self.db.call(move |conn| count_messages(conn, &name)).await
    }

    async fn clear(&self) -> Result<usize> {
        let name = self.name.clone();
        self.db
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM queue_messages WHERE queue = ?1",
                    params![name],
                )?;
                Ok(deleted)
            })
            .await
    }
}

fn count_messages(conn: &Connection, queue: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1",
        params![queue],
        |row| row.get(0),
    )?;
    Ok(usize::try_from(count).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(600);

    #[tokio::test]
    async fn test_send_receive_delete() {
        let queue = SqliteQueue::open_in_memory("work", 5).unwrap();
        let id = queue.send_message(r#"{"job_id":"j"}"#).await.unwrap();
        assert_eq!(queue.approximate_length().await.unwrap(), 1);

        let messages = queue.receive_messages(1, LEASE).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, id);
        assert_eq!(messages[0].dequeue_count, 1);

        // Leased message is invisible to other consumers
        assert!(queue.receive_messages(1, LEASE).await.unwrap().is_empty());

        queue
            .delete_message(&messages[0].id, &messages[0].pop_receipt)
            .await
            .unwrap();
        assert_eq!(queue.approximate_length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered_with_new_receipt() {
        let queue = SqliteQueue::open_in_memory("work", 5).unwrap();
        queue.send_message("payload").await.unwrap();

        let first = queue.receive_messages(1, Duration::ZERO).await.unwrap();
        let second = queue.receive_messages(1, LEASE).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].dequeue_count, 2);
        assert_ne!(first[0].pop_receipt, second[0].pop_receipt);

        // The stale receipt no longer owns the message
        assert!(queue
            .delete_message(&first[0].id, &first[0].pop_receipt)
            .await
            .is_err());
        assert_eq!(queue.approximate_length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_receive_respects_max_and_fifo() {
        let queue = SqliteQueue::open_in_memory("work", 5).unwrap();
        for i in 0..3 {
            queue.send_message(&format!("m{}", i)).await.unwrap();
        }
        let batch = queue.receive_messages(2, LEASE).await.unwrap();
        let contents: Vec<_> = batch.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1"]);
    }

    #[tokio::test]
    async fn test_exhausted_message_moves_to_poison_queue() {
        let queue = SqliteQueue::open_in_memory("work", 2).unwrap();
        queue.send_message("bad").await.unwrap();

        assert_eq!(queue.receive_messages(1, Duration::ZERO).await.unwrap().len(), 1);
        assert_eq!(queue.receive_messages(1, Duration::ZERO).await.unwrap().len(), 1);
        assert!(queue.receive_messages(1, Duration::ZERO).await.unwrap().is_empty());

        assert_eq!(queue.approximate_length().await.unwrap(), 0);
        assert_eq!(queue.poison_length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_rows_do_not_crowd_out_fresh_ones() {
        let queue = SqliteQueue::open_in_memory("work", 1).unwrap();
        queue.send_message("first").await.unwrap();
        queue.send_message("second").await.unwrap();

        let first = queue.receive_messages(1, Duration::ZERO).await.unwrap();
        assert_eq!(first[0].content, "first");

        // "first" is exhausted and moves aside in the same poll that leases "second"
        let next = queue.receive_messages(1, LEASE).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].content, "second");
        assert_eq!(queue.poison_length().await.unwrap(), 1);
        assert_eq!(queue.approximate_length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queues_in_one_file_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let a = SqliteQueue::open(&path, "a", 5).unwrap();
        let b = SqliteQueue::open(&path, "b", 5).unwrap();

        a.send_message("for a").await.unwrap();
        assert!(b.receive_messages(1, LEASE).await.unwrap().is_empty());
        assert_eq!(b.clear().await.unwrap(), 0);
        assert_eq!(a.clear().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_two_handles_never_lease_the_same_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let first = SqliteQueue::open(&path, "work", 5).unwrap();
        let second = SqliteQueue::open(&path, "work", 5).unwrap();
        first.send_message("only one").await.unwrap();

        let a = first.receive_messages(1, LEASE).await.unwrap();
        let b = second.receive_messages(1, LEASE).await.unwrap();
        assert_eq!(a.len() + b.len(), 1);
    }
}
