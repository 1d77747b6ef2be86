// Work queue with visibility-timeout leases
//
// Delivery is at-least-once: a received message stays hidden until its lease expires, and
// only `delete_message` with the matching pop receipt removes it. Messages received more
// than the configured maximum number of times move to `<name>-poison`.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;

pub use memory::MemoryQueue;
pub use sqlite::SqliteQueue;

/// A leased message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    /// Proof of the current lease; required to delete the message
    pub pop_receipt: String,
    pub content: String,
    /// Number of times this message has been received, including this delivery
    pub dequeue_count: u32,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Enqueue a payload. Returns the message id.
    async fn send_message(&self, content: &str) -> Result<String>;

    /// Lease up to `max` visible messages for `visibility_timeout`.
    async fn receive_messages(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>>;

    /// Remove a message. Fails if the lease identified by `pop_receipt` is no longer current.
    async fn delete_message(&self, id: &str, pop_receipt: &str) -> Result<()>;

    /// Messages in the queue, leased or not.
    async fn approximate_length(&self) -> Result<usize>;

    /// Remove every message. Returns how many were removed.
    async fn clear(&self) -> Result<usize>;
}

pub fn poison_queue_name(name: &str) -> String {
    format!("{}-poison", name)
}

pub struct QueueFactory;

impl QueueFactory {
    /// Open the durable queue shared by every process using the same data directory.
    pub fn open(config: &Config) -> Result<Arc<dyn WorkQueue>> {
        let queue = SqliteQueue::open(
            config.queue_db_path(),
            &config.queue.name,
            config.queue.max_delivery_count,
        )?;
        Ok(Arc::new(queue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_queue_name() {
        assert_eq!(poison_queue_name("translation-jobs"), "translation-jobs-poison");
    }

    #[test]
    fn test_factory_opens_queue_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();

        let queue = QueueFactory::open(&config).unwrap();
        assert_eq!(queue.name(), "translation-jobs");
        assert!(config.queue_db_path().exists());
    }
}
