use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

use super::{QueueMessage, WorkQueue};
use crate::error::{Result, TandemError};

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    content: String,
    visible_at: Instant,
    pop_receipt: Option<String>,
    dequeue_count: u32,
}

#[derive(Default)]
struct QueueState {
    messages: Vec<StoredMessage>,
    poisoned: Vec<StoredMessage>,
}

/// Single-process queue with the same lease semantics as `SqliteQueue`
pub struct MemoryQueue {
    name: String,
    max_delivery_count: u32,
    state: Mutex<QueueState>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new("memory", 5)
    }
}

impl MemoryQueue {
    pub fn new(name: &str, max_delivery_count: u32) -> Self {
        Self {
            name: name.to_string(),
            max_delivery_count,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Contents of every message still in the queue, in enqueue order.
    pub fn contents(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.messages.iter().map(|m| m.content.clone()).collect()
    }

    pub fn poisoned(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.poisoned.iter().map(|m| m.content.clone()).collect()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_message(&self, content: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.messages.push(StoredMessage {
            id: id.clone(),
            content: content.to_string(),
            visible_at: Instant::now(),
            pop_receipt: None,
            dequeue_count: 0,
        });
        Ok(id)
    }

    async fn receive_messages(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let (exhausted, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut state.messages).into_iter().partition(|m| {
                m.visible_at <= now && m.dequeue_count >= self.max_delivery_count
            });
        for message in &exhausted {
            warn!("Message {} exceeded {} deliveries", message.id, self.max_delivery_count);
        }
        state.messages = kept;
        state.poisoned.extend(exhausted);

        let mut received = Vec::new();
        for message in state.messages.iter_mut() {
            if received.len() >= max {
                break;
            }
            if message.visible_at > now {
                continue;
            }
            let pop_receipt = Uuid::new_v4().to_string();
            message.visible_at = now + visibility_timeout;
            message.pop_receipt = Some(pop_receipt.clone());
            message.dequeue_count += 1;
            received.push(QueueMessage {
                id: message.id.clone(),
                pop_receipt,
                content: message.content.clone(),
                dequeue_count: message.dequeue_count,
            });
        }
        Ok(received)
    }

    async fn delete_message(&self, id: &str, pop_receipt: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let position = state
            .messages
            .iter()
            .position(|m| m.id == id && m.pop_receipt.as_deref() == Some(pop_receipt))
            .ok_or_else(|| {
                TandemError::Queue(format!(
                    "Message {} not found or its lease has been taken over",
                    id
                ))
            })?;
        state.messages.remove(position);
        Ok(())
    }

    async fn approximate_length(&self) -> Result<usize> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.messages.len())
    }

    async fn clear(&self) -> Result<usize> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let removed = state.messages.len();
        state.messages.clear();
        Ok(removed)
    }
}
