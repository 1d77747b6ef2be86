// Queue worker
//
// Polls the work queue and hands each message to the batch service. A message is deleted
// only after it was handled; otherwise its lease expires and the queue redelivers it.
// Shutdown stops polling but lets the message in flight finish.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::batch::{BatchService, Delivery, WorkItem};
use crate::config::QueueConfig;
use crate::error::{Result, TandemError};
use crate::queue::{QueueMessage, WorkQueue};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub batch_size: usize,
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    /// Delivery on which failures are settled instead of retried
    pub max_delivery_count: u32,
}

impl WorkerSettings {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            visibility_timeout: config.visibility_timeout(),
            poll_interval: config.poll_interval(),
            error_backoff: config.error_backoff(),
            max_delivery_count: config.max_delivery_count,
        }
    }
}

/// What the worker did with one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Completed,
    /// Final delivery of a file whose LLM leg kept failing; NMT output kept
    AcceptedPartial,
    /// Payload could not be parsed and was deleted
    Discarded,
    /// Left in the queue for redelivery
    Retry,
    /// Failed on its last delivery; counted as failed and left for the poison queue
    GaveUp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub received: u64,
    pub completed: u64,
    pub accepted_partial: u64,
    pub discarded: u64,
    pub retried: u64,
    pub gave_up: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: MessageOutcome) {
        match outcome {
            MessageOutcome::Completed => self.completed += 1,
            MessageOutcome::AcceptedPartial => self.accepted_partial += 1,
            MessageOutcome::Discarded => self.discarded += 1,
            MessageOutcome::Retry => self.retried += 1,
            MessageOutcome::GaveUp => self.gave_up += 1,
        }
    }
}

pub struct Worker {
    queue: Arc<dyn WorkQueue>,
    service: Arc<BatchService>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(queue: Arc<dyn WorkQueue>, service: Arc<BatchService>, settings: WorkerSettings) -> Self {
        Self {
            queue,
            service,
            settings,
        }
    }

    /// Poll until `shutdown` becomes true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerStats {
        info!(
            "Worker started on queue {} (batch {}, lease {:?})",
            self.queue.name(),
            self.settings.batch_size,
            self.settings.visibility_timeout
        );
        let mut stats = WorkerStats::default();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.poll_once(&mut stats, &shutdown).await {
                Ok(0) => self.settings.poll_interval,
                Ok(_) => continue,
                Err(e) => {
                    error!("Worker poll failed: {}", e);
                    self.settings.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            "Worker stopped: {} received, {} completed, {} accepted partial, {} retried, {} gave up, {} discarded",
            stats.received,
            stats.completed,
            stats.accepted_partial,
            stats.retried,
            stats.gave_up,
            stats.discarded
        );
        stats
    }

    /// Receive one batch and handle it. Returns how many messages were received.
    pub async fn poll_once(
        &self,
        stats: &mut WorkerStats,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<usize> {
        let messages = self
            .queue
            .receive_messages(self.settings.batch_size, self.settings.visibility_timeout)
            .await?;
        let received = messages.len();
        if received == 0 {
            debug!("No messages in queue");
        }

        for message in messages {
            // Unhandled messages in this batch reappear when their lease expires
            if *shutdown.borrow() {
                info!("Shutdown requested, leaving message {} for redelivery", message.id);
                break;
            }
            stats.received += 1;
            let outcome = self.handle_message(message).await;
            stats.record(outcome);
        }
        Ok(received)
    }

    pub async fn handle_message(&self, message: QueueMessage) -> MessageOutcome {
        let item = match WorkItem::from_json(&message.content) {
            Ok(item) => item,
            Err(e) => {
                warn!("Discarding malformed message {}: {}", message.id, e);
                self.delete(&message).await;
                return MessageOutcome::Discarded;
            }
        };

        let span = info_span!(
            "work_item",
            job_id = %item.job_id,
            blob = %item.source_blob,
            delivery = message.dequeue_count
        );
        let delivery = Delivery::of(message.dequeue_count, self.settings.max_delivery_count);
        async {
            match self.service.process_queue_message(&item, delivery).await {
                Ok(()) => {
                    self.delete(&message).await;
                    MessageOutcome::Completed
                }
                Err(TandemError::PartialTranslation { .. }) if delivery == Delivery::Final => {
                    self.service.accept_partial(&item).await;
                    self.delete(&message).await;
                    MessageOutcome::AcceptedPartial
                }
                Err(e) if delivery == Delivery::Final => {
                    error!(
                        "Message {} failed on its last delivery ({}), leaving it for the poison queue: {}",
                        message.id, message.dequeue_count, e
                    );
                    MessageOutcome::GaveUp
                }
                Err(e) => {
                    warn!(
                        "Failed to process message {} (delivery {}), leaving it for retry: {}",
                        message.id, message.dequeue_count, e
                    );
                    MessageOutcome::Retry
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn delete(&self, message: &QueueMessage) {
        if let Err(e) = self
            .queue
            .delete_message(&message.id, &message.pop_receipt)
            .await
        {
            warn!("Failed to delete message {}: {}", message.id, e);
        }
    }
}
