// Batch dispatch strategies
//
// - Queued: one work item per file is sent to the work queue and workers do the rest
// - Inline: files are translated one after another before `start_batch_job` returns

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::pipeline::{FileOutcome, FilePipeline};
use super::work_item::WorkItem;
use super::BatchJobSummary;
use crate::error::Result;
use crate::jobs::{Job, JobStatus, JobTracker, ProgressUpdate};
use crate::queue::WorkQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Queued,
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started { total: usize },
    FileFinished { blob: String, succeeded: bool },
    Finished,
}

/// Receives progress of inline batches
pub trait BatchProgress: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

pub struct NoopProgress;

impl BatchProgress for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

#[async_trait]
pub trait DispatchStrategy: Send + Sync {
    /// Hand the work items of a freshly created job to their processors.
    async fn dispatch(
        &self,
        job: &Job,
        items: Vec<WorkItem>,
        progress: &dyn BatchProgress,
    ) -> Result<BatchJobSummary>;
}

pub struct QueuedDispatch {
    queue: Arc<dyn WorkQueue>,
    tracker: JobTracker,
}

impl QueuedDispatch {
    pub fn new(queue: Arc<dyn WorkQueue>, tracker: JobTracker) -> Self {
        Self { queue, tracker }
    }
}

#[async_trait]
impl DispatchStrategy for QueuedDispatch {
    async fn dispatch(
        &self,
        job: &Job,
        items: Vec<WorkItem>,
        _progress: &dyn BatchProgress,
    ) -> Result<BatchJobSummary> {
        let total = items.len();
        for item in &items {
            let sent = match item.to_json() {
                Ok(payload) => self.queue.send_message(&payload).await,
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                error!("Failed to enqueue {} for job {}: {}", item.source_blob, job.job_id, e);
                self.tracker
                    .mark_completed(&job.job_id, Some(format!("Failed to enqueue work: {}", e)))
                    .await;
                return Err(e);
            }
        }

        self.tracker
            .update_progress(&job.job_id, ProgressUpdate::status(JobStatus::Processing))
            .await;
        info!("Job {} queued {} work items on {}", job.job_id, total, self.queue.name());

        let mut summary = BatchJobSummary::from_job(job);
        summary.status = JobStatus::Queued;
        Ok(summary)
    }
}

pub struct InlineDispatch {
    pipeline: Arc<FilePipeline>,
    tracker: JobTracker,
}

impl InlineDispatch {
    pub fn new(pipeline: Arc<FilePipeline>, tracker: JobTracker) -> Self {
        Self { pipeline, tracker }
    }
}

#[async_trait]
impl DispatchStrategy for InlineDispatch {
    async fn dispatch(
        &self,
        job: &Job,
        items: Vec<WorkItem>,
        progress: &dyn BatchProgress,
    ) -> Result<BatchJobSummary> {
        let total = items.len();
        progress.report(ProgressEvent::Started { total });
        let (mut processed, mut failed) = (0u32, 0u32);

        // One bad file never stops the rest of the batch
        for (index, item) in items.iter().enumerate() {
            info!("Processing file {}/{}: {}", index + 1, total, item.source_blob);
            let succeeded = match self.pipeline.translate_file(item).await {
                Ok(FileOutcome::Translated { .. }) => true,
                Ok(FileOutcome::NmtOnly { .. }) => true,
                Ok(FileOutcome::Empty) => false,
                Err(e) => {
                    warn!("Failed to translate {}: {}", item.source_blob, e);
                    false
                }
            };

            let update = if succeeded {
                processed += 1;
                ProgressUpdate::processed(1)
            } else {
                failed += 1;
                ProgressUpdate::failed(1)
            };
            self.tracker.update_progress(&job.job_id, update).await;
            progress.report(ProgressEvent::FileFinished {
                blob: item.source_blob.clone(),
                succeeded,
            });
        }
        progress.report(ProgressEvent::Finished);

        let mut summary = BatchJobSummary::from_job(job);
        summary.status = JobStatus::Completed;
        summary.processed_files = processed;
        summary.failed_files = failed;
        summary.completed_at = Some(Utc::now());
        info!(
            "Batch job {} finished inline: {}/{} files processed, {} failed",
            job.job_id, summary.processed_files, summary.total_files, summary.failed_files
        );
        Ok(summary)
    }
}
