// Shared job progress tracking
//
// A job record is written by the process that accepts a batch and by every worker that
// settles one of its files. All writes go through `JobStore::apply_progress`, which applies
// deltas with read-modify-write semantics so concurrent workers never lose an increment.
// - SQLite: durable, shared by all processes on the host
// - Memory: single process only

pub mod memory;
pub mod model;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::Result;

pub use memory::MemoryJobStore;
pub use model::{Job, JobStatus, NewJob, ProgressUpdate};
pub use sqlite::SqliteJobStore;

/// Keyed storage for job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Atomically apply a delta to one job. Returns `None` if the job does not exist.
    async fn apply_progress(&self, job_id: &str, update: &ProgressUpdate)
        -> Result<Option<Applied>>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>>;

    /// All jobs, newest first, at most `limit`.
    async fn list(&self, limit: usize) -> Result<Vec<Job>>;

    async fn delete(&self, job_id: &str) -> Result<bool>;

    /// Remove terminal jobs that finished before `cutoff`.
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Result of applying one progress update
#[derive(Debug, Clone)]
pub struct Applied {
    pub job: Job,
    /// This update moved the job into a terminal state
    pub finished_now: bool,
}

/// Job lifecycle operations on top of a `JobStore`.
#[derive(Clone)]
pub struct JobTracker {
    store: Arc<dyn JobStore>,
}

impl JobTracker {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Tracker over a process-local store. Workers in other processes will not see it.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryJobStore::new()))
    }

    pub async fn create(&self, new: NewJob) -> Result<Job> {
        let job = Job::new(new, Utc::now());
        if let Err(e) = self.store.insert(&job).await {
            warn!("Failed to create job {}: {}", job.job_id, e);
            return Err(e);
        }
        info!("Created job {} ({} files)", job.job_id, job.total_files);
        Ok(job)
    }

    /// Apply a progress delta. Never fails: a missing job or a storage error is logged and
    /// `None` is returned, so a worker can keep processing other messages.
    pub async fn update_progress(&self, job_id: &str, update: ProgressUpdate) -> Option<Job> {
        match self.store.apply_progress(job_id, &update).await {
            Ok(Some(Applied { job, finished_now })) => {
                debug!(
                    "Updated job {} (+{} processed, +{} failed) -> {}",
                    job_id, update.processed, update.failed, job.status
                );
                if finished_now {
                    info!(
                        "Job {} {}: {}/{} succeeded, {} failed",
                        job_id, job.status, job.processed_files, job.total_files, job.failed_files
                    );
                }
                Some(job)
            }
            Ok(None) => {
                warn!("Job not found for update: {}", job_id);
                None
            }
            Err(e) => {
                error!("Failed to update job {}: {}", job_id, e);
                None
            }
        }
    }

    pub async fn record_processed(&self, job_id: &str) -> Option<Job> {
        self.update_progress(job_id, ProgressUpdate::processed(1)).await
    }

    pub async fn record_failed(&self, job_id: &str) -> Option<Job> {
        self.update_progress(job_id, ProgressUpdate::failed(1)).await
    }

    /// Force a terminal state: `Failed` with the error when one is given, else `Completed`.
    pub async fn mark_completed(&self, job_id: &str, error: Option<String>) -> Option<Job> {
        let update = match error {
            Some(error) => ProgressUpdate::status(JobStatus::Failed).with_error(error),
            None => ProgressUpdate::status(JobStatus::Completed),
        };
        self.update_progress(job_id, update).await
    }

    pub async fn get_status(&self, job_id: &str) -> Result<Option<Job>> {
        let job = self.store.get(job_id).await?;
        if job.is_none() {
            debug!("Job not found: {}", job_id);
        }
        Ok(job)
    }

    pub async fn list_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        self.store.list(limit).await
    }

    pub async fn delete(&self, job_id: &str) -> Result<bool> {
        let deleted = self.store.delete(job_id).await?;
        if deleted {
            info!("Deleted job: {}", job_id);
        } else {
            warn!("Job not found for deletion: {}", job_id);
        }
        Ok(deleted)
    }

    /// Remove finished jobs older than `age`. Returns how many were removed.
    pub async fn cleanup_older_than(&self, age: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - age;
        let deleted = self.store.delete_finished_before(cutoff).await?;
        if deleted > 0 {
            info!("Cleaned up {} old jobs", deleted);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TandemError;

    fn new_job(id: &str, total: u32) -> NewJob {
        NewJob {
            job_id: id.to_string(),
            total_files: total,
            source_container: "src".to_string(),
            target_container: "dst".to_string(),
            target_language: "fr".to_string(),
            source_language: Some("en".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let tracker = JobTracker::in_memory();
        tracker.create(new_job("job-1", 2)).await.unwrap();
        let result = tracker.create(new_job("job-1", 5)).await;
        assert!(matches!(result, Err(TandemError::AlreadyExists(_))));

        let job = tracker.get_status("job-1").await.unwrap().unwrap();
        assert_eq!(job.total_files, 2);
    }

    #[tokio::test]
    async fn test_update_unknown_job_is_silent() {
        let tracker = JobTracker::in_memory();
        assert!(tracker.record_processed("missing").await.is_none());
        assert!(tracker.get_status("missing").await.unwrap().is_none());
        assert!(tracker.list_jobs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_n_updates_complete_job() {
        let tracker = JobTracker::in_memory();
        tracker.create(new_job("job-1", 3)).await.unwrap();

        tracker.record_failed("job-1").await;
        tracker.record_processed("job-1").await;
        let job = tracker.record_processed("job-1").await.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_completed_with_error_fails_job() {
        let tracker = JobTracker::in_memory();
        tracker.create(new_job("job-1", 3)).await.unwrap();
        let job = tracker
            .mark_completed("job-1", Some("enqueue failed".to_string()))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("enqueue failed"));
    }

    #[tokio::test]
    async fn test_cleanup_keeps_active_jobs() {
        let tracker = JobTracker::in_memory();
        tracker.create(new_job("done", 1)).await.unwrap();
        tracker.create(new_job("active", 2)).await.unwrap();
        tracker.record_processed("done").await;
        tracker.record_processed("active").await;

        // Negative age puts the cutoff in the future, so every finished job qualifies
        let removed = tracker
            .cleanup_older_than(chrono::Duration::hours(-1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(tracker.get_status("done").await.unwrap().is_none());
        assert!(tracker.get_status("active").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete() {
        let tracker = JobTracker::in_memory();
        tracker.create(new_job("job-1", 1)).await.unwrap();
        assert!(tracker.delete("job-1").await.unwrap());
        assert!(!tracker.delete("job-1").await.unwrap());
    }
}
