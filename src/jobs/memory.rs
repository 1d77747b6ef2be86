use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{Applied, Job, JobStore, ProgressUpdate};
use crate::error::{Result, TandemError};

/// Job store for a single process. The mutex serializes updates to the same job.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(&job.job_id) {
            return Err(TandemError::AlreadyExists(format!("job '{}'", job.job_id)));
        }
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn apply_progress(
        &self,
        job_id: &str,
        update: &ProgressUpdate,
    ) -> Result<Option<Applied>> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(jobs.get_mut(job_id).map(|job| {
            let finished_now = job.apply(update, Utc::now());
            Applied {
                job: job.clone(),
                finished_now,
            }
        }))
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(jobs.get(job_id).cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }

    async fn delete(&self, job_id: &str) -> Result<bool> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(jobs.remove(job_id).is_some())
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff))
        });
        Ok(before - jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobStatus, NewJob};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(MemoryJobStore::new());
        let job = Job::new(
            NewJob {
                job_id: "job-1".to_string(),
                total_files: 50,
                source_container: "src".to_string(),
                target_container: "dst".to_string(),
                target_language: "de".to_string(),
                source_language: None,
            },
            Utc::now(),
        );
        store.insert(&job).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let update = if i % 5 == 0 {
                    ProgressUpdate::failed(1)
                } else {
                    ProgressUpdate::processed(1)
                };
                store.apply_progress("job-1", &update).await.unwrap()
            }));
        }
        let finished: usize = futures_count(handles).await;

        let job = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(job.processed_files, 40);
        assert_eq!(job.failed_files, 10);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(finished, 1);
    }

    async fn futures_count(handles: Vec<tokio::task::JoinHandle<Option<Applied>>>) -> usize {
        let mut finished = 0;
        for handle in handles {
            if handle.await.unwrap().is_some_and(|a| a.finished_now) {
                finished += 1;
            }
        }
        finished
    }
}
