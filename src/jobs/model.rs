use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TandemError;

/// Lifecycle: `Queued -> Processing -> {Completed | Failed}`. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = TandemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(TandemError::Validation(format!("Unknown job status '{}'", other))),
        }
    }
}

/// Parameters for a new job record
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: String,
    pub total_files: u32,
    pub source_container: String,
    pub target_container: String,
    pub target_language: String,
    pub source_language: Option<String>,
}

/// Aggregate progress record for one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub total_files: u32,
    pub processed_files: u32,
    pub failed_files: u32,
    pub source_container: String,
    pub target_container: String,
    pub target_language: String,
    pub source_language: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// A relative change to a job. Counters are deltas, never absolute values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub processed: u32,
    pub failed: u32,
    pub status: Option<JobStatus>,
    pub error: Option<String>,
}

impl ProgressUpdate {
    pub fn processed(count: u32) -> Self {
        Self {
            processed: count,
            ..Self::default()
        }
    }

    pub fn failed(count: u32) -> Self {
        Self {
            failed: count,
            ..Self::default()
        }
    }

    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

impl Job {
    pub fn new(new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            job_id: new.job_id,
            status: JobStatus::Queued,
            total_files: new.total_files,
            processed_files: 0,
            failed_files: 0,
            source_container: new.source_container,
            target_container: new.target_container,
            target_language: new.target_language,
            source_language: new.source_language,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
        }
    }

    /// Files accounted for so far, successful or not.
    pub fn settled_files(&self) -> u32 {
        self.processed_files.saturating_add(self.failed_files)
    }

    /// Apply a progress delta. Returns `true` when this update moved the job into a
    /// terminal state.
    ///
    /// Counters always advance, even after completion, so redelivered work items stay
    /// visible in the totals. A requested status is ignored once the job is terminal.
    pub fn apply(&mut self, update: &ProgressUpdate, now: DateTime<Utc>) -> bool {
        let was_terminal = self.status.is_terminal();

        self.processed_files = self.processed_files.saturating_add(update.processed);
        self.failed_files = self.failed_files.saturating_add(update.failed);
        self.updated_at = now;

        if was_terminal {
            return false;
        }

        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }

        match update.status {
            Some(status) => self.status = status,
            None if self.status == JobStatus::Queued
                && (update.processed > 0 || update.failed > 0) =>
            {
                self.status = JobStatus::Processing;
            }
            None => {}
        }

        if !self.status.is_terminal()
            && self.total_files > 0
            && self.settled_files() >= self.total_files
        {
            self.status = JobStatus::Completed;
        }

        if self.status.is_terminal() {
            self.completed_at = Some(now);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(total: u32) -> Job {
        Job::new(
            NewJob {
                job_id: "job-1".to_string(),
                total_files: total,
                source_container: "src".to_string(),
                target_container: "dst".to_string(),
                target_language: "es".to_string(),
                source_language: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_new_job_is_queued_with_zero_counters() {
        let job = job(3);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.settled_files(), 0);
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_first_update_moves_to_processing() {
        let mut job = job(3);
        assert!(!job.apply(&ProgressUpdate::processed(1), Utc::now()));
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.processed_files, 1);
    }

    #[test]
    fn test_completes_when_all_files_settled() {
        let mut job = job(3);
        job.apply(&ProgressUpdate::failed(1), Utc::now());
        job.apply(&ProgressUpdate::processed(1), Utc::now());
        assert!(job.apply(&ProgressUpdate::processed(1), Utc::now()));
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
        assert_eq!(job.processed_files, 2);
        assert_eq!(job.failed_files, 1);
    }

    #[test]
    fn test_completion_is_order_independent() {
        let updates = [
            ProgressUpdate::processed(1),
            ProgressUpdate::failed(1),
            ProgressUpdate::processed(1),
            ProgressUpdate::failed(1),
        ];
        let orders: [[usize; 4]; 3] = [[0, 1, 2, 3], [3, 2, 1, 0], [1, 3, 0, 2]];

        for order in orders {
            let mut job = job(4);
            let transitions: Vec<bool> = order
                .iter()
                .map(|&i| job.apply(&updates[i], Utc::now()))
                .collect();
            assert_eq!(transitions, vec![false, false, false, true]);
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!((job.processed_files, job.failed_files), (2, 2));
        }
    }

    #[test]
    fn test_zero_total_never_auto_completes() {
        let mut job = job(0);
        job.apply(&ProgressUpdate::status(JobStatus::Processing), Utc::now());
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn test_explicit_failure_is_terminal() {
        let mut job = job(2);
        assert!(job.apply(
            &ProgressUpdate::status(JobStatus::Failed).with_error("queue unavailable"),
            Utc::now()
        ));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("queue unavailable"));

        // Later progress cannot flip a failed job to completed
        job.apply(&ProgressUpdate::processed(2), Utc::now());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.processed_files, 2);
    }

    #[test]
    fn test_terminal_status_is_not_reversible() {
        let mut job = job(1);
        job.apply(&ProgressUpdate::processed(1), Utc::now());
        let completed_at = job.completed_at;

        assert!(!job.apply(&ProgressUpdate::status(JobStatus::Processing), Utc::now()));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed_at, completed_at);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("Completed".parse::<JobStatus>().unwrap(), JobStatus::Completed);
        assert!("unknown".parse::<JobStatus>().is_err());
        assert_eq!(JobStatus::Queued.to_string(), "queued");
    }
}
