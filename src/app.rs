use std::sync::Arc;
use tracing::info;

use crate::batch::BatchService;
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::jobs::{JobTracker, SqliteJobStore};
use crate::queue::{QueueFactory, WorkQueue};
use crate::ratings::SqliteRatingStore;
use crate::storage::ObjectStoreFactory;
use crate::translate::TranslatorFactory;
use crate::worker::{Worker, WorkerSettings};

/// Services wired from one configuration. Every process opened on the same data
/// directory shares the job table and the queue.
pub struct App {
    config: Config,
    queue: Arc<dyn WorkQueue>,
    service: Arc<BatchService>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let store = ObjectStoreFactory::create(&config.storage);
        let queue = QueueFactory::open(&config)?;
        let translator = TranslatorFactory::create_translator(&config)?;
        // Job records and ratings live in one database file
        let db = Database::open(config.jobs_db_path())?;
        let jobs = SqliteJobStore::with_database(db.clone(), &config.jobs.table)?;
        let ratings = SqliteRatingStore::with_database(db)?;
        let tracker = JobTracker::new(Arc::new(jobs));

        let service = Arc::new(BatchService::new(
            store,
            Arc::clone(&queue),
            translator,
            tracker,
            Arc::new(ratings),
            &config.batch,
        ));

        info!(
            "Opened data directory {} (storage root {})",
            config.data_dir.display(),
            config.storage.root.display()
        );

        Ok(Self {
            config,
            queue,
            service,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn service(&self) -> Arc<BatchService> {
        Arc::clone(&self.service)
    }

    pub fn worker(&self) -> Worker {
        Worker::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.service),
            WorkerSettings::from_config(&self.config.queue),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchRequest;
    use crate::jobs::JobStatus;
    use crate::ratings::{NewRating, Preference};
    use assert_fs::prelude::*;

    fn config(dir: &assert_fs::TempDir) -> Config {
        let mut config = Config::default();
        config.data_dir = dir.path().join("data");
        config.storage.root = dir.path().join("blobs");
        config
    }

    #[tokio::test]
    async fn test_two_apps_share_jobs_and_queue() {
        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("blobs/incoming/a.txt").write_str("Hello").unwrap();
        dir.child("blobs/incoming/b.txt").write_str("World").unwrap();

        let api = App::new(config(&dir)).unwrap();
        let summary = api
            .service()
            .start_batch_job(BatchRequest {
                source_container: "incoming".to_string(),
                target_container: "translated".to_string(),
                target_language: "de".to_string(),
                ..BatchRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(summary.status, JobStatus::Queued);

        // A second process opening the same data directory sees the same state
        let worker_side = App::new(config(&dir)).unwrap();
        assert_eq!(worker_side.service().queue_length().await.unwrap(), 2);
        let job = worker_side
            .service()
            .get_job_status(&summary.job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.total_files, 2);
        assert_eq!(job.status, JobStatus::Processing);

        assert!(dir.child("data/jobs.db").path().exists());
        assert!(dir.child("blobs/translated").path().is_dir());
    }

    #[tokio::test]
    async fn test_ratings_survive_reopening_the_data_directory() {
        let dir = assert_fs::TempDir::new().unwrap();
        let first = App::new(config(&dir)).unwrap();
        first
            .service()
            .submit_rating(NewRating {
                filename: "a.txt".to_string(),
                container: "translated".to_string(),
                nmt_blob: "nmt/a.txt".to_string(),
                llm_blob: "llm/a.txt".to_string(),
                preferred: Preference::Nmt,
                comments: Some("closer to the source".to_string()),
            })
            .await
            .unwrap();
        drop(first);

        let reopened = App::new(config(&dir)).unwrap();
        let list = reopened.service().list_ratings().await.unwrap();
        assert_eq!(list.total, 1);
        assert_eq!(list.ratings[0].comments.as_deref(), Some("closer to the source"));
        let stats = reopened.service().rating_stats().await.unwrap();
        assert_eq!(stats.nmt_percentage, 100.0);
    }
}
