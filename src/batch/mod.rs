// Batch translation orchestration
//
// A batch turns "translate every text file in container A into language L, write to
// container B" into one job record plus one work item per file. Each file produces two
// blobs in the target container: `nmt/<name>` and `llm/<name>`.

pub mod dispatch;
pub mod pipeline;
pub mod work_item;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::annotate::Dictionary;
use crate::config::BatchConfig;
use crate::error::{Result, TandemError};
use crate::jobs::{Job, JobStatus, JobTracker, NewJob};
use crate::queue::WorkQueue;
use crate::ratings::{NewRating, Rating, RatingList, RatingStats, RatingStore};
use crate::storage::{BlobInfo, ObjectStore};
use crate::translate::{LlmOptions, Translator};

pub use dispatch::{
    BatchProgress, DispatchMode, DispatchStrategy, InlineDispatch, NoopProgress, ProgressEvent,
    QueuedDispatch,
};
pub use pipeline::{FileOutcome, FilePipeline};
pub use work_item::{base_name, WorkItem};

pub const NMT_PREFIX: &str = "nmt/";
pub const LLM_PREFIX: &str = "llm/";

/// Position of a queue delivery relative to the redelivery limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A failure leaves the message for another attempt
    Retryable,
    /// No redelivery follows, so the outcome must be settled now
    Final,
}

impl Delivery {
    pub fn of(dequeue_count: u32, max_delivery_count: u32) -> Self {
        if dequeue_count >= max_delivery_count {
            Self::Final
        } else {
            Self::Retryable
        }
    }
}

/// Parameters of `start_batch_job`
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    pub source_container: String,
    pub target_container: String,
    pub target_language: String,
    pub source_language: Option<String>,
    /// Only source blobs whose name starts with this prefix
    pub prefix: Option<String>,
    pub dictionary: Option<Dictionary>,
}

impl BatchRequest {
    pub fn validate(&self) -> Result<()> {
        if self.source_container.trim().is_empty() || self.target_container.trim().is_empty() {
            return Err(TandemError::Validation(
                "Source and target containers must be named".to_string(),
            ));
        }
        if self.source_container == self.target_container {
            return Err(TandemError::Validation(
                "Source and target containers must be different to avoid overwriting source files"
                    .to_string(),
            ));
        }
        if self.target_language.trim().is_empty() {
            return Err(TandemError::Validation("Target language is required".to_string()));
        }
        Ok(())
    }
}

/// Descriptor returned when a batch is started
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchJobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub total_files: u32,
    pub processed_files: u32,
    pub failed_files: u32,
    pub source_container: String,
    pub target_container: String,
    pub target_language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchJobSummary {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            total_files: job.total_files,
            processed_files: job.processed_files,
            failed_files: job.failed_files,
            source_container: job.source_container.clone(),
            target_container: job.target_container.clone(),
            target_language: job.target_language.clone(),
            source_language: job.source_language.clone(),
            message: None,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslatedFile {
    pub filename: String,
    pub nmt_blob: String,
    pub llm_blob: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Output pairs found in a target container
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslatedFiles {
    pub files: Vec<TranslatedFile>,
    pub total_nmt: usize,
    pub total_llm: usize,
    pub matched: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileTranslations {
    pub filename: String,
    pub nmt_content: String,
    pub llm_content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationFile {
    pub filename: String,
    pub source_content: String,
    pub nmt_content: String,
    pub llm_content: String,
}

/// Source text side by side with both translations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationData {
    pub source_container: String,
    pub target_container: String,
    pub files: Vec<EvaluationFile>,
    pub total: usize,
}

pub struct BatchService {
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn WorkQueue>,
    tracker: JobTracker,
    ratings: Arc<dyn RatingStore>,
    pipeline: Arc<FilePipeline>,
    queued: Arc<dyn DispatchStrategy>,
    inline: Arc<dyn DispatchStrategy>,
    default_mode: DispatchMode,
}

impl BatchService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn WorkQueue>,
        translator: Arc<dyn Translator>,
        tracker: JobTracker,
        ratings: Arc<dyn RatingStore>,
        config: &BatchConfig,
    ) -> Self {
        let llm = LlmOptions {
            model: config.llm_model.clone(),
            tone: config.tone.clone(),
            gender: config.gender.clone(),
            reference_translations: config.reference_translations.clone(),
        };
        let pipeline = Arc::new(FilePipeline::new(Arc::clone(&store), translator, llm));
        let queued: Arc<dyn DispatchStrategy> =
            Arc::new(QueuedDispatch::new(Arc::clone(&queue), tracker.clone()));
        let inline: Arc<dyn DispatchStrategy> =
            Arc::new(InlineDispatch::new(Arc::clone(&pipeline), tracker.clone()));

        info!(
            "Batch translation service initialized ({} mode)",
            if config.use_queue { "queue" } else { "inline" }
        );

        Self {
            store,
            queue,
            tracker,
            ratings,
            pipeline,
            queued,
            inline,
            default_mode: if config.use_queue {
                DispatchMode::Queued
            } else {
                DispatchMode::Inline
            },
        }
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn default_mode(&self) -> DispatchMode {
        self.default_mode
    }

    /// Start a batch in the configured mode.
    pub async fn start_batch_job(&self, request: BatchRequest) -> Result<BatchJobSummary> {
        self.start_batch_job_with(request, self.default_mode, &NoopProgress)
            .await
    }

    pub async fn start_batch_job_with(
        &self,
        request: BatchRequest,
        mode: DispatchMode,
        progress: &dyn BatchProgress,
    ) -> Result<BatchJobSummary> {
        request.validate()?;

        self.store
            .ensure_container_exists(&request.target_container)
            .await?;
        let blobs = self
            .store
            .list_blobs(&request.source_container, request.prefix.as_deref())
            .await?;

        let job_id = Uuid::new_v4().to_string();
        if blobs.is_empty() {
            warn!("No text files found in {}", request.source_container);
            let now = Utc::now();
            return Ok(BatchJobSummary {
                job_id,
                status: JobStatus::Completed,
                total_files: 0,
                processed_files: 0,
                failed_files: 0,
                source_container: request.source_container,
                target_container: request.target_container,
                target_language: request.target_language,
                source_language: request.source_language,
                message: Some("No text files found in source container".to_string()),
                created_at: now,
                completed_at: Some(now),
            });
        }

        let total_files = u32::try_from(blobs.len()).map_err(|_| {
            TandemError::Validation(format!("Too many files in one batch: {}", blobs.len()))
        })?;
        let job = self
            .tracker
            .create(NewJob {
                job_id: job_id.clone(),
                total_files,
                source_container: request.source_container.clone(),
                target_container: request.target_container.clone(),
                target_language: request.target_language.clone(),
                source_language: request.source_language.clone(),
            })
            .await?;

        let items: Vec<WorkItem> = blobs
            .into_iter()
            .map(|blob| WorkItem {
                job_id: job_id.clone(),
                source_container: request.source_container.clone(),
                target_container: request.target_container.clone(),
                source_blob: blob.name,
                target_language: request.target_language.clone(),
                source_language: request.source_language.clone(),
                dictionary: request.dictionary.clone(),
            })
            .collect();

        info!("Batch job {} started: {} files", job_id, items.len());
        let strategy = match mode {
            DispatchMode::Queued => &self.queued,
            DispatchMode::Inline => &self.inline,
        };
        strategy.dispatch(&job, items, progress).await
    }

    /// Handle one work item from the queue.
    ///
    /// Success records one processed file. An empty source records one failed file and
    /// returns `Ok`. If only the LLM leg fails, `PartialTranslation` is returned and no
    /// counter moves, so a redelivery can still complete the pair. Any other error is
    /// returned; it records one failed file only on the `Final` delivery, since an earlier
    /// delivery will be retried and settle the file itself.
    pub async fn process_queue_message(&self, item: &WorkItem, delivery: Delivery) -> Result<()> {
        info!("Processing job {}: {}", item.job_id, item.source_blob);
        match self.pipeline.translate_file(item).await {
            Ok(FileOutcome::Translated { .. }) => {
                self.tracker.record_processed(&item.job_id).await;
                Ok(())
            }
            Ok(FileOutcome::Empty) => {
                self.tracker.record_failed(&item.job_id).await;
                Ok(())
            }
            Ok(FileOutcome::NmtOnly { nmt_blob, reason }) => {
                Err(TandemError::PartialTranslation { nmt_blob, reason })
            }
            Err(e) => {
                if delivery == Delivery::Final {
                    warn!(
                        "Giving up on {} in job {} after its last delivery",
                        item.source_blob, item.job_id
                    );
                    self.tracker.record_failed(&item.job_id).await;
                }
                Err(e)
            }
        }
    }

    /// Count a file whose LLM leg never succeeded as processed. Used on its last delivery.
    pub async fn accept_partial(&self, item: &WorkItem) {
        warn!(
            "Accepting NMT-only result for {} in job {}",
            item.source_blob, item.job_id
        );
        self.tracker.record_processed(&item.job_id).await;
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<Option<Job>> {
        self.tracker.get_status(job_id).await
    }

    pub async fn list_translated_files(&self, container: &str) -> Result<TranslatedFiles> {
        let nmt = self.store.list_blobs(container, Some(NMT_PREFIX)).await?;
        let llm = self.store.list_blobs(container, Some(LLM_PREFIX)).await?;

        let llm_by_name: BTreeMap<&str, &BlobInfo> = llm
            .iter()
            .filter_map(|blob| Some((blob.name.strip_prefix(LLM_PREFIX)?, blob)))
            .collect();
        let nmt_by_name: BTreeMap<&str, &BlobInfo> = nmt
            .iter()
            .filter_map(|blob| Some((blob.name.strip_prefix(NMT_PREFIX)?, blob)))
            .collect();

        let files: Vec<TranslatedFile> = nmt_by_name
            .iter()
            .filter_map(|(name, nmt_blob)| {
                let llm_blob = llm_by_name.get(name)?;
                Some(TranslatedFile {
                    filename: name.to_string(),
                    nmt_blob: nmt_blob.name.clone(),
                    llm_blob: llm_blob.name.clone(),
                    size: nmt_blob.size,
                    last_modified: nmt_blob.last_modified,
                })
            })
            .collect();

        Ok(TranslatedFiles {
            matched: files.len(),
            files,
            total_nmt: nmt.len(),
            total_llm: llm.len(),
        })
    }

    pub async fn get_file_translations(
        &self,
        container: &str,
        filename: &str,
    ) -> Result<FileTranslations> {
        let nmt_content = self
            .store
            .read_blob(container, &format!("{}{}", NMT_PREFIX, filename))
            .await?;
        let llm_content = self
            .store
            .read_blob(container, &format!("{}{}", LLM_PREFIX, filename))
            .await?;
        Ok(FileTranslations {
            filename: filename.to_string(),
            nmt_content,
            llm_content,
        })
    }

    /// Load every matched pair with its source text. Files that fail to load are skipped.
    pub async fn evaluation_data(
        &self,
        source_container: &str,
        target_container: &str,
    ) -> Result<EvaluationData> {
        let pairs = self.list_translated_files(target_container).await?;

        let mut files = Vec::new();
        for pair in pairs.files {
            let loaded = async {
                Ok::<_, TandemError>(EvaluationFile {
                    source_content: self.store.read_blob(source_container, &pair.filename).await?,
                    nmt_content: self.store.read_blob(target_container, &pair.nmt_blob).await?,
                    llm_content: self.store.read_blob(target_container, &pair.llm_blob).await?,
                    filename: pair.filename.clone(),
                })
            }
            .await;
            match loaded {
                Ok(file) => files.push(file),
                Err(e) => warn!("Failed to load {}: {}", pair.filename, e),
            }
        }

        Ok(EvaluationData {
            source_container: source_container.to_string(),
            target_container: target_container.to_string(),
            total: files.len(),
            files,
        })
    }

    pub async fn list_containers(&self) -> Result<Vec<String>> {
        self.store.list_containers().await
    }

    pub async fn list_container_files(&self, container: &str) -> Result<Vec<BlobInfo>> {
        self.store.list_blobs(container, None).await
    }

    pub async fn list_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        self.tracker.list_jobs(limit).await
    }

    pub async fn delete_job(&self, job_id: &str) -> Result<bool> {
        self.tracker.delete(job_id).await
    }

    pub async fn cleanup_jobs(&self, max_age: chrono::Duration) -> Result<usize> {
        self.tracker.cleanup_older_than(max_age).await
    }

    pub async fn queue_length(&self) -> Result<usize> {
        self.queue.approximate_length().await
    }

    /// Record which translation of a file a reviewer preferred.
    pub async fn submit_rating(&self, new: NewRating) -> Result<Rating> {
        new.validate()?;
        let rating = Rating::new(Uuid::new_v4().to_string(), new, Utc::now());
        self.ratings.insert(&rating).await?;
        info!(
            "Rating submitted: {} - {} preferred for {}",
            rating.rating_id, rating.preferred, rating.filename
        );
        Ok(rating)
    }

    pub async fn list_ratings(&self) -> Result<RatingList> {
        let ratings = self.ratings.list().await?;
        Ok(RatingList {
            total: ratings.len(),
            ratings,
        })
    }

    pub async fn rating_stats(&self) -> Result<RatingStats> {
        let (nmt, llm) = self.ratings.counts().await?;
        Ok(RatingStats::from_counts(nmt, llm))
    }
}
