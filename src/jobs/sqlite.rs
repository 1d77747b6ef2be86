use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, warn};

use super::{Applied, Job, JobStatus, JobStore, ProgressUpdate};
use crate::db::Database;
use crate::error::{Result, TandemError};

const MAX_UPDATE_ATTEMPTS: usize = 16;

const JOB_COLUMNS: &str = "job_id, revision, status, total_files, processed_files, failed_files, \
     source_container, target_container, target_language, source_language, \
     created_at_ms, updated_at_ms, completed_at_ms, error";

/// Job store in a SQLite database file. Any number of processes may open the same file.
///
/// Progress updates are compare-and-update on a `revision` column: read the row, apply the
/// delta in memory, write back only if the revision is unchanged, otherwise re-read and retry.
pub struct SqliteJobStore {
    db: Database,
    table: String,
}

impl SqliteJobStore {
    pub fn open<P: AsRef<Path>>(path: P, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        Self::with_database(Database::open(path)?, table)
    }

    pub fn open_in_memory(table: &str) -> Result<Self> {
        Self::with_database(Database::open_in_memory()?, table)
    }

    /// Use an already open database, creating the job table if needed.
    pub fn with_database(db: Database, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let store = Self {
            db,
            table: table.to_string(),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
              job_id TEXT PRIMARY KEY,
              revision INTEGER NOT NULL,
              status TEXT NOT NULL,
              total_files INTEGER NOT NULL,
              processed_files INTEGER NOT NULL,
              failed_files INTEGER NOT NULL,
              source_container TEXT NOT NULL,
              target_container TEXT NOT NULL,
              target_language TEXT NOT NULL,
              source_language TEXT,
              created_at_ms INTEGER NOT NULL,
              updated_at_ms INTEGER NOT NULL,
              completed_at_ms INTEGER,
              error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_{t}_created ON {t}(created_at_ms);
            "#,
            t = self.table
        );
        self.db.call_sync(|conn| Ok(conn.execute_batch(&sql)?))
    }

    fn select_job(conn: &Connection, table: &str, job_id: &str) -> Result<Option<(Job, i64)>> {
        let row = conn
            .query_row(
                &format!("SELECT {} FROM {} WHERE job_id = ?1", JOB_COLUMNS, table),
                params![job_id],
                row_to_job,
            )
            .optional()?;
        Ok(row)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let table = self.table.clone();
        let job = job.clone();
        self.db
            .call(move |conn| {
                let result = conn.execute(
                    &format!(
                        "INSERT INTO {} ({}) VALUES (?1, 0, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                        table, JOB_COLUMNS
                    ),
                    params![
                        job.job_id,
                        job.status.as_str(),
                        job.total_files,
                        job.processed_files,
                        job.failed_files,
                        job.source_container,
                        job.target_container,
                        job.target_language,
                        job.source_language,
                        job.created_at.timestamp_millis(),
                        job.updated_at.timestamp_millis(),
                        job.completed_at.map(|at| at.timestamp_millis()),
                        job.error,
                    ],
                );

                match result {
                    Ok(_) => Ok(()),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == ErrorCode::ConstraintViolation =>
                    {
                        Err(TandemError::AlreadyExists(format!("job '{}'", job.job_id)))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    async fn apply_progress(
        &self,
        job_id: &str,
        update: &ProgressUpdate,
    ) -> Result<Option<Applied>> {
        let table = self.table.clone();
        let job_id = job_id.to_string();
        let update = update.clone();
        self.db
            .call(move |conn| {
                for attempt in 1..=MAX_UPDATE_ATTEMPTS {
                    let Some((mut job, revision)) = Self::select_job(conn, &table, &job_id)? else {
                        return Ok(None);
                    };

                    let finished_now = job.apply(&update, Utc::now());

                    let changed = conn.execute(
                        &format!(
                            r#"
                            UPDATE {}
                            SET revision = ?3, status = ?4, processed_files = ?5, failed_files = ?6,
                                updated_at_ms = ?7, completed_at_ms = ?8, error = ?9
                            WHERE job_id = ?1 AND revision = ?2
                            "#,
                            table
                        ),
                        params![
                            job_id,
                            revision,
                            revision + 1,
                            job.status.as_str(),
                            job.processed_files,
                            job.failed_files,
                            job.updated_at.timestamp_millis(),
                            job.completed_at.map(|at| at.timestamp_millis()),
                            job.error,
                        ],
                    )?;

                    if changed == 1 {
                        return Ok(Some(Applied { job, finished_now }));
                    }
                    debug!("Revision conflict on job {} (attempt {})", job_id, attempt);
                }

                Err(TandemError::Storage(format!(
                    "Job {} kept changing; gave up after {} attempts",
                    job_id, MAX_UPDATE_ATTEMPTS
                )))
            })
            .await
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let table = self.table.clone();
        let job_id = job_id.to_string();
        self.db
            .call(move |conn| Ok(Self::select_job(conn, &table, &job_id)?.map(|(job, _)| job)))
            .await
    }

    async fn list(&self, limit: usize) -> Result<Vec<Job>> {
        let table = self.table.clone();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM {} ORDER BY created_at_ms DESC, rowid DESC LIMIT ?1",
                    JOB_COLUMNS, table
                ))?;
                let jobs = stmt
                    .query_map(params![limit], row_to_job)?
                    .map(|row| row.map(|(job, _)| job))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(jobs)
            })
            .await
    }

    async fn delete(&self, job_id: &str) -> Result<bool> {
        let table = self.table.clone();
        let job_id = job_id.to_string();
        self.db
            .call(move |conn| {
                let deleted = conn.execute(
                    &format!("DELETE FROM {} WHERE job_id = ?1", table),
                    params![job_id],
                )?;
                Ok(deleted > 0)
            })
            .await
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let table = self.table.clone();
        self.db
            .call(move |conn| {
                let deleted = conn.execute(
                    &format!(
                        "DELETE FROM {} WHERE status IN ('completed', 'failed') \
                         AND completed_at_ms IS NOT NULL AND completed_at_ms < ?1",
                        table
                    ),
                    params![cutoff.timestamp_millis()],
                )?;
                Ok(deleted)
            })
            .await
    }
}

fn validate_table_name(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());
    if !valid {
        return Err(TandemError::Config(format!("Invalid job table name: {:?}", table)));
    }
    Ok(())
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<(Job, i64)> {
    let job_id: String = row.get(0)?;
    let status: String = row.get(2)?;
    let status = parse_status(&status, &job_id);
    let job = Job {
        status,
        total_files: row.get(3)?,
        processed_files: row.get(4)?,
        failed_files: row.get(5)?,
        source_container: row.get(6)?,
        target_container: row.get(7)?,
        target_language: row.get(8)?,
        source_language: row.get(9)?,
        created_at: from_millis(row.get(10)?),
        updated_at: from_millis(row.get(11)?),
        completed_at: row.get::<_, Option<i64>>(12)?.map(from_millis),
        error: row.get(13)?,
        job_id,
    };
    Ok((job, row.get(1)?))
}

fn parse_status(s: &str, job_id: &str) -> JobStatus {
    s.parse().unwrap_or_else(|_| {
        warn!(
            "Unknown job status '{}' for job {}, defaulting to processing",
            s, job_id
        );
        JobStatus::Processing
    })
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::NewJob;
    use std::sync::Arc;

    fn job(id: &str, total: u32) -> Job {
        Job::new(
            NewJob {
                job_id: id.to_string(),
                total_files: total,
                source_container: "src".to_string(),
                target_container: "dst".to_string(),
                target_language: "ja".to_string(),
                source_language: Some("en".to_string()),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_insert_get_and_duplicate() {
        let store = SqliteJobStore::open_in_memory("jobs").unwrap();
        store.insert(&job("a", 2)).await.unwrap();

        let loaded = store.get("a").await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Queued);
        assert_eq!(loaded.source_language.as_deref(), Some("en"));

        assert!(matches!(
            store.insert(&job("a", 2)).await,
            Err(TandemError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_progress_completes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        {
            let store = SqliteJobStore::open(&path, "jobs").unwrap();
            store.insert(&job("a", 2)).await.unwrap();
            store.apply_progress("a", &ProgressUpdate::processed(1)).await.unwrap();
            let applied = store
                .apply_progress("a", &ProgressUpdate::failed(1))
                .await
                .unwrap()
                .unwrap();
            assert!(applied.finished_now);
        }

        let reopened = SqliteJobStore::open(&path, "jobs").unwrap();
        let loaded = reopened.get("a").await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!((loaded.processed_files, loaded.failed_files), (1, 1));
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_job_update_returns_none() {
        let store = SqliteJobStore::open_in_memory("jobs").unwrap();
        let result = store
            .apply_progress("missing", &ProgressUpdate::processed(1))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(store.list(10).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_connections_do_not_lose_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let first = Arc::new(SqliteJobStore::open(&path, "jobs").unwrap());
        let second = Arc::new(SqliteJobStore::open(&path, "jobs").unwrap());
        first.insert(&job("shared", 40)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..40 {
            let store = if i % 2 == 0 {
                Arc::clone(&first)
            } else {
                Arc::clone(&second)
            };
            handles.push(tokio::spawn(async move {
                store
                    .apply_progress("shared", &ProgressUpdate::processed(1))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let loaded = first.get("shared").await.unwrap().unwrap();
        assert_eq!(loaded.processed_files, 40);
        assert_eq!(loaded.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_list_newest_first_with_limit() {
        let store = SqliteJobStore::open_in_memory("jobs").unwrap();
        let mut older = job("older", 1);
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        store.insert(&older).await.unwrap();
        store.insert(&job("newer", 1)).await.unwrap();

        let listed = store.list(10).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
        assert_eq!(store.list(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_finished_before() {
        let store = SqliteJobStore::open_in_memory("jobs").unwrap();
        store.insert(&job("done", 1)).await.unwrap();
        store.insert(&job("running", 2)).await.unwrap();
        store.apply_progress("done", &ProgressUpdate::processed(1)).await.unwrap();
        store.apply_progress("running", &ProgressUpdate::processed(1)).await.unwrap();

        let future = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(store.delete_finished_before(future).await.unwrap(), 1);
        assert!(store.get("done").await.unwrap().is_none());
        assert!(store.delete("running").await.unwrap());
    }

    #[test]
    fn test_table_name_validation() {
        assert!(SqliteJobStore::open_in_memory("translationjobs").is_ok());
        assert!(SqliteJobStore::open_in_memory("jobs; DROP TABLE x").is_err());
        assert!(SqliteJobStore::open_in_memory("1jobs").is_err());
    }
}
