use async_trait::async_trait;
use chrono::DateTime;
use rusqlite::{params, ErrorCode, Row};
use std::path::Path;
use tracing::warn;

use super::{Preference, Rating, RatingStore};
use crate::db::Database;
use crate::error::{Result, TandemError};

const RATING_COLUMNS: &str =
    "rating_id, filename, container, nmt_blob, llm_blob, preferred, comments, created_at_ms";

/// Rating table in a SQLite database, usually the one holding the job table
pub struct SqliteRatingStore {
    db: Database,
}

impl SqliteRatingStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_database(Database::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_database(Database::open_in_memory()?)
    }

    /// Use an already open database, creating the rating table if needed.
    pub fn with_database(db: Database) -> Result<Self> {
        db.call_sync(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS ratings (
                  rating_id TEXT PRIMARY KEY,
                  filename TEXT NOT NULL,
                  container TEXT NOT NULL,
                  nmt_blob TEXT NOT NULL,
                  llm_blob TEXT NOT NULL,
                  preferred TEXT NOT NULL,
                  comments TEXT,
                  created_at_ms INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_ratings_preferred ON ratings(preferred);
                "#,
            )?;
            Ok(())
        })?;
        Ok(Self { db })
    }
}

#[async_trait]
impl RatingStore for SqliteRatingStore {
    async fn insert(&self, rating: &Rating) -> Result<()> {
        let rating = rating.clone();
        self.db
            .call(move |conn| {
                let result = conn.execute(
                    &format!(
                        "INSERT INTO ratings ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        RATING_COLUMNS
                    ),
                    params![
                        rating.rating_id,
                        rating.filename,
                        rating.container,
                        rating.nmt_blob,
                        rating.llm_blob,
                        rating.preferred.as_str(),
                        rating.comments,
                        rating.created_at.timestamp_millis(),
                    ],
                );
                match result {
                    Ok(_) => Ok(()),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == ErrorCode::ConstraintViolation =>
                    {
                        Err(TandemError::AlreadyExists(format!("rating '{}'", rating.rating_id)))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    async fn list(&self) -> Result<Vec<Rating>> {
        self.db
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM ratings ORDER BY created_at_ms, rowid",
                    RATING_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], row_to_rating)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows.into_iter().flatten().collect())
            })
            .await
    }

    async fn counts(&self) -> Result<(u64, u64)> {
        self.db
            .call(|conn| {
                let (nmt, llm): (i64, i64) = conn.query_row(
                    "SELECT COALESCE(SUM(preferred = 'nmt'), 0), COALESCE(SUM(preferred = 'llm'), 0) \
                     FROM ratings",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                Ok((nmt.max(0) as u64, llm.max(0) as u64))
            })
            .await
    }
}

/// Rows with an unknown preference are skipped with a warning.
fn row_to_rating(row: &Row<'_>) -> rusqlite::Result<Option<Rating>> {
    let rating_id: String = row.get(0)?;
    let preferred: String = row.get(5)?;
    let Ok(preferred) = preferred.parse::<Preference>() else {
        warn!("Skipping rating {} with unknown preference '{}'", rating_id, preferred);
        return Ok(None);
    };
    Ok(Some(Rating {
        filename: row.get(1)?,
        container: row.get(2)?,
        nmt_blob: row.get(3)?,
        llm_blob: row.get(4)?,
        preferred,
        comments: row.get(6)?,
        created_at: DateTime::from_timestamp_millis(row.get(7)?).unwrap_or_default(),
        rating_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratings::tests::new_rating;
    use crate::ratings::RatingStats;
    use chrono::{Duration, Utc};

    fn rating(id: &str, filename: &str, preferred: Preference, offset_ms: i64) -> Rating {
        Rating::new(
            id.to_string(),
            new_rating(filename, preferred),
            Utc::now() + Duration::milliseconds(offset_ms),
        )
    }

    #[tokio::test]
    async fn test_empty_store_counts_zero() {
        let store = SqliteRatingStore::open_in_memory().unwrap();
        assert_eq!(store.counts().await.unwrap(), (0, 0));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ratings_persist_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        {
            let store = SqliteRatingStore::open(&path).unwrap();
            let mut first = rating("r1", "a.txt", Preference::Llm, 0);
            first.comments = Some("reads naturally".to_string());
            store.insert(&first).await.unwrap();
            store.insert(&rating("r2", "b.txt", Preference::Nmt, 5)).await.unwrap();
            store.insert(&rating("r3", "c.txt", Preference::Llm, 10)).await.unwrap();
        }

        let store = SqliteRatingStore::open(&path).unwrap();
        let ratings = store.list().await.unwrap();
        let ids: Vec<&str> = ratings.iter().map(|r| r.rating_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2", "r3"]);
        assert_eq!(ratings[0].comments.as_deref(), Some("reads naturally"));
        assert_eq!(ratings[0].llm_blob, "llm/a.txt");

        let (nmt, llm) = store.counts().await.unwrap();
        let stats = RatingStats::from_counts(nmt, llm);
        assert_eq!((stats.nmt_preferred, stats.llm_preferred), (1, 2));
    }

    #[tokio::test]
    async fn test_duplicate_rating_id() {
        let store = SqliteRatingStore::open_in_memory().unwrap();
        store.insert(&rating("r1", "a.txt", Preference::Nmt, 0)).await.unwrap();
        assert!(matches!(
            store.insert(&rating("r1", "a.txt", Preference::Llm, 0)).await,
            Err(TandemError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_shares_database_with_job_table() {
        let db = Database::open_in_memory().unwrap();
        let jobs = crate::jobs::SqliteJobStore::with_database(db.clone(), "translationjobs").unwrap();
        let ratings = SqliteRatingStore::with_database(db).unwrap();

        ratings.insert(&rating("r1", "a.txt", Preference::Llm, 0)).await.unwrap();
        assert_eq!(ratings.counts().await.unwrap(), (0, 1));
        assert!(crate::jobs::JobStore::list(&jobs, 10).await.unwrap().is_empty());
    }
}
