// Reviewer preferences between the two translations of a file
//
// A rating names one matched output pair and which side the reviewer preferred. Ratings
// are append-only; statistics are derived from per-preference counts.
// - SQLite: stored next to the job table in the shared data directory
// - Memory: single process only

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TandemError};

pub use memory::MemoryRatingStore;
pub use sqlite::SqliteRatingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preference {
    Nmt,
    Llm,
}

impl Preference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nmt => "nmt",
            Self::Llm => "llm",
        }
    }
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preference {
    type Err = TandemError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nmt" => Ok(Self::Nmt),
            "llm" => Ok(Self::Llm),
            other => Err(TandemError::Validation(format!(
                "Preferred translation must be 'nmt' or 'llm', got '{}'",
                other
            ))),
        }
    }
}

/// Parameters of `submit_rating`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRating {
    pub filename: String,
    pub container: String,
    pub nmt_blob: String,
    pub llm_blob: String,
    pub preferred: Preference,
    pub comments: Option<String>,
}

impl NewRating {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("filename", &self.filename),
            ("container", &self.container),
            ("nmt_blob", &self.nmt_blob),
            ("llm_blob", &self.llm_blob),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(TandemError::Validation(format!("Rating {} is required", name)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub rating_id: String,
    pub filename: String,
    pub container: String,
    pub nmt_blob: String,
    pub llm_blob: String,
    pub preferred: Preference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Rating {
    pub fn new(rating_id: String, new: NewRating, created_at: DateTime<Utc>) -> Self {
        Self {
            rating_id,
            filename: new.filename,
            container: new.container,
            nmt_blob: new.nmt_blob,
            llm_blob: new.llm_blob,
            preferred: new.preferred,
            comments: new.comments.filter(|c| !c.trim().is_empty()),
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingStats {
    pub total_ratings: u64,
    pub nmt_preferred: u64,
    pub llm_preferred: u64,
    pub nmt_percentage: f64,
    pub llm_percentage: f64,
}

impl RatingStats {
    /// Percentages are 0.0 when nothing has been rated yet.
    pub fn from_counts(nmt_preferred: u64, llm_preferred: u64) -> Self {
        let total_ratings = nmt_preferred + llm_preferred;
        let percentage = |count: u64| {
            if total_ratings == 0 {
                0.0
            } else {
                count as f64 / total_ratings as f64 * 100.0
            }
        };
        Self {
            total_ratings,
            nmt_preferred,
            llm_preferred,
            nmt_percentage: percentage(nmt_preferred),
            llm_percentage: percentage(llm_preferred),
        }
    }
}

/// All ratings with their count
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingList {
    pub ratings: Vec<Rating>,
    pub total: usize,
}

#[async_trait]
pub trait RatingStore: Send + Sync {
    async fn insert(&self, rating: &Rating) -> Result<()>;

    /// All ratings, oldest first.
    async fn list(&self) -> Result<Vec<Rating>>;

    /// Number of ratings per preference as `(nmt, llm)`.
    async fn counts(&self) -> Result<(u64, u64)>;
}
