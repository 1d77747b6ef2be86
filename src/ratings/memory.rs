use async_trait::async_trait;
use std::sync::Mutex;

use super::{Preference, Rating, RatingStore};
use crate::error::{Result, TandemError};

#[derive(Default)]
pub struct MemoryRatingStore {
    ratings: Mutex<Vec<Rating>>,
}

impl MemoryRatingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RatingStore for MemoryRatingStore {
    async fn insert(&self, rating: &Rating) -> Result<()> {
        let mut ratings = self.ratings.lock().unwrap_or_else(|e| e.into_inner());
        if ratings.iter().any(|r| r.rating_id == rating.rating_id) {
            return Err(TandemError::AlreadyExists(format!("rating '{}'", rating.rating_id)));
        }
        ratings.push(rating.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Rating>> {
        let ratings = self.ratings.lock().unwrap_or_else(|e| e.into_inner());
        Ok(ratings.clone())
    }

    async fn counts(&self) -> Result<(u64, u64)> {
        let ratings = self.ratings.lock().unwrap_or_else(|e| e.into_inner());
        let nmt = ratings.iter().filter(|r| r.preferred == Preference::Nmt).count() as u64;
        Ok((nmt, ratings.len() as u64 - nmt))
    }
}
