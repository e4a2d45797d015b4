//! In-process store backing the unit tests.
//!
//! `random_sample` walks the rating list from a rotating cursor that advances by
//! half the requested size, so consecutive calls overlap the way a real
//! `$sample` does on small collections. Failures can be queued per operation.
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::models::{MovieRecord, MovieSnapshot, RawRating, ReviewCount, UpsertOperation};
use super::store::{
    BulkWriteSummary, MovieStore, RatingStore, StoreError, ValueBand, WriteFailure,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Snapshots,
    BulkUpsert,
    MoviesByIds,
    Sample,
    EstimatedCount,
    ExactCount,
    Page,
    BandPage,
    ReviewCounts,
}

#[derive(Debug, Default)]
struct MemoryState {
    movies: BTreeMap<String, MovieRecord>,
    ratings: Vec<RawRating>,
    sample_cursor: usize,
    pending_failures: HashMap<StoreOp, u32>,
    rejected_movies: HashSet<String>,
    calls: HashMap<StoreOp, u32>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn insert_movie(&self, record: MovieRecord) {
        self.lock().movies.insert(record.movie_id.clone(), record);
    }

    pub fn movie(&self, movie_id: &str) -> Option<MovieRecord> {
        self.lock().movies.get(movie_id).cloned()
    }

    pub fn movie_count(&self) -> usize {
        self.lock().movies.len()
    }

    pub fn insert_ratings(&self, ratings: impl IntoIterator<Item = RawRating>) {
        self.lock().ratings.extend(ratings);
    }

    /// Make the next `times` calls of `op` fail with a query error.
    pub fn fail_next(&self, op: StoreOp, times: u32) {
        *self.lock().pending_failures.entry(op).or_insert(0) += times;
    }

    /// Refuse writes for this movie inside bulk batches.
    pub fn reject_movie(&self, movie_id: &str) {
        self.lock().rejected_movies.insert(movie_id.to_string());
    }

    pub fn calls(&self, op: StoreOp) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    fn enter(&self, op: StoreOp) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        let mut state = self.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        if let Some(left) = state.pending_failures.get_mut(&op) {
            if *left > 0 {
                *left -= 1;
                return Err(StoreError::Query(format!("injected {op:?} failure")));
            }
        }
        Ok(state)
    }
}

#[async_trait]
impl MovieStore for MemoryStore {
    async fn movie_snapshots(&self) -> Result<Vec<MovieSnapshot>, StoreError> {
        let state = self.enter(StoreOp::Snapshots)?;
        Ok(state.movies.values().map(MovieSnapshot::from).collect())
    }

    async fn bulk_upsert(&self, ops: &[UpsertOperation]) -> Result<BulkWriteSummary, StoreError> {
        let mut guard = self.enter(StoreOp::BulkUpsert)?;
        let state = &mut *guard;
        let mut summary = BulkWriteSummary::default();
        for op in ops {
            if state.rejected_movies.contains(&op.movie_id) {
                summary.write_errors.push(WriteFailure {
                    movie_id: op.movie_id.clone(),
                    code: Some(11000),
                    message: "write rejected".into(),
                });
                continue;
            }
            match state.movies.get_mut(&op.movie_id) {
                Some(existing) => {
                    let before = existing.clone();
                    existing.apply(&op.patch);
                    summary.matched += 1;
                    if *existing != before {
                        summary.modified += 1;
                    }
                }
                None if op.upsert => {
                    let mut record = MovieRecord::new(op.movie_id.clone());
                    record.apply(&op.patch);
                    state.movies.insert(op.movie_id.clone(), record);
                    summary.upserted += 1;
                }
                None => {}
            }
        }
        Ok(summary)
    }

    async fn movies_by_ids(&self, ids: &[String]) -> Result<Vec<MovieRecord>, StoreError> {
        let state = self.enter(StoreOp::MoviesByIds)?;
        Ok(ids
            .iter()
            .filter_map(|id| state.movies.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl RatingStore for MemoryStore {
    async fn random_sample(
        &self,
        size: usize,
        _max_time: Duration,
    ) -> Result<Vec<RawRating>, StoreError> {
        let mut guard = self.enter(StoreOp::Sample)?;
        let state = &mut *guard;
        let len = state.ratings.len();
        if len == 0 || size == 0 {
            return Ok(Vec::new());
        }
        let take = size.min(len);
        let start = state.sample_cursor % len;
        let out = (0..take)
            .map(|i| state.ratings[(start + i) % len].clone())
            .collect();
        state.sample_cursor = start + (size / 2).max(1);
        Ok(out)
    }

    async fn estimated_count(&self) -> Result<u64, StoreError> {
        let state = self.enter(StoreOp::EstimatedCount)?;
        Ok(state.ratings.len() as u64)
    }

    async fn exact_count(&self) -> Result<u64, StoreError> {
        let state = self.enter(StoreOp::ExactCount)?;
        Ok(state.ratings.len() as u64)
    }

    async fn page(&self, skip: u64, limit: usize) -> Result<Vec<RawRating>, StoreError> {
        let state = self.enter(StoreOp::Page)?;
        Ok(state
            .ratings
            .iter()
            .skip(skip as usize)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn band_page(
        &self,
        band: &ValueBand,
        limit: usize,
        _max_time: Duration,
    ) -> Result<Vec<RawRating>, StoreError> {
        let state = self.enter(StoreOp::BandPage)?;
        if band.field != "rating_val" {
            return Ok(Vec::new());
        }
        Ok(state
            .ratings
            .iter()
            .filter(|r| r.rating_val.map_or(false, |v| band.contains(f64::from(v))))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn review_counts(&self, min_count: u64) -> Result<Vec<ReviewCount>, StoreError> {
        let state = self.enter(StoreOp::ReviewCounts)?;
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for rating in &state.ratings {
            if let Some(movie_id) = &rating.movie_id {
                *counts.entry(movie_id.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts
            .into_iter()
            .filter(|(_, count)| *count >= min_count)
            .map(|(movie_id, count)| ReviewCount { movie_id, count })
            .collect())
    }
}

/// `n` ratings with distinct ids and distinct (user, movie) pairs.
pub fn synthetic_ratings(n: usize) -> Vec<RawRating> {
    (0..n)
        .map(|i| RawRating {
            id: Some(format!("r{i:06}")),
            user_id: Some(format!("user{}", i / 7)),
            movie_id: Some(format!("movie{}", i % 7)),
            rating_val: Some((i % 10) as i32 + 1),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::models::MoviePatch;
    use chrono::Utc;

    #[tokio::test]
    async fn sample_calls_overlap() {
        let store = MemoryStore::new();
        store.insert_ratings(synthetic_ratings(10));
        let a = store.random_sample(4, Duration::ZERO).await.unwrap();
        let b = store.random_sample(4, Duration::ZERO).await.unwrap();
        assert_eq!(a[2], b[0]);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next(StoreOp::EstimatedCount, 1);
        assert!(store.estimated_count().await.is_err());
        assert_eq!(store.estimated_count().await.unwrap(), 0);
        assert_eq!(store.calls(StoreOp::EstimatedCount), 2);
    }

    #[tokio::test]
    async fn rejected_movie_does_not_block_batch() {
        let store = MemoryStore::new();
        store.reject_movie("bad");
        let ops: Vec<UpsertOperation> = ["good", "bad", "also-good"]
            .into_iter()
            .map(|id| MoviePatch::stamped(id, Utc::now()).into())
            .collect();
        let summary = store.bulk_upsert(&ops).await.unwrap();
        assert_eq!(summary.upserted, 2);
        assert_eq!(summary.write_errors.len(), 1);
        assert!(store.movie("also-good").is_some());
        assert!(store.movie("bad").is_none());
    }

    #[test]
    fn synthetic_pairs_are_unique() {
        let ratings = synthetic_ratings(100);
        let pairs: HashSet<_> = ratings
            .iter()
            .map(|r| (r.user_id.clone(), r.movie_id.clone()))
            .collect();
        assert_eq!(pairs.len(), 100);
    }
}
