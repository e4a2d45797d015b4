use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::models::{MovieRecord, MovieSnapshot, RawRating, ReviewCount, UpsertOperation};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("query failed: {0}")]
    Query(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A single document the store refused inside an unordered batch.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteFailure {
    pub movie_id: String,
    pub code: Option<i32>,
    pub message: String,
}

/// Outcome of one unordered bulk write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteSummary {
    pub matched: u64,
    pub modified: u64,
    pub upserted: u64,
    pub write_errors: Vec<WriteFailure>,
}

impl BulkWriteSummary {
    pub fn written(&self) -> u64 {
        self.matched + self.upserted
    }

    pub fn merge(&mut self, other: BulkWriteSummary) {
        self.matched += other.matched;
        self.modified += other.modified;
        self.upserted += other.upserted;
        self.write_errors.extend(other.write_errors);
    }
}

/// Half-open band over a numeric rating field; `upper = None` is unbounded.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueBand {
    pub field: String,
    pub lower: f64,
    pub upper: Option<f64>,
}

impl ValueBand {
    pub fn new(field: impl Into<String>, lower: f64, upper: Option<f64>) -> Self {
        Self {
            field: field.into(),
            lower,
            upper,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && self.upper.map_or(true, |u| value < u)
    }
}

/// Movies collection: read what the scheduler needs, write partial upserts.
#[async_trait]
pub trait MovieStore: Send + Sync {
    async fn movie_snapshots(&self) -> Result<Vec<MovieSnapshot>, StoreError>;

    /// Unordered: a refused document never blocks the rest of the batch.
    async fn bulk_upsert(&self, ops: &[UpsertOperation]) -> Result<BulkWriteSummary, StoreError>;

    async fn movies_by_ids(&self, ids: &[String]) -> Result<Vec<MovieRecord>, StoreError>;
}

/// Ratings collection: the quota-limited query surface the sampler works with.
#[async_trait]
pub trait RatingStore: Send + Sync {
    async fn random_sample(
        &self,
        size: usize,
        max_time: Duration,
    ) -> Result<Vec<RawRating>, StoreError>;

    async fn estimated_count(&self) -> Result<u64, StoreError>;

    async fn exact_count(&self) -> Result<u64, StoreError>;

    async fn page(&self, skip: u64, limit: usize) -> Result<Vec<RawRating>, StoreError>;

    async fn band_page(
        &self,
        band: &ValueBand,
        limit: usize,
        max_time: Duration,
    ) -> Result<Vec<RawRating>, StoreError>;

    async fn review_counts(&self, min_count: u64) -> Result<Vec<ReviewCount>, StoreError>;
}
