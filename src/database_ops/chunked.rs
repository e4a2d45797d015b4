//! Chunked fetch-and-upsert.
//!
//! The ID list is cut into fixed-size chunks. Inside a chunk every adapter call
//! runs concurrently (the chunk size is the fan-out bound); chunks themselves
//! run one after another. Any failure retries the whole chunk, and a chunk that
//! runs out of attempts is logged and skipped so the run always finishes.
use futures::future::try_join_all;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use super::models::{FetchTask, SourceKind};
use super::sources::{FetchError, SourceAdapter};
use super::store::{BulkWriteSummary, MovieStore, StoreError};
use super::upsert::UpsertSink;

pub const DEFAULT_CHUNK_SIZE: usize = 12;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DelayStrategy {
    Fixed,
    /// base * attempt
    Linear,
    /// base * 2^(attempt-1), capped
    Exponential { max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub strategy: DelayStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            strategy: DelayStrategy::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Pause after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.strategy {
            DelayStrategy::Fixed => self.base_delay,
            DelayStrategy::Linear => self.base_delay.saturating_mul(attempt),
            DelayStrategy::Exponential { max } => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkPolicy {
    pub chunk_size: usize,
    pub retry: RetryPolicy,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

/// Order-preserving partition; a zero size is treated as one.
pub fn chunks<T>(items: &[T], chunk_size: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(chunk_size.max(1))
}

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("fetch {movie_id}: {source}")]
    Fetch {
        movie_id: String,
        #[source]
        source: FetchError,
    },
    #[error("bulk write: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkRunSummary {
    pub source: Option<SourceKind>,
    pub tasks: usize,
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
    pub chunks_skipped: usize,
    /// Attempts beyond the first, across all chunks.
    pub retries: u32,
    pub skipped_ids: Vec<String>,
    pub writes: BulkWriteSummary,
}

async fn fetch_and_write<A, S>(
    chunk: &[FetchTask],
    adapter: &A,
    sink: &UpsertSink<'_, S>,
    chunk_idx: usize,
) -> Result<BulkWriteSummary, ChunkError>
where
    A: SourceAdapter + ?Sized,
    S: MovieStore + ?Sized,
{
    let patches = try_join_all(chunk.iter().map(|task| async move {
        adapter
            .fetch(task)
            .await
            .map_err(|source| ChunkError::Fetch {
                movie_id: task.movie_id.clone(),
                source,
            })
    }))
    .await?;
    Ok(sink.write_chunk(chunk_idx, patches).await?)
}

/// Fetch every task through `adapter` and upsert the results chunk by chunk.
#[instrument(skip(tasks, adapter, store, policy), fields(source = %adapter.kind(), tasks = tasks.len()))]
pub async fn run_chunked<A, S>(
    tasks: &[FetchTask],
    adapter: &A,
    store: &S,
    policy: &ChunkPolicy,
) -> ChunkRunSummary
where
    A: SourceAdapter + ?Sized,
    S: MovieStore + ?Sized,
{
    let mut summary = ChunkRunSummary {
        source: Some(adapter.kind()),
        tasks: tasks.len(),
        ..Default::default()
    };
    if tasks.is_empty() {
        debug!("nothing to fetch");
        return summary;
    }

    let sink = UpsertSink::new(store);
    let max_attempts = policy.retry.max_attempts.max(1);
    let total = tasks.len().div_ceil(policy.chunk_size.max(1));
    summary.chunks_total = total;

    for (chunk_idx, chunk) in chunks(tasks, policy.chunk_size).enumerate() {
        info!("processing chunk {} of {}", chunk_idx + 1, total);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match fetch_and_write(chunk, adapter, &sink, chunk_idx).await {
                Ok(written) => {
                    summary.chunks_succeeded += 1;
                    summary.writes.merge(written);
                    break;
                }
                Err(e) if attempt < max_attempts => {
                    let delay = policy.retry.delay_for(attempt);
                    warn!(chunk = chunk_idx, attempt, max_attempts, error = %e, delay_ms = delay.as_millis() as u64, "chunk failed; retrying");
                    summary.retries += 1;
                    sleep(delay).await;
                }
                Err(e) => {
                    error!(chunk = chunk_idx, attempts = attempt, error = %e, "chunk exhausted retries; skipping");
                    summary.chunks_skipped += 1;
                    summary
                        .skipped_ids
                        .extend(chunk.iter().map(|t| t.movie_id.clone()));
                    break;
                }
            }
        }
    }

    info!(
        source = %adapter.kind(),
        chunks = summary.chunks_total,
        succeeded = summary.chunks_succeeded,
        skipped = summary.chunks_skipped,
        written = summary.writes.written(),
        write_errors = summary.writes.write_errors.len(),
        "chunked run complete"
    );
    summary
}
