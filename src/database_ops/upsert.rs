use tracing::{debug, warn};

use super::models::{MoviePatch, UpsertOperation};
use super::store::{BulkWriteSummary, MovieStore, StoreError};

/// Turns one chunk of patches into a single unordered bulk upsert.
///
/// Documents the store refuses are logged and reported in the summary; only a
/// failure of the whole request comes back as an error.
pub struct UpsertSink<'a, S: MovieStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: MovieStore + ?Sized> UpsertSink<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn write_chunk(
        &self,
        chunk_idx: usize,
        patches: Vec<MoviePatch>,
    ) -> Result<BulkWriteSummary, StoreError> {
        if patches.is_empty() {
            return Ok(BulkWriteSummary::default());
        }
        let ops: Vec<UpsertOperation> = patches.into_iter().map(UpsertOperation::from).collect();
        let summary = self.store.bulk_upsert(&ops).await?;

        for failure in &summary.write_errors {
            warn!(
                chunk = chunk_idx,
                movie_id = %failure.movie_id,
                code = ?failure.code,
                error = %failure.message,
                "document write failed; batch continued"
            );
        }
        debug!(
            chunk = chunk_idx,
            ops = ops.len(),
            matched = summary.matched,
            modified = summary.modified,
            upserted = summary.upserted,
            "bulk upsert done"
        );
        Ok(summary)
    }
}
