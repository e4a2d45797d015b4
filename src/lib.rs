//! Movie metadata refresh and training-corpus extraction for the
//! recommendation model.
//!
//! Two pipelines share one store binding:
//! - refresh: staleness scheduling, chunked fetch-and-upsert against the
//!   Letterboxd detail/poster pages and the TMDb API;
//! - corpus: randomized, deduplicated rating sampling plus the movie tables
//!   exported next to it.
pub mod cli;
pub mod database_ops;
pub mod telemetry;

pub mod util {
    pub mod db;
    pub mod env;
}

pub use database_ops::corpus::{build_corpus, Corpus, CorpusConfig};
pub use database_ops::refresh::{run_refresh, PhaseAdapters, RefreshConfig, RefreshReport};
pub use database_ops::store::{MovieStore, RatingStore, StoreError};
pub use util::db::Db;
