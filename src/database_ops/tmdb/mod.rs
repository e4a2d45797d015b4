pub mod provider;

pub use provider::{parse_enrichment, TmdbProvider, DEFAULT_TMDB_BASE_URL};
