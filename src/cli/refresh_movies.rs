use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::database_ops::refresh::{run_refresh, PhaseAdapters, RefreshConfig, RefreshReport};
use crate::util::db::Db;
use crate::util::env as env_util;

#[derive(Debug, Clone, Default)]
pub struct RefreshMoviesConfig {
    /// Optional override for the store connection string.
    pub store_uri: Option<String>,
    /// Optional override for the database name (defaults to env MONGODB_DB or "letterboxd").
    pub db_name: Option<String>,
    /// Pipeline settings; `None` reads them from the environment.
    pub refresh: Option<RefreshConfig>,
}

pub async fn run(cfg: RefreshMoviesConfig) -> Result<RefreshReport> {
    env_util::init_env();
    let uri = match cfg.store_uri {
        Some(uri) => uri,
        None => env_util::mongo_url().context("resolve store URI")?,
    };
    let db_name = cfg.db_name.unwrap_or_else(env_util::mongo_db_name);
    let config = cfg.refresh.unwrap_or_else(RefreshConfig::from_env);
    info!(
        chunk_size = config.chunk.chunk_size,
        max_attempts = config.chunk.retry.max_attempts,
        freshness_days = config.freshness_days,
        budget = ?config.budget,
        "refresh settings"
    );

    let db = Db::connect(&uri, &db_name)
        .await
        .context("connect to document store")?;
    let adapters = PhaseAdapters::from_config(&config, env_util::tmdb_api_key())
        .context("build http client")?;

    let report = run_refresh(&db, &adapters, &config).await;

    let skipped_chunks: usize = report.phases.iter().map(|p| p.chunks_skipped).sum();
    if skipped_chunks > 0 {
        warn!(skipped_chunks, "some chunks were skipped; rerun to pick them up");
    }
    Ok(report)
}
