use anyhow::{Context, Result};
use tracing::info;

use crate::database_ops::artifacts::{write_corpus, ArtifactPaths};
use crate::database_ops::corpus::{build_corpus, CorpusConfig};
use crate::util::db::Db;
use crate::util::env as env_util;

#[derive(Debug, Clone, Default)]
pub struct BuildCorpusConfig {
    pub store_uri: Option<String>,
    pub db_name: Option<String>,
    /// Sampling and export settings; `None` reads them from the environment.
    pub corpus: Option<CorpusConfig>,
}

pub async fn run(cfg: BuildCorpusConfig) -> Result<ArtifactPaths> {
    env_util::init_env();
    let uri = match cfg.store_uri {
        Some(uri) => uri,
        None => env_util::mongo_url().context("resolve store URI")?,
    };
    let db_name = cfg.db_name.unwrap_or_else(env_util::mongo_db_name);
    let config = cfg.corpus.unwrap_or_else(CorpusConfig::from_env);
    info!(
        target_size = config.sample_target,
        rounds = ?config.rounds,
        review_threshold = config.review_threshold,
        out = %config.output_dir.display(),
        "corpus settings"
    );

    let db = Db::connect(&uri, &db_name)
        .await
        .context("connect to document store")?;
    let corpus = build_corpus(&db, &config)
        .await
        .context("build corpus")?;
    info!(
        training = corpus.training.len(),
        threshold_movies = corpus.review_counts.len(),
        retained = corpus.retained_ids.len(),
        "corpus built"
    );

    write_corpus(&config.output_dir, &corpus)
}
