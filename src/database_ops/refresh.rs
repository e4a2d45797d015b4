//! Scheduled refresh of the movies collection.
//!
//! Three phases run in a fixed order: detail pages, poster fragments, TMDb
//! enrichment. Each phase re-reads the snapshot so it sees what the previous
//! phase wrote (enrichment relies on the TMDb ids the detail phase records).
use chrono::Utc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use super::chunked::{run_chunked, ChunkPolicy, ChunkRunSummary, DelayStrategy, RetryPolicy};
use super::letterboxd::{DetailAdapter, PosterAdapter};
use super::models::{FetchTask, MovieSnapshot, SourceKind};
use super::sources::{build_http_client, Source, SourceAdapter};
use super::staleness::{StalenessScheduler, DEFAULT_FRESHNESS_DAYS};
use super::store::MovieStore;
use super::tmdb::TmdbProvider;
use crate::util::env::{env_opt, env_parse, env_parse_opt};

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshConfig {
    pub chunk: ChunkPolicy,
    pub freshness_days: i64,
    /// Per-phase cap on fetched IDs; `None` refreshes everything due.
    pub budget: Option<usize>,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub letterboxd_base_url: Option<String>,
    pub tmdb_base_url: Option<String>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            chunk: ChunkPolicy::default(),
            freshness_days: DEFAULT_FRESHNESS_DAYS,
            budget: None,
            request_timeout: Duration::from_secs(30),
            user_agent: format!("film-harvest/{}", env!("CARGO_PKG_VERSION")),
            letterboxd_base_url: None,
            tmdb_base_url: None,
        }
    }
}

fn parse_delay_strategy(raw: &str, cap: Duration) -> Option<DelayStrategy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "fixed" => Some(DelayStrategy::Fixed),
        "linear" => Some(DelayStrategy::Linear),
        "exponential" | "exp" => Some(DelayStrategy::Exponential { max: cap }),
        _ => None,
    }
}

impl RefreshConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let base_delay = Duration::from_millis(env_parse(
            "FH_RETRY_DELAY_MS",
            d.chunk.retry.base_delay.as_millis() as u64,
        ));
        let max_delay = Duration::from_millis(env_parse("FH_RETRY_MAX_DELAY_MS", 30_000u64));
        let strategy = env_opt("FH_RETRY_BACKOFF")
            .and_then(|raw| parse_delay_strategy(&raw, max_delay))
            .unwrap_or(d.chunk.retry.strategy);

        Self {
            chunk: ChunkPolicy {
                chunk_size: env_parse("FH_CHUNK_SIZE", d.chunk.chunk_size).max(1),
                retry: RetryPolicy {
                    max_attempts: env_parse("FH_MAX_RETRIES", d.chunk.retry.max_attempts).max(1),
                    base_delay,
                    strategy,
                },
            },
            freshness_days: env_parse("FH_FRESHNESS_DAYS", d.freshness_days),
            budget: env_parse_opt("FH_RUN_BUDGET"),
            request_timeout: Duration::from_secs(env_parse(
                "FH_REQUEST_TIMEOUT_SECS",
                d.request_timeout.as_secs(),
            )),
            user_agent: env_opt("FH_USER_AGENT").unwrap_or(d.user_agent),
            letterboxd_base_url: env_opt("FH_LETTERBOXD_BASE_URL"),
            tmdb_base_url: env_opt("FH_TMDB_BASE_URL"),
        }
    }

    pub fn scheduler(&self) -> StalenessScheduler {
        StalenessScheduler::new(chrono::Duration::days(self.freshness_days), self.budget)
    }
}

/// One adapter per phase. Enrichment is absent when no API key is configured.
pub struct PhaseAdapters {
    pub detail: Box<dyn SourceAdapter>,
    pub poster: Box<dyn SourceAdapter>,
    pub enrichment: Option<Box<dyn SourceAdapter>>,
}

impl PhaseAdapters {
    /// Live adapters sharing one HTTP client.
    pub fn from_config(config: &RefreshConfig, tmdb_api_key: Option<String>) -> reqwest::Result<Self> {
        let http = build_http_client(&config.user_agent, config.request_timeout)?;
        let lb_base = config.letterboxd_base_url.as_deref();
        let enrichment = tmdb_api_key.map(|key| {
            Box::new(Source::Enrichment(TmdbProvider::new(
                http.clone(),
                key,
                config.tmdb_base_url.as_deref(),
            ))) as Box<dyn SourceAdapter>
        });
        Ok(Self {
            detail: Box::new(Source::Detail(DetailAdapter::new(http.clone(), lb_base))),
            poster: Box::new(Source::Poster(PosterAdapter::new(http, lb_base))),
            enrichment,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    pub phases: Vec<ChunkRunSummary>,
    /// Phases that did not run (no adapter, or the snapshot read failed).
    pub skipped: Vec<SourceKind>,
}

impl RefreshReport {
    pub fn phase(&self, kind: SourceKind) -> Option<&ChunkRunSummary> {
        self.phases.iter().find(|p| p.source == Some(kind))
    }
}

async fn snapshots_for<S: MovieStore + ?Sized>(store: &S, phase: SourceKind) -> Option<Vec<MovieSnapshot>> {
    match store.movie_snapshots().await {
        Ok(s) => Some(s),
        Err(e) => {
            error!(phase = %phase, error = %e, "could not read movie snapshot; skipping phase");
            None
        }
    }
}

#[instrument(skip(store, adapters, config))]
pub async fn run_refresh<S>(store: &S, adapters: &PhaseAdapters, config: &RefreshConfig) -> RefreshReport
where
    S: MovieStore + ?Sized,
{
    let scheduler = config.scheduler();
    let mut report = RefreshReport::default();

    let phases: [(SourceKind, Option<&dyn SourceAdapter>); 3] = [
        (SourceKind::Detail, Some(adapters.detail.as_ref())),
        (SourceKind::Poster, Some(adapters.poster.as_ref())),
        (SourceKind::Enrichment, adapters.enrichment.as_deref()),
    ];

    for (kind, adapter) in phases {
        let Some(adapter) = adapter else {
            warn!(phase = %kind, "no adapter configured; skipping phase");
            report.skipped.push(kind);
            continue;
        };
        let Some(snapshots) = snapshots_for(store, kind).await else {
            report.skipped.push(kind);
            continue;
        };

        let now = Utc::now();
        let tasks: Vec<FetchTask> = match kind {
            SourceKind::Detail => scheduler.plan_detail(&snapshots, now),
            SourceKind::Poster => scheduler.plan_poster(&snapshots, now),
            SourceKind::Enrichment => scheduler.plan_enrichment(&snapshots),
        };
        info!(phase = %kind, known = snapshots.len(), due = tasks.len(), "phase planned");

        report
            .phases
            .push(run_chunked(&tasks, adapter, store, &config.chunk).await);
    }

    for p in &report.phases {
        info!(
            phase = ?p.source,
            tasks = p.tasks,
            chunks = p.chunks_total,
            skipped_chunks = p.chunks_skipped,
            written = p.writes.written(),
            write_errors = p.writes.write_errors.len(),
            "phase summary"
        );
    }
    report
}
