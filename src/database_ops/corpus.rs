//! Training corpus: a deduplicated rating sample plus the movie tables the
//! recommender trains against.
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

use super::letterboxd::clean_image_url;
use super::models::{MovieRecord, RatingRecord, ReviewCount};
use super::sampler::{RandomizedSampler, SamplerConfig};
use super::store::{MovieStore, RatingStore, StoreError};
use crate::util::env::{env_opt, env_parse};

pub const DEFAULT_SAMPLE_TARGET: usize = 60_000;
pub const DEFAULT_REVIEW_THRESHOLD: u64 = 20;
pub const DEFAULT_MAX_EXTRA_ROUNDS: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct CorpusConfig {
    pub sample_target: usize,
    /// Session size per sampling round; rounds stop once the target is met.
    pub rounds: Vec<usize>,
    /// Rounds sized to the remaining gap once `rounds` is spent.
    pub max_extra_rounds: usize,
    pub review_threshold: u64,
    pub output_dir: PathBuf,
    pub sampler: SamplerConfig,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            sample_target: DEFAULT_SAMPLE_TARGET,
            rounds: vec![2_000, 3_000, 5_000],
            max_extra_rounds: DEFAULT_MAX_EXTRA_ROUNDS,
            review_threshold: DEFAULT_REVIEW_THRESHOLD,
            output_dir: PathBuf::from("data"),
            sampler: SamplerConfig::default(),
        }
    }
}

fn parse_rounds(raw: &str) -> Option<Vec<usize>> {
    let rounds: Vec<usize> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect::<Option<_>>()?;
    (!rounds.is_empty()).then_some(rounds)
}

impl CorpusConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let rounds = match env_opt("FH_SAMPLE_ROUNDS") {
            Some(raw) => parse_rounds(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "FH_SAMPLE_ROUNDS unparsable; using defaults");
                d.rounds.clone()
            }),
            None => d.rounds.clone(),
        };
        Self {
            sample_target: env_parse("FH_SAMPLE_TARGET", d.sample_target),
            rounds,
            max_extra_rounds: env_parse("FH_SAMPLE_EXTRA_ROUNDS", d.max_extra_rounds),
            review_threshold: env_parse("FH_REVIEW_THRESHOLD", d.review_threshold),
            output_dir: env_opt("FH_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.output_dir),
            sampler: SamplerConfig::from_env(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieDataRow {
    pub movie_id: String,
    pub image_url: String,
    pub movie_title: Option<String>,
    pub year_released: Option<i32>,
}

impl From<&MovieRecord> for MovieDataRow {
    fn from(m: &MovieRecord) -> Self {
        Self {
            movie_id: m.movie_id.clone(),
            image_url: clean_image_url(m.image_url.as_deref()),
            movie_title: m.movie_title.clone(),
            year_released: m.year_released,
        }
    }
}

impl MovieDataRow {
    pub fn has_known_year(&self) -> bool {
        matches!(self.year_released, Some(y) if y != 0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Corpus {
    pub training: Vec<RatingRecord>,
    pub review_counts: Vec<ReviewCount>,
    /// Threshold movies with a known release year.
    pub movies: Vec<MovieDataRow>,
    pub retained_ids: Vec<String>,
}

fn absorb_round(
    out: &mut Vec<RatingRecord>,
    seen: &mut HashSet<(String, String)>,
    records: Vec<RatingRecord>,
) -> usize {
    let before = out.len();
    for rec in records {
        if seen.insert(rec.key()) {
            out.push(rec);
        }
    }
    out.len() - before
}

/// Run the round schedule, then gap-sized rounds up to `max_extra_rounds`,
/// until `sample_target` distinct pairs are held. Pairs seen in an earlier
/// round are not added again; a gap round that adds nothing ends the build.
#[instrument(skip(store, config), fields(target_size = config.sample_target))]
pub async fn build_training_sample<R>(store: &R, config: &CorpusConfig) -> Vec<RatingRecord>
where
    R: RatingStore + ?Sized,
{
    let target = config.sample_target;
    let mut sampler = RandomizedSampler::new(store, config.sampler.clone());
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut out: Vec<RatingRecord> = Vec::new();

    for (round, &size) in config.rounds.iter().enumerate() {
        if out.len() >= target {
            break;
        }
        let outcome = sampler.sample(size).await;
        let added = absorb_round(&mut out, &mut seen, outcome.records);
        info!(
            round = round + 1,
            size,
            added,
            total = out.len(),
            target_size = target,
            "sampling round done"
        );
    }

    for extra in 1..=config.max_extra_rounds {
        if out.len() >= target {
            break;
        }
        let size = target - out.len();
        let outcome = sampler.sample(size).await;
        let added = absorb_round(&mut out, &mut seen, outcome.records);
        info!(
            extra_round = extra,
            size,
            added,
            total = out.len(),
            target_size = target,
            "gap round done"
        );
        if added == 0 {
            debug!(extra_round = extra, "gap round added nothing; store looks exhausted");
            break;
        }
    }

    if out.len() < target {
        warn!(collected = out.len(), target_size = target, "training sample is under-filled");
    }
    out.truncate(target);
    out
}

/// Threshold ids, in their original order, whose movie row has a known year.
pub fn retained_movie_ids(threshold_ids: &[String], movies: &[MovieDataRow]) -> Vec<String> {
    let known: HashMap<&str, &MovieDataRow> =
        movies.iter().map(|m| (m.movie_id.as_str(), m)).collect();
    threshold_ids
        .iter()
        .filter(|id| known.get(id.as_str()).is_some_and(|m| m.has_known_year()))
        .cloned()
        .collect()
}

#[instrument(skip(store, config))]
pub async fn build_corpus<S>(store: &S, config: &CorpusConfig) -> Result<Corpus, StoreError>
where
    S: MovieStore + RatingStore + ?Sized,
{
    let training = build_training_sample(store, config).await;

    let review_counts = store.review_counts(config.review_threshold).await?;
    let threshold_ids: Vec<String> = review_counts.iter().map(|r| r.movie_id.clone()).collect();
    info!(
        movies = threshold_ids.len(),
        threshold = config.review_threshold,
        "movies above review threshold"
    );

    let rows: Vec<MovieDataRow> = store
        .movies_by_ids(&threshold_ids)
        .await?
        .iter()
        .map(MovieDataRow::from)
        .collect();
    let retained_ids = retained_movie_ids(&threshold_ids, &rows);
    let movies: Vec<MovieDataRow> = rows.into_iter().filter(|m| m.has_known_year()).collect();
    info!(
        retained = retained_ids.len(),
        dropped = threshold_ids.len() - retained_ids.len(),
        "retained movies with a known release year"
    );

    Ok(Corpus {
        training,
        review_counts,
        movies,
        retained_ids,
    })
}
