//! Randomized rating sampler.
//!
//! The store's random-sample primitive is quota limited and fails under load,
//! so a session walks up to three strategies in order and stops as soon as it
//! holds `target` distinct documents:
//!
//! 1. `NativeSample`: repeated random batches; on failure the batch cap halves
//!    (down to a floor) and the session pauses.
//! 2. `RandomOffset`: uniformly random `skip` into the collection, fixed page.
//! 3. `ValueBands`: a small page from each band of a numeric field.
//!
//! Every loop has an attempt ceiling and every query error is logged and
//! absorbed. The result is truncated to `target` and then reduced to one
//! record per `(user_id, movie_id)`.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::models::{RatingRecord, RawRating};
use super::store::{RatingStore, ValueBand};
use crate::util::env::{env_flag, env_parse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplingStrategy {
    NativeSample,
    RandomOffset,
    ValueBands,
}

impl SamplingStrategy {
    pub const ALL: [SamplingStrategy; 3] = [
        SamplingStrategy::NativeSample,
        SamplingStrategy::RandomOffset,
        SamplingStrategy::ValueBands,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SamplingStrategy::NativeSample => "native_sample",
            SamplingStrategy::RandomOffset => "random_offset",
            SamplingStrategy::ValueBands => "value_bands",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeSampleConfig {
    pub max_batch: usize,
    pub min_batch: usize,
    pub max_time: Duration,
    pub max_attempts: u32,
    /// Consecutive failures at `min_batch` before giving up on the strategy.
    pub floor_failures: u32,
    pub pause_after_batch: Duration,
    pub pause_after_error: Duration,
}

impl Default for NativeSampleConfig {
    fn default() -> Self {
        Self {
            max_batch: 200,
            min_batch: 50,
            max_time: Duration::from_secs(5),
            max_attempts: 30,
            floor_failures: 3,
            pause_after_batch: Duration::from_secs(1),
            pause_after_error: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetScanConfig {
    pub page_size: usize,
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for OffsetScanConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_attempts: 50,
            delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BandScanConfig {
    pub page_size: usize,
    pub max_time: Duration,
    /// Empty disables the strategy.
    pub bands: Vec<ValueBand>,
}

impl BandScanConfig {
    pub fn rating_bands() -> Vec<ValueBand> {
        let mut bands: Vec<ValueBand> = (1..5)
            .map(|lo| ValueBand::new("rating_val", f64::from(lo), Some(f64::from(lo + 1))))
            .collect();
        bands.push(ValueBand::new("rating_val", 5.0, None));
        bands
    }
}

impl Default for BandScanConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_time: Duration::from_secs(3),
            bands: Self::rating_bands(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Strategies in the order they are tried.
    pub strategies: Vec<SamplingStrategy>,
    pub native: NativeSampleConfig,
    pub offset: OffsetScanConfig,
    pub bands: BandScanConfig,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            strategies: SamplingStrategy::ALL.to_vec(),
            native: NativeSampleConfig::default(),
            offset: OffsetScanConfig::default(),
            bands: BandScanConfig::default(),
        }
    }
}

impl SamplerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let ms = |key: &str, default: Duration| {
            Duration::from_millis(env_parse(key, default.as_millis() as u64))
        };
        let native = NativeSampleConfig {
            max_batch: env_parse("FH_SAMPLE_MAX_BATCH", d.native.max_batch),
            min_batch: env_parse("FH_SAMPLE_MIN_BATCH", d.native.min_batch),
            max_time: ms("FH_SAMPLE_MAX_TIME_MS", d.native.max_time),
            max_attempts: env_parse("FH_SAMPLE_MAX_ATTEMPTS", d.native.max_attempts),
            floor_failures: env_parse("FH_SAMPLE_FLOOR_FAILURES", d.native.floor_failures),
            pause_after_batch: ms("FH_SAMPLE_PAUSE_MS", d.native.pause_after_batch),
            pause_after_error: ms("FH_SAMPLE_ERROR_PAUSE_MS", d.native.pause_after_error),
        };
        let offset = OffsetScanConfig {
            page_size: env_parse("FH_OFFSET_PAGE_SIZE", d.offset.page_size),
            max_attempts: env_parse("FH_OFFSET_MAX_ATTEMPTS", d.offset.max_attempts),
            delay: ms("FH_OFFSET_DELAY_MS", d.offset.delay),
        };
        let bands = BandScanConfig {
            page_size: env_parse("FH_BAND_PAGE_SIZE", d.bands.page_size),
            max_time: ms("FH_BAND_MAX_TIME_MS", d.bands.max_time),
            bands: if env_flag("FH_BAND_SCAN", true) {
                d.bands.bands
            } else {
                Vec::new()
            },
        };
        Self {
            strategies: d.strategies,
            native,
            offset,
            bands,
        }
    }
}

/// Accumulator owned by one `sample` call.
#[derive(Debug, Default)]
struct SampleSession {
    target: usize,
    seen_ids: HashSet<String>,
    collected: Vec<RawRating>,
}

impl SampleSession {
    fn new(target: usize) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    fn is_full(&self) -> bool {
        self.collected.len() >= self.target
    }

    /// Keep documents whose store id is new; returns how many were kept.
    fn absorb(&mut self, batch: Vec<RawRating>) -> usize {
        let before = self.collected.len();
        for doc in batch {
            let Some(id) = doc.id.clone() else {
                continue;
            };
            if self.seen_ids.insert(id) {
                self.collected.push(doc);
            }
        }
        self.collected.len() - before
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleOutcome {
    pub records: Vec<RatingRecord>,
    /// Distinct documents each strategy added.
    pub contributed: Vec<(SamplingStrategy, usize)>,
    /// Documents dropped for a missing field or a repeated composite key.
    pub dropped: usize,
}

/// Truncate to `target`, then keep the first record per composite key.
pub fn finalize_sample(mut raw: Vec<RawRating>, target: usize) -> (Vec<RatingRecord>, usize) {
    raw.truncate(target);
    let mut seen: HashSet<(String, String)> = HashSet::with_capacity(raw.len());
    let mut out = Vec::with_capacity(raw.len());
    let mut dropped = 0usize;
    for doc in &raw {
        match RatingRecord::from_raw(doc) {
            Some(rec) if seen.insert(rec.key()) => out.push(rec),
            _ => dropped += 1,
        }
    }
    (out, dropped)
}

pub struct RandomizedSampler<'a, R: RatingStore + ?Sized> {
    store: &'a R,
    config: SamplerConfig,
    rng: StdRng,
}

impl<'a, R: RatingStore + ?Sized> RandomizedSampler<'a, R> {
    pub fn new(store: &'a R, config: SamplerConfig) -> Self {
        Self {
            store,
            config,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(store: &'a R, config: SamplerConfig, seed: u64) -> Self {
        Self {
            store,
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Distinct rating documents, at most `target` of them, before the
    /// composite-key pass.
    #[instrument(skip(self))]
    pub async fn sample_raw(&mut self, target: usize) -> (Vec<RawRating>, Vec<(SamplingStrategy, usize)>) {
        let mut session = SampleSession::new(target);
        let mut contributed = Vec::new();
        if target == 0 {
            return (Vec::new(), contributed);
        }

        let strategies = self.config.strategies.clone();
        for strategy in strategies {
            if session.is_full() {
                break;
            }
            let before = session.collected.len();
            match strategy {
                SamplingStrategy::NativeSample => self.native_sample(&mut session).await,
                SamplingStrategy::RandomOffset => self.random_offset(&mut session).await,
                SamplingStrategy::ValueBands => self.value_bands(&mut session).await,
            }
            let added = session.collected.len() - before;
            info!(
                strategy = strategy.as_str(),
                added,
                total = session.collected.len(),
                target_size = target,
                "sampling strategy finished"
            );
            contributed.push((strategy, added));
        }

        if !session.is_full() {
            warn!(
                target_size = target,
                collected = session.collected.len(),
                "sampler exhausted with a deficit; returning a smaller sample"
            );
        }
        let mut raw = session.collected;
        raw.truncate(target);
        (raw, contributed)
    }

    pub async fn sample(&mut self, target: usize) -> SampleOutcome {
        let (raw, contributed) = self.sample_raw(target).await;
        let (records, dropped) = finalize_sample(raw, target);
        if dropped > 0 {
            debug!(dropped, "dropped incomplete or repeated ratings");
        }
        SampleOutcome {
            records,
            contributed,
            dropped,
        }
    }

    async fn native_sample(&mut self, session: &mut SampleSession) {
        let cfg = self.config.native.clone();
        let min_batch = cfg.min_batch.max(1);
        let mut cap = cfg.max_batch.max(min_batch);
        let mut floor_failures = 0u32;

        for attempt in 1..=cfg.max_attempts {
            if session.is_full() {
                return;
            }
            let size = cap;
            match self.store.random_sample(size, cfg.max_time).await {
                Ok(batch) if batch.is_empty() => {
                    debug!(attempt, "random sample returned nothing; collection looks empty");
                    return;
                }
                Ok(batch) => {
                    floor_failures = 0;
                    let fetched = batch.len();
                    let added = session.absorb(batch);
                    debug!(attempt, size, fetched, added, total = session.collected.len(), "sample batch");
                    if !session.is_full() {
                        sleep(cfg.pause_after_batch).await;
                    }
                }
                Err(e) => {
                    if cap <= min_batch {
                        floor_failures += 1;
                        if floor_failures >= cfg.floor_failures {
                            warn!(attempt, error = %e, "batch cap stuck at floor; abandoning native sample");
                            return;
                        }
                    }
                    cap = (cap / 2).max(min_batch);
                    warn!(attempt, error = %e, next_cap = cap, "random sample failed");
                    sleep(cfg.pause_after_error).await;
                }
            }
        }
        debug!(attempts = cfg.max_attempts, "native sample attempt budget spent");
    }

    async fn collection_size(&self) -> u64 {
        match self.store.estimated_count().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "estimated count failed; falling back to exact count");
                match self.store.exact_count().await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = %e, "exact count failed");
                        0
                    }
                }
            }
        }
    }

    async fn random_offset(&mut self, session: &mut SampleSession) {
        let cfg = self.config.offset.clone();
        let page_size = cfg.page_size.max(1);
        let size = self.collection_size().await;
        if size == 0 {
            debug!("collection size unknown or zero; skipping offset scan");
            return;
        }

        let upper = size.saturating_sub(page_size as u64);
        for attempt in 1..=cfg.max_attempts {
            if session.is_full() {
                return;
            }
            let offset = if upper == 0 {
                0
            } else {
                self.rng.gen_range(0..upper)
            };
            match self.store.page(offset, page_size).await {
                Ok(page) => {
                    let added = session.absorb(page);
                    debug!(attempt, offset, added, total = session.collected.len(), "offset page");
                }
                Err(e) => warn!(attempt, offset, error = %e, "offset page failed"),
            }
            if upper == 0 {
                debug!(size, page_size, "collection fits in one page; offset scan done");
                return;
            }
            sleep(cfg.delay).await;
        }
    }

    async fn value_bands(&mut self, session: &mut SampleSession) {
        let cfg = self.config.bands.clone();
        if cfg.bands.is_empty() {
            debug!("no value bands configured");
            return;
        }
        for band in &cfg.bands {
            if session.is_full() {
                return;
            }
            match self.store.band_page(band, cfg.page_size.max(1), cfg.max_time).await {
                Ok(page) => {
                    let added = session.absorb(page);
                    debug!(field = %band.field, lower = band.lower, upper = ?band.upper, added, "band page");
                }
                Err(e) => warn!(field = %band.field, lower = band.lower, error = %e, "band page failed"),
            }
        }
    }
}
