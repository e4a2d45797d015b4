use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// One field of a partial update.
///
/// `Keep` leaves whatever the store already holds, so a patch produced by one
/// source never clobbers fields another source owns.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate<T> {
    Keep,
    Clear,
    Set(T),
}

impl<T> Default for FieldUpdate<T> {
    fn default() -> Self {
        FieldUpdate::Keep
    }
}

impl<T: Clone> FieldUpdate<T> {
    /// `Some` becomes `Set`, `None` becomes `Clear` (the "field unavailable" marker).
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => FieldUpdate::Set(v),
            None => FieldUpdate::Clear,
        }
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, FieldUpdate::Keep)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            FieldUpdate::Set(v) => Some(v),
            _ => None,
        }
    }

    fn apply_to(&self, slot: &mut Option<T>) {
        match self {
            FieldUpdate::Keep => {}
            FieldUpdate::Clear => *slot = None,
            FieldUpdate::Set(v) => *slot = Some(v.clone()),
        }
    }
}

/// Which external source a fetch goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Detail,
    Poster,
    Enrichment,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Detail => "detail",
            SourceKind::Poster => "poster",
            SourceKind::Enrichment => "enrichment",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Movie document as held by the store. Every field except the key is optional
/// because different sources fill different parts of it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MovieRecord {
    pub movie_id: String,
    pub movie_title: Option<String>,
    pub year_released: Option<i32>,
    pub imdb_link: Option<String>,
    pub imdb_id: Option<String>,
    pub tmdb_link: Option<String>,
    pub tmdb_id: Option<String>,
    pub image_url: Option<String>,
    pub genres: Option<Vec<String>>,
    pub production_countries: Option<Vec<String>>,
    pub spoken_languages: Option<Vec<String>>,
    pub popularity: Option<f64>,
    pub overview: Option<String>,
    pub runtime: Option<i64>,
    pub vote_average: Option<f64>,
    pub vote_count: Option<i64>,
    pub release_date: Option<String>,
    pub original_language: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl MovieRecord {
    pub fn new(movie_id: impl Into<String>) -> Self {
        Self {
            movie_id: movie_id.into(),
            ..Self::default()
        }
    }

    /// Merge a partial update into this record. List fields are replaced
    /// wholesale, so applying the same patch twice is a no-op the second time.
    pub fn apply(&mut self, patch: &MoviePatch) {
        patch.movie_title.apply_to(&mut self.movie_title);
        patch.year_released.apply_to(&mut self.year_released);
        patch.imdb_link.apply_to(&mut self.imdb_link);
        patch.imdb_id.apply_to(&mut self.imdb_id);
        patch.tmdb_link.apply_to(&mut self.tmdb_link);
        patch.tmdb_id.apply_to(&mut self.tmdb_id);
        patch.image_url.apply_to(&mut self.image_url);
        patch.genres.apply_to(&mut self.genres);
        patch
            .production_countries
            .apply_to(&mut self.production_countries);
        patch.spoken_languages.apply_to(&mut self.spoken_languages);
        patch.popularity.apply_to(&mut self.popularity);
        patch.overview.apply_to(&mut self.overview);
        patch.runtime.apply_to(&mut self.runtime);
        patch.vote_average.apply_to(&mut self.vote_average);
        patch.vote_count.apply_to(&mut self.vote_count);
        patch.release_date.apply_to(&mut self.release_date);
        patch.original_language.apply_to(&mut self.original_language);
        patch.last_updated.apply_to(&mut self.last_updated);
    }
}

/// Partial field set produced by a source adapter for one movie.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MoviePatch {
    pub movie_id: String,
    pub movie_title: FieldUpdate<String>,
    pub year_released: FieldUpdate<i32>,
    pub imdb_link: FieldUpdate<String>,
    pub imdb_id: FieldUpdate<String>,
    pub tmdb_link: FieldUpdate<String>,
    pub tmdb_id: FieldUpdate<String>,
    pub image_url: FieldUpdate<String>,
    pub genres: FieldUpdate<Vec<String>>,
    pub production_countries: FieldUpdate<Vec<String>>,
    pub spoken_languages: FieldUpdate<Vec<String>>,
    pub popularity: FieldUpdate<f64>,
    pub overview: FieldUpdate<String>,
    pub runtime: FieldUpdate<i64>,
    pub vote_average: FieldUpdate<f64>,
    pub vote_count: FieldUpdate<i64>,
    pub release_date: FieldUpdate<String>,
    pub original_language: FieldUpdate<String>,
    pub last_updated: FieldUpdate<DateTime<Utc>>,
}

impl MoviePatch {
    /// Empty patch carrying only the refresh timestamp.
    pub fn stamped(movie_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            movie_id: movie_id.into(),
            last_updated: FieldUpdate::Set(now),
            ..Self::default()
        }
    }
}

/// Ephemeral unit of work: one ID against one source.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTask {
    pub movie_id: String,
    pub source: SourceKind,
    /// Enrichment lookups are keyed by the external TMDb ID, not ours.
    pub tmdb_id: Option<String>,
}

impl FetchTask {
    pub fn new(movie_id: impl Into<String>, source: SourceKind) -> Self {
        Self {
            movie_id: movie_id.into(),
            source,
            tmdb_id: None,
        }
    }

    pub fn enrichment(movie_id: impl Into<String>, tmdb_id: impl Into<String>) -> Self {
        Self {
            movie_id: movie_id.into(),
            source: SourceKind::Enrichment,
            tmdb_id: Some(tmdb_id.into()),
        }
    }
}

/// Filter on `movie_id`, `$set` the patch, insert when missing.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOperation {
    pub movie_id: String,
    pub patch: MoviePatch,
    pub upsert: bool,
}

impl From<MoviePatch> for UpsertOperation {
    fn from(patch: MoviePatch) -> Self {
        Self {
            movie_id: patch.movie_id.clone(),
            patch,
            upsert: true,
        }
    }
}

/// The handful of fields the scheduler needs to decide what to refresh.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MovieSnapshot {
    pub movie_id: String,
    /// Whether the `tmdb_id` key exists at all, even if empty.
    pub has_tmdb_key: bool,
    pub tmdb_id: Option<String>,
    pub image_url: Option<String>,
    pub has_genres: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl From<&MovieRecord> for MovieSnapshot {
    fn from(record: &MovieRecord) -> Self {
        Self {
            movie_id: record.movie_id.clone(),
            has_tmdb_key: record.tmdb_id.is_some(),
            tmdb_id: record.tmdb_id.clone(),
            image_url: record.image_url.clone(),
            has_genres: record.genres.is_some(),
            last_updated: record.last_updated,
        }
    }
}

/// Rating document as returned by the store, before validation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRating {
    /// Store-assigned identifier (`_id`).
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub movie_id: Option<String>,
    pub rating_val: Option<i32>,
}

/// Validated rating triple; `(user_id, movie_id)` is its semantic key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RatingRecord {
    pub user_id: String,
    pub movie_id: String,
    pub rating_val: i32,
}

impl RatingRecord {
    /// Drops documents missing any of the three required fields.
    pub fn from_raw(raw: &RawRating) -> Option<Self> {
        Some(Self {
            user_id: raw.user_id.clone()?,
            movie_id: raw.movie_id.clone()?,
            rating_val: raw.rating_val?,
        })
    }

    pub fn key(&self) -> (String, String) {
        (self.user_id.clone(), self.movie_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewCount {
    pub movie_id: String,
    pub count: u64,
}
