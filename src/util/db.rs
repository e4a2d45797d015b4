use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::ErrorKind;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::database_ops::models::{
    FieldUpdate, MoviePatch, MovieRecord, MovieSnapshot, RawRating, ReviewCount, UpsertOperation,
};
use crate::database_ops::store::{
    BulkWriteSummary, MovieStore, RatingStore, StoreError, ValueBand, WriteFailure,
};

pub const MOVIES: &str = "movies";
pub const RATINGS: &str = "ratings";

impl From<mongodb::error::Error> for StoreError {
    fn from(e: mongodb::error::Error) -> Self {
        match e.kind.as_ref() {
            ErrorKind::ServerSelection { .. } => StoreError::Unavailable(e.to_string()),
            ErrorKind::BsonDeserialization(_) => StoreError::Decode(e.to_string()),
            _ => StoreError::Query(e.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Db {
    pub client: Client,
    pub database: Database,
}

impl Db {
    // SECURITY: never include raw connection strings in tracing spans (they carry credentials).
    #[instrument(skip(uri))]
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let mut options = ClientOptions::parse(uri).await?;
        options.app_name = Some("film-harvest".into());
        if options.server_selection_timeout.is_none() {
            options.server_selection_timeout = Some(Duration::from_secs(15));
        }
        let client = Client::with_options(options)?;
        let database = client.database(db_name);
        database.run_command(doc! { "ping": 1 }).await?;
        info!(db = db_name, "connected to document store");
        Ok(Self { client, database })
    }

    fn movies(&self) -> Collection<Document> {
        self.database.collection(MOVIES)
    }

    fn ratings(&self) -> Collection<Document> {
        self.database.collection(RATINGS)
    }
}

fn bson_i64(v: Option<&Bson>) -> Option<i64> {
    match v? {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
        _ => None,
    }
}

fn bson_f64(v: Option<&Bson>) -> Option<f64> {
    match v? {
        Bson::Double(f) => Some(*f),
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        _ => None,
    }
}

fn bson_string(v: Option<&Bson>) -> Option<String> {
    match v? {
        Bson::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn bson_strings(v: Option<&Bson>) -> Option<Vec<String>> {
    match v? {
        Bson::Array(items) => Some(
            items
                .iter()
                .filter_map(|b| b.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}

fn bson_datetime(v: Option<&Bson>) -> Option<DateTime<Utc>> {
    match v? {
        Bson::DateTime(dt) => DateTime::<Utc>::from_timestamp_millis(dt.timestamp_millis()),
        _ => None,
    }
}

fn to_bson_datetime(ts: &DateTime<Utc>) -> Bson {
    Bson::DateTime(mongodb::bson::DateTime::from_millis(ts.timestamp_millis()))
}

fn put<T>(set: &mut Document, key: &str, field: &FieldUpdate<T>, conv: impl Fn(&T) -> Bson) {
    match field {
        FieldUpdate::Keep => {}
        FieldUpdate::Clear => {
            set.insert(key, Bson::Null);
        }
        FieldUpdate::Set(v) => {
            set.insert(key, conv(v));
        }
    }
}

/// `$set` body for a patch. `Keep` fields are left out entirely.
pub fn patch_to_set_document(p: &MoviePatch) -> Document {
    let s = |v: &String| Bson::String(v.clone());
    let list = |v: &Vec<String>| Bson::Array(v.iter().cloned().map(Bson::String).collect());
    let mut set = Document::new();
    put(&mut set, "movie_title", &p.movie_title, s);
    put(&mut set, "year_released", &p.year_released, |v| Bson::Int32(*v));
    put(&mut set, "imdb_link", &p.imdb_link, s);
    put(&mut set, "imdb_id", &p.imdb_id, s);
    put(&mut set, "tmdb_link", &p.tmdb_link, s);
    put(&mut set, "tmdb_id", &p.tmdb_id, s);
    put(&mut set, "image_url", &p.image_url, s);
    put(&mut set, "genres", &p.genres, list);
    put(&mut set, "production_countries", &p.production_countries, list);
    put(&mut set, "spoken_languages", &p.spoken_languages, list);
    put(&mut set, "popularity", &p.popularity, |v| Bson::Double(*v));
    put(&mut set, "overview", &p.overview, s);
    put(&mut set, "runtime", &p.runtime, |v| Bson::Int64(*v));
    put(&mut set, "vote_average", &p.vote_average, |v| Bson::Double(*v));
    put(&mut set, "vote_count", &p.vote_count, |v| Bson::Int64(*v));
    put(&mut set, "release_date", &p.release_date, s);
    put(&mut set, "original_language", &p.original_language, s);
    put(&mut set, "last_updated", &p.last_updated, to_bson_datetime);
    set
}

pub fn movie_from_document(d: &Document) -> Result<MovieRecord, StoreError> {
    let movie_id = bson_string(d.get("movie_id"))
        .ok_or_else(|| StoreError::Decode("movie document without movie_id".into()))?;
    Ok(MovieRecord {
        movie_id,
        movie_title: bson_string(d.get("movie_title")),
        year_released: bson_i64(d.get("year_released")).and_then(|y| i32::try_from(y).ok()),
        imdb_link: bson_string(d.get("imdb_link")),
        imdb_id: bson_string(d.get("imdb_id")),
        tmdb_link: bson_string(d.get("tmdb_link")),
        tmdb_id: bson_string(d.get("tmdb_id")),
        image_url: bson_string(d.get("image_url")),
        genres: bson_strings(d.get("genres")),
        production_countries: bson_strings(d.get("production_countries")),
        spoken_languages: bson_strings(d.get("spoken_languages")),
        popularity: bson_f64(d.get("popularity")),
        overview: bson_string(d.get("overview")),
        runtime: bson_i64(d.get("runtime")),
        vote_average: bson_f64(d.get("vote_average")),
        vote_count: bson_i64(d.get("vote_count")),
        release_date: bson_string(d.get("release_date")),
        original_language: bson_string(d.get("original_language")),
        last_updated: bson_datetime(d.get("last_updated")),
    })
}

/// Key presence matters here: an explicit null `tmdb_id` still counts.
pub fn snapshot_from_document(d: &Document) -> Result<MovieSnapshot, StoreError> {
    let movie_id = bson_string(d.get("movie_id"))
        .ok_or_else(|| StoreError::Decode("movie document without movie_id".into()))?;
    Ok(MovieSnapshot {
        movie_id,
        has_tmdb_key: d.contains_key("tmdb_id"),
        tmdb_id: bson_string(d.get("tmdb_id")),
        image_url: bson_string(d.get("image_url")),
        has_genres: matches!(d.get("genres"), Some(Bson::Array(_))),
        last_updated: bson_datetime(d.get("last_updated")),
    })
}

pub fn raw_rating_from_document(d: &Document) -> RawRating {
    let id = match d.get("_id") {
        Some(Bson::ObjectId(oid)) => Some(oid.to_hex()),
        Some(Bson::String(s)) => Some(s.clone()),
        Some(Bson::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };
    RawRating {
        id,
        user_id: bson_string(d.get("user_id")),
        movie_id: bson_string(d.get("movie_id")),
        rating_val: bson_i64(d.get("rating_val")).and_then(|v| i32::try_from(v).ok()),
    }
}

/// Reply of an unordered `update` command. `n` counts matched plus upserted.
pub fn parse_update_reply(reply: &Document, ops: &[&UpsertOperation]) -> BulkWriteSummary {
    let n = bson_i64(reply.get("n")).unwrap_or(0).max(0) as u64;
    let upserted = match reply.get("upserted") {
        Some(Bson::Array(a)) => a.len() as u64,
        _ => 0,
    };
    let write_errors = match reply.get("writeErrors") {
        Some(Bson::Array(errs)) => errs
            .iter()
            .filter_map(|e| e.as_document())
            .map(|e| {
                let movie_id = bson_i64(e.get("index"))
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| ops.get(i))
                    .map(|op| op.movie_id.clone())
                    .unwrap_or_default();
                WriteFailure {
                    movie_id,
                    code: bson_i64(e.get("code")).and_then(|c| i32::try_from(c).ok()),
                    message: bson_string(e.get("errmsg")).unwrap_or_default(),
                }
            })
            .collect(),
        _ => Vec::new(),
    };
    BulkWriteSummary {
        matched: n.saturating_sub(upserted),
        modified: bson_i64(reply.get("nModified")).unwrap_or(0).max(0) as u64,
        upserted,
        write_errors,
    }
}

async fn collect_ratings(cursor: mongodb::Cursor<Document>) -> Result<Vec<RawRating>, StoreError> {
    let docs: Vec<Document> = cursor.try_collect().await?;
    Ok(docs.iter().map(raw_rating_from_document).collect())
}

#[async_trait]
impl MovieStore for Db {
    async fn movie_snapshots(&self) -> Result<Vec<MovieSnapshot>, StoreError> {
        let cursor = self
            .movies()
            .find(doc! {})
            .projection(doc! {
                "_id": 0, "movie_id": 1, "tmdb_id": 1, "image_url": 1, "genres": 1, "last_updated": 1
            })
            .await?;
        let docs: Vec<Document> = cursor.try_collect().await?;
        docs.iter().map(snapshot_from_document).collect()
    }

    async fn bulk_upsert(&self, ops: &[UpsertOperation]) -> Result<BulkWriteSummary, StoreError> {
        let mut sent: Vec<&UpsertOperation> = Vec::with_capacity(ops.len());
        let mut updates: Vec<Document> = Vec::with_capacity(ops.len());
        for op in ops {
            let set = patch_to_set_document(&op.patch);
            if set.is_empty() {
                continue;
            }
            updates.push(doc! {
                "q": { "movie_id": op.movie_id.as_str() },
                "u": { "$set": set },
                "upsert": op.upsert,
            });
            sent.push(op);
        }
        if updates.is_empty() {
            return Ok(BulkWriteSummary::default());
        }

        let reply = self
            .database
            .run_command(doc! { "update": MOVIES, "updates": updates, "ordered": false })
            .await?;
        let summary = parse_update_reply(&reply, &sent);
        debug!(ops = sent.len(), written = summary.written(), "movies update command");
        Ok(summary)
    }

    async fn movies_by_ids(&self, ids: &[String]) -> Result<Vec<MovieRecord>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let cursor = self
            .movies()
            .find(doc! { "movie_id": { "$in": ids.to_vec() } })
            .await?;
        let docs: Vec<Document> = cursor.try_collect().await?;
        docs.iter().map(movie_from_document).collect()
    }
}

#[async_trait]
impl RatingStore for Db {
    async fn random_sample(&self, size: usize, max_time: Duration) -> Result<Vec<RawRating>, StoreError> {
        let cursor = self
            .ratings()
            .aggregate([doc! { "$sample": { "size": size as i64 } }])
            .max_time(max_time)
            .allow_disk_use(true)
            .await?;
        collect_ratings(cursor).await
    }

    async fn estimated_count(&self) -> Result<u64, StoreError> {
        Ok(self.ratings().estimated_document_count().await?)
    }

    async fn exact_count(&self) -> Result<u64, StoreError> {
        Ok(self.ratings().count_documents(doc! {}).await?)
    }

    async fn page(&self, skip: u64, limit: usize) -> Result<Vec<RawRating>, StoreError> {
        let cursor = self
            .ratings()
            .find(doc! {})
            .skip(skip)
            .limit(limit as i64)
            .await?;
        collect_ratings(cursor).await
    }

    async fn band_page(
        &self,
        band: &ValueBand,
        limit: usize,
        max_time: Duration,
    ) -> Result<Vec<RawRating>, StoreError> {
        let mut range = doc! { "$gte": band.lower };
        if let Some(upper) = band.upper {
            range.insert("$lt", upper);
        }
        let mut filter = Document::new();
        filter.insert(band.field.as_str(), range);
        let cursor = self
            .ratings()
            .aggregate([doc! { "$match": filter }, doc! { "$limit": limit as i64 }])
            .max_time(max_time)
            .await?;
        collect_ratings(cursor).await
    }

    async fn review_counts(&self, min_count: u64) -> Result<Vec<ReviewCount>, StoreError> {
        let pipeline = [
            doc! { "$group": { "_id": "$movie_id", "review_count": { "$sum": 1 } } },
            doc! { "$match": { "review_count": { "$gte": min_count as i64 } } },
        ];
        let cursor = self
            .ratings()
            .aggregate(pipeline)
            .allow_disk_use(true)
            .await?;
        let docs: Vec<Document> = cursor.try_collect().await?;
        Ok(docs
            .iter()
            .filter_map(|d| {
                Some(ReviewCount {
                    movie_id: bson_string(d.get("_id"))?,
                    count: bson_i64(d.get("review_count"))?.max(0) as u64,
                })
            })
            .collect())
    }
}
