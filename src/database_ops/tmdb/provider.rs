use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::database_ops::models::{FetchTask, FieldUpdate, MoviePatch, SourceKind};
use crate::database_ops::sources::{is_retryable, FetchError, SourceAdapter};

pub const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";

/// Statuses whose body must not be read as movie details.
fn is_rejected(status: StatusCode) -> bool {
    is_retryable(status) || matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
}

/// TMDb movie details, keyed by the TMDb id recorded on the film page.
///
/// Only `GET /movie/{id}` is used; the static key goes in the `api_key`
/// query parameter.
#[derive(Debug, Clone)]
pub struct TmdbProvider {
    base_url: String,
    http: Client,
    api_key: String,
}

impl TmdbProvider {
    pub fn new(http: Client, api_key: String, base_url: Option<&str>) -> Self {
        let base_url = base_url
            .unwrap_or(DEFAULT_TMDB_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        Self {
            base_url,
            http,
            api_key,
        }
    }

    fn movie_url(&self, tmdb_id: &str) -> String {
        format!("{}/movie/{}", self.base_url, tmdb_id)
    }

    pub async fn movie_details(&self, tmdb_id: &str) -> Result<Value, FetchError> {
        let url = self.movie_url(tmdb_id);
        let resp = self
            .http
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if is_rejected(status) {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }
        let body = resp.text().await?;
        // A 404 body still parses; it simply carries none of the fields.
        serde_json::from_str(&body).map_err(|e| FetchError::Decode(format!("{url}: {e}")))
    }
}

fn name_list(v: &Value, key: &str) -> Vec<String> {
    let Some(arr) = v.get(key).and_then(|x| x.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|item| item.get("name").and_then(|n| n.as_str()))
        .map(|s| s.to_string())
        .collect()
}

fn value_as_f64(v: Option<&Value>) -> Option<f64> {
    let v = v?;
    v.as_f64().or_else(|| v.as_i64().map(|n| n as f64))
}

fn value_as_string(v: Option<&Value>) -> Option<String> {
    v.and_then(|x| x.as_str()).map(|s| s.to_string())
}

/// Map a details response onto the enrichment fields. Absent lists become
/// empty, absent scalars become null.
pub fn parse_enrichment(v: &Value, movie_id: &str, now: DateTime<Utc>) -> MoviePatch {
    let mut patch = MoviePatch::stamped(movie_id, now);
    patch.genres = FieldUpdate::Set(name_list(v, "genres"));
    patch.production_countries = FieldUpdate::Set(name_list(v, "production_countries"));
    patch.spoken_languages = FieldUpdate::Set(name_list(v, "spoken_languages"));

    patch.popularity = FieldUpdate::from_option(value_as_f64(v.get("popularity")));
    patch.overview = FieldUpdate::from_option(value_as_string(v.get("overview")));
    patch.runtime = FieldUpdate::from_option(v.get("runtime").and_then(|x| x.as_i64()));
    patch.vote_average = FieldUpdate::from_option(value_as_f64(v.get("vote_average")));
    patch.vote_count = FieldUpdate::from_option(v.get("vote_count").and_then(|x| x.as_i64()));
    patch.release_date = FieldUpdate::from_option(value_as_string(v.get("release_date")));
    patch.original_language = FieldUpdate::from_option(value_as_string(v.get("original_language")));
    patch
}

#[async_trait]
impl SourceAdapter for TmdbProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::Enrichment
    }

    async fn fetch(&self, task: &FetchTask) -> Result<MoviePatch, FetchError> {
        let tmdb_id = task
            .tmdb_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| FetchError::MissingContext {
                movie_id: task.movie_id.clone(),
                what: "tmdb_id",
            })?;
        let body = self.movie_details(tmdb_id).await?;
        debug!(movie_id = %task.movie_id, tmdb_id, "tmdb details fetched");
        Ok(parse_enrichment(&body, &task.movie_id, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_names_and_scalars() {
        let body = json!({
            "id": 949,
            "genres": [{"id": 28, "name": "Action"}, {"id": 80, "name": "Crime"}],
            "production_countries": [{"iso_3166_1": "US", "name": "United States of America"}],
            "spoken_languages": [{"iso_639_1": "en", "name": "English"}, {"iso_639_1": "es", "name": "Español"}],
            "popularity": 45.2,
            "overview": "Obsessive master thief Neil McCauley...",
            "runtime": 170,
            "vote_average": 7.9,
            "vote_count": 7000,
            "release_date": "1995-12-15",
            "original_language": "en"
        });
        let now = Utc::now();
        let patch = parse_enrichment(&body, "heat", now);
        assert_eq!(
            patch.genres,
            FieldUpdate::Set(vec!["Action".to_string(), "Crime".to_string()])
        );
        assert_eq!(patch.spoken_languages.value().map(Vec::len), Some(2));
        assert_eq!(patch.runtime, FieldUpdate::Set(170));
        assert_eq!(patch.vote_count, FieldUpdate::Set(7000));
        assert_eq!(patch.release_date, FieldUpdate::Set("1995-12-15".into()));
        assert!(patch.movie_title.is_keep());
        assert!(patch.image_url.is_keep());
    }

    #[test]
    fn absent_fields_map_to_empty_and_null() {
        let body = json!({"status_code": 34, "status_message": "not found"});
        let patch = parse_enrichment(&body, "ghost", Utc::now());
        assert_eq!(patch.genres, FieldUpdate::Set(Vec::new()));
        assert_eq!(patch.production_countries, FieldUpdate::Set(Vec::new()));
        assert_eq!(patch.popularity, FieldUpdate::Clear);
        assert_eq!(patch.overview, FieldUpdate::Clear);
        assert_eq!(patch.original_language, FieldUpdate::Clear);
    }

    #[test]
    fn integer_popularity_is_accepted() {
        let patch = parse_enrichment(&json!({"popularity": 12}), "m", Utc::now());
        assert_eq!(patch.popularity, FieldUpdate::Set(12.0));
    }

    #[test]
    fn credential_and_server_errors_are_not_parsed() {
        assert!(is_rejected(StatusCode::UNAUTHORIZED));
        assert!(is_rejected(StatusCode::FORBIDDEN));
        assert!(is_rejected(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_rejected(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_rejected(StatusCode::NOT_FOUND));
        assert!(!is_rejected(StatusCode::OK));
    }

    #[tokio::test]
    async fn missing_tmdb_id_is_reported_without_a_request() {
        let provider = TmdbProvider::new(Client::new(), "key".into(), Some("http://127.0.0.1:9"));
        let task = FetchTask::new("orphan", SourceKind::Enrichment);
        match provider.fetch(&task).await {
            Err(FetchError::MissingContext { movie_id, what }) => {
                assert_eq!(movie_id, "orphan");
                assert_eq!(what, "tmdb_id");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
