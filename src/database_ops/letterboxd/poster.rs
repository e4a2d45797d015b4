use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use scraper::Html;
use tracing::debug;

use super::{normalize_image_url, select_first, DEFAULT_BASE_URL};
use crate::database_ops::models::{FetchTask, FieldUpdate, MoviePatch, SourceKind};
use crate::database_ops::sources::{get_text, FetchError, SourceAdapter};

/// Poster URL from the hero fragment, already normalized. `None` when the
/// fragment has no poster or only the placeholder.
pub fn extract_image_url(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let src = select_first(&doc, "div.film-poster img")?
        .value()
        .attr("src")?
        .to_string();
    normalize_image_url(&src)
}

/// Stamped patch for one fragment. `image_url` stays untouched when the
/// fragment has no usable poster.
pub fn poster_patch(html: &str, movie_id: &str, now: DateTime<Utc>) -> MoviePatch {
    let mut patch = MoviePatch::stamped(movie_id, now);
    match extract_image_url(html) {
        Some(image_url) => patch.image_url = FieldUpdate::Set(image_url),
        None => debug!(movie_id, "no poster in fragment"),
    }
    patch
}

#[derive(Debug, Clone)]
pub struct PosterAdapter {
    http: Client,
    base_url: String,
}

impl PosterAdapter {
    pub fn new(http: Client, base_url: Option<&str>) -> Self {
        let base_url = base_url
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        Self { http, base_url }
    }

    fn url_for(&self, movie_id: &str) -> String {
        format!("{}/ajax/poster/film/{}/hero/230x345", self.base_url, movie_id)
    }
}

#[async_trait]
impl SourceAdapter for PosterAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Poster
    }

    async fn fetch(&self, task: &FetchTask) -> Result<MoviePatch, FetchError> {
        let url = self.url_for(&task.movie_id);
        let body = get_text(&self.http, &url).await?;
        Ok(poster_patch(&body, &task.movie_id, Utc::now()))
    }
}
