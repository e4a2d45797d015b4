use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use scraper::Html;
use std::sync::OnceLock;
use tracing::debug;

use super::{element_text, select_first, DEFAULT_BASE_URL};
use crate::database_ops::models::{FetchTask, FieldUpdate, MoviePatch, SourceKind};
use crate::database_ops::sources::{get_text, FetchError, SourceAdapter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalLink {
    pub link: String,
    /// Empty when the link exists but does not carry a recognisable ID.
    pub id: String,
}

/// What a film page yields; every field is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailFields {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub imdb: Option<ExternalLink>,
    pub tmdb: Option<ExternalLink>,
}

impl DetailFields {
    /// External links that are missing are written as empty strings so the
    /// record no longer counts as never-fetched.
    pub fn into_patch(self, movie_id: &str, now: DateTime<Utc>) -> MoviePatch {
        let mut patch = MoviePatch::stamped(movie_id, now);
        patch.movie_title = FieldUpdate::from_option(self.title);
        patch.year_released = FieldUpdate::from_option(self.year);

        let (imdb_link, imdb_id) = self.imdb.map(|l| (l.link, l.id)).unwrap_or_default();
        let (tmdb_link, tmdb_id) = self.tmdb.map(|l| (l.link, l.id)).unwrap_or_default();
        patch.imdb_link = FieldUpdate::Set(imdb_link);
        patch.imdb_id = FieldUpdate::Set(imdb_id);
        patch.tmdb_link = FieldUpdate::Set(tmdb_link);
        patch.tmdb_id = FieldUpdate::Set(tmdb_id);
        patch
    }
}

fn imdb_id_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/title/(tt\d+)").ok()).as_ref()
}

/// Movie ids only; TV ids live in a separate numbering and would enrich the
/// record with another title.
fn tmdb_id_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/movie/(\d+)").ok()).as_ref()
}

fn external_link(doc: &Html, action: &str, re: Option<&Regex>) -> Option<ExternalLink> {
    let css = format!(r#"a[data-track-action="{action}"]"#);
    let href = select_first(doc, &css)?.value().attr("href")?.trim();
    if href.is_empty() {
        return None;
    }
    let id = re
        .and_then(|re| re.captures(href))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    Some(ExternalLink {
        link: href.to_string(),
        id,
    })
}

pub fn parse_detail(html: &str) -> DetailFields {
    let doc = Html::parse_document(html);

    let title = select_first(&doc, ".film-header-group h1.filmtitle span.name")
        .or_else(|| select_first(&doc, "h1.filmtitle span.name"))
        .or_else(|| select_first(&doc, "h1.filmtitle"))
        .and_then(element_text);

    let year = select_first(&doc, ".releaseyear a")
        .or_else(|| select_first(&doc, "small.number a"))
        .and_then(element_text)
        .and_then(|t| t.parse::<i32>().ok());

    DetailFields {
        title,
        year,
        imdb: external_link(&doc, "IMDb", imdb_id_re()),
        tmdb: external_link(&doc, "TMDb", tmdb_id_re()),
    }
}

#[derive(Debug, Clone)]
pub struct DetailAdapter {
    http: Client,
    base_url: String,
}

impl DetailAdapter {
    pub fn new(http: Client, base_url: Option<&str>) -> Self {
        let base_url = base_url
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        Self { http, base_url }
    }

    fn url_for(&self, movie_id: &str) -> String {
        format!("{}/film/{}/", self.base_url, movie_id)
    }
}

#[async_trait]
impl SourceAdapter for DetailAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Detail
    }

    async fn fetch(&self, task: &FetchTask) -> Result<MoviePatch, FetchError> {
        let url = self.url_for(&task.movie_id);
        let body = get_text(&self.http, &url).await?;
        let fields = parse_detail(&body);
        debug!(movie_id = %task.movie_id, title = ?fields.title, year = ?fields.year, "detail parsed");
        Ok(fields.into_patch(&task.movie_id, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_PAGE: &str = r#"
        <html><body>
        <section class="film-header-group">
          <h1 class="headline-1 filmtitle"><span class="name">The Shawshank Redemption</span></h1>
          <div class="releaseyear"><a href="/films/year/1994/">1994</a></div>
        </section>
        <p class="text-link text-footer">
          <a href="http://www.imdb.com/title/tt0111161/maindetails" class="micro-button track-event" data-track-action="IMDb">IMDb</a>
          <a href="https://www.themoviedb.org/movie/278/" class="micro-button track-event" data-track-action="TMDb">TMDb</a>
        </p>
        </body></html>
    "#;

    #[test]
    fn parses_every_field() {
        let fields = parse_detail(FULL_PAGE);
        assert_eq!(fields.title.as_deref(), Some("The Shawshank Redemption"));
        assert_eq!(fields.year, Some(1994));
        assert_eq!(fields.imdb.as_ref().map(|l| l.id.as_str()), Some("tt0111161"));
        assert_eq!(fields.tmdb.as_ref().map(|l| l.id.as_str()), Some("278"));
    }

    #[test]
    fn missing_header_only_blanks_header_fields() {
        let page = r#"<html><body>
            <a href="https://www.themoviedb.org/movie/603/" data-track-action="TMDb">TMDb</a>
        </body></html>"#;
        let fields = parse_detail(page);
        assert_eq!(fields.title, None);
        assert_eq!(fields.year, None);
        assert_eq!(fields.imdb, None);
        assert_eq!(fields.tmdb.map(|l| l.id), Some("603".to_string()));
    }

    #[test]
    fn link_without_id_keeps_link_and_empty_id() {
        let page = r#"<a href="https://www.themoviedb.org/search?q=x" data-track-action="TMDb">TMDb</a>"#;
        let tmdb = parse_detail(page).tmdb.unwrap();
        assert_eq!(tmdb.link, "https://www.themoviedb.org/search?q=x");
        assert_eq!(tmdb.id, "");
    }

    #[test]
    fn tv_link_is_kept_without_an_id() {
        let page = r#"<a href="https://www.themoviedb.org/tv/1396/" data-track-action="TMDb">TMDb</a>"#;
        let tmdb = parse_detail(page).tmdb.unwrap();
        assert_eq!(tmdb.link, "https://www.themoviedb.org/tv/1396/");
        assert_eq!(tmdb.id, "");

        let patch = parse_detail(page).into_patch("breaking-bad", Utc::now());
        assert_eq!(patch.tmdb_id, FieldUpdate::Set(String::new()));
    }

    #[test]
    fn patch_marks_absent_values_without_touching_other_sources() {
        let now = Utc::now();
        let patch = parse_detail("<html></html>").into_patch("ghost", now);
        assert_eq!(patch.movie_title, FieldUpdate::Clear);
        assert_eq!(patch.year_released, FieldUpdate::Clear);
        assert_eq!(patch.tmdb_id, FieldUpdate::Set(String::new()));
        assert!(patch.image_url.is_keep());
        assert!(patch.genres.is_keep());
        assert_eq!(patch.last_updated, FieldUpdate::Set(now));
    }

    #[test]
    fn url_uses_trimmed_base() {
        let http = Client::new();
        let adapter = DetailAdapter::new(http, Some("http://localhost:9000/"));
        assert_eq!(adapter.url_for("heat"), "http://localhost:9000/film/heat/");
    }
}
