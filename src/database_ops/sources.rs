use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

use super::letterboxd::{DetailAdapter, PosterAdapter};
use super::models::{FetchTask, MoviePatch, SourceKind};
use super::tmdb::TmdbProvider;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("network: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("http {status} for {url}")]
    Status { status: u16, url: String },
    #[error("decode: {0}")]
    Decode(String),
    #[error("task {movie_id} has no {what}")]
    MissingContext { movie_id: String, what: &'static str },
}

/// "Fetch partial record for ID" against one external source.
///
/// Adapters never retry; any error bubbles up so the chunk runner can retry
/// the whole chunk. Missing optional data is not an error.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;
    async fn fetch(&self, task: &FetchTask) -> Result<MoviePatch, FetchError>;
}

/// The concrete adapters, selected by `SourceKind`.
#[derive(Debug, Clone)]
pub enum Source {
    Detail(DetailAdapter),
    Poster(PosterAdapter),
    Enrichment(TmdbProvider),
}

#[async_trait]
impl SourceAdapter for Source {
    fn kind(&self) -> SourceKind {
        match self {
            Source::Detail(_) => SourceKind::Detail,
            Source::Poster(_) => SourceKind::Poster,
            Source::Enrichment(_) => SourceKind::Enrichment,
        }
    }

    async fn fetch(&self, task: &FetchTask) -> Result<MoviePatch, FetchError> {
        match self {
            Source::Detail(a) => a.fetch(task).await,
            Source::Poster(a) => a.fetch(task).await,
            Source::Enrichment(a) => a.fetch(task).await,
        }
    }
}

/// One HTTP client shared by every adapter of a run.
pub fn build_http_client(user_agent: &str, timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
}

/// Throttling and server errors are worth a retry; anything else is a page we
/// can parse (possibly into an all-empty patch).
pub(crate) fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub(crate) async fn get_text(http: &Client, url: &str) -> Result<String, FetchError> {
    let resp = http.get(url).send().await?;
    let status = resp.status();
    if is_retryable(status) {
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(resp.text().await?)
}
