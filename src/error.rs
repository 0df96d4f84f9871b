use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Local cache failures. Never fatal to a resolution.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("The movie cache at {path:?} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("The movie cache at {path:?} could not be read: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("A movie without a title cannot be cached")]
    Untitled,

    #[error("The movie cache could not be saved to {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Opaque page-fetch failure; network errors and blocked responses look the same.
#[derive(Debug, Error)]
#[error("Fetching {url} failed: {reason}")]
pub struct FetchError {
    pub url: String,
    pub reason: String,
}

impl FetchError {
    pub fn new(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("The movie search is unavailable: {0}")]
    Unavailable(String),
}

impl From<FetchError> for SearchError {
    fn from(e: FetchError) -> Self {
        SearchError::Unavailable(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("The movie page was empty.")]
    EmptyPage,

    #[error("The fetched page is not a movie details page.")]
    NotADetailPage,

    #[error("No title could be found on the movie page.")]
    MissingTitle,
}

/// Stable classification of a failed resolution, for UIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    EmptyQuery,
    NotFound,
    SearchUnavailable,
    FetchFailed,
    ExtractionFailed,
    Cancelled,
}

/// Terminal error state of a resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Please enter a movie name.")]
    EmptyQuery,

    #[error("No movies matched \"{query}\".")]
    NotFound { query: String },

    #[error(transparent)]
    SearchUnavailable(#[from] SearchError),

    #[error(transparent)]
    FetchFailed(#[from] FetchError),

    #[error(transparent)]
    ExtractionFailed(#[from] ExtractionError),

    #[error("The movie selection was cancelled.")]
    Cancelled,
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::EmptyQuery => ErrorKind::EmptyQuery,
            ResolveError::NotFound { .. } => ErrorKind::NotFound,
            ResolveError::SearchUnavailable(_) => ErrorKind::SearchUnavailable,
            ResolveError::FetchFailed(_) => ErrorKind::FetchFailed,
            ResolveError::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            ResolveError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
