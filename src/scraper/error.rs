use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the forum scraper.
///
/// Batch fetches record missing or unparseable entities and keep going.
/// Throttling, connectivity and session errors abort the batch so the
/// scheduler can back off or log in again. Single-entity calls always
/// return the error to the caller.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("invalid session file {path}: {reason}")]
    InvalidSessionFile { path: PathBuf, reason: String },

    #[error("session expired; a fresh login is required")]
    SessionExpired,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited by forum{}", retry_suffix(.retry_after))]
    RateLimited { retry_after: Option<u64> },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("failed to write session file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScrapeError {
    /// Whether a batch fetch may skip the failing entity and keep going.
    #[must_use]
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::MalformedPayload(_) | Self::UnexpectedStatus { .. }
        )
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::MalformedPayload(e.to_string());
        }
        if let Some(status) = e.status() {
            return Self::UnexpectedStatus {
                status: status.as_u16(),
                url: e.url().map(ToString::to_string).unwrap_or_default(),
            };
        }
        // Timeouts, connect failures, truncated bodies.
        Self::TransientNetwork(e.to_string())
    }
}

#[allow(clippy::ref_option)]
fn retry_suffix(retry_after: &Option<u64>) -> String {
    retry_after.map_or_else(String::new, |secs| format!(" (retry after {secs}s)"))
}

pub type ScrapeResult<T> = Result<T, ScrapeError>;
