//! Error types for listwatch.
//!
//! Failures are split by where they come from so the orchestrator can apply
//! the right policy: fetch failures reject a new subscription and are
//! otherwise retried on the next cycle,
//! persistence failures are surfaced to `add`/`drop` callers, validation
//! failures reject a subscription before anything is stored, and delivery
//! failures stay at the notifier boundary: the poll cycle logs them and
//! moves on, so they never reach [`WatchError`].

use thiserror::Error;

/// A Reader could not produce the current item set.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport-level failure (connect, TLS, body read).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The upstream answered with a non-success status.
    #[error("upstream returned status {0}")]
    Status(u16),

    /// The response could not be parsed into items.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FetchError::Status(status.as_u16()),
            None => FetchError::Http(e.to_string()),
        }
    }
}

/// The backing store could not be read or written.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Redis connection or command error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored record could not be encoded or decoded.
    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// A subscription request was malformed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// The listing locator is not an absolute http(s) URL.
    #[error("invalid listing URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The slot date range ends before it starts.
    #[error("date range {start}..{end} is empty")]
    EmptyDateRange { start: String, end: String },

    /// A required query field is blank.
    #[error("{0} must not be empty")]
    MissingField(&'static str),

    /// A subscription with this id is already stored.
    #[error("subscription {0} already exists")]
    DuplicateId(String),
}

/// A notification could not be handed to the subscriber's channel.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The channel accepted the request but refused the message.
    #[error("rejected by channel: {0}")]
    Rejected(String),
}

/// Umbrella error for orchestrator operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Result type for orchestrator operations.
pub type WatchResult<T> = Result<T, WatchError>;
