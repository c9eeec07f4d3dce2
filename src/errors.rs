use crate::orderbook::Side;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unexpected data from exchange: {0}")]
    UnexpectedData(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookError {
    /// The side gained or lost levels while a view was being sorted, twice in a row.
    #[error("concurrent modification detected on {side} side (version {expected} -> {found})")]
    ConcurrentModification { side: Side, expected: u64, found: u64 },

    #[error("snapshot cannot be merged: {0}")]
    InvalidSnapshot(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Book(#[from] BookError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}
