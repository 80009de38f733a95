use thiserror::Error;

pub use feed_protocol::DecodeError;

/// Why a paged read did not produce a page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("malformed page body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("page source failed: {0}")]
    Source(String),
}

/// Connection-level failures of the push transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("transport closed")]
    Closed,
    #[error("failed to encode control frame: {0}")]
    Encode(#[from] serde_json::Error),
}
