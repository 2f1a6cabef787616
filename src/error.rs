use reqwest::StatusCode;
use thiserror::Error;

/// Failures of the tracking core.
#[derive(Error, Debug)]
pub enum Error {
    /// The listing URL matches neither the product nor the wishlist shape,
    /// or its domain is not one of the supported sites.
    #[error("invalid listing url: {0}")]
    InvalidUrl(String),

    /// A single attempt was answered with "too many requests".
    #[error("rate limited (status {status})")]
    RateLimited { status: StatusCode },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Any non-success status other than 429. Never retried.
    #[error("unexpected status {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no price history found")]
    NoHistoryFound,

    /// Shutdown was requested while waiting to retry.
    #[error("cancelled")]
    Cancelled,

    #[error("still rate limited after {attempts} attempts: {url}")]
    TooManyRetries { url: String, attempts: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    /// Whether the error came from the remote side throttling us.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Error::RateLimited { .. } | Error::TooManyRetries { .. })
    }
}
