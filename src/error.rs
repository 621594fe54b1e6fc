use thiserror::Error;

/// Failure while reading one source document.
///
/// These never escape the fetcher: they are logged, retried according to
/// [`RetryPolicy`](crate::fetcher::RetryPolicy) and the source is skipped.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Permanent errors are skipped without spending the remaining attempts.
    pub fn is_permanent(&self) -> bool {
        matches!(self, SourceError::Unauthorized(_) | SourceError::NotFound(_))
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, SourceError::RateLimited(_))
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Transport(String),
    #[error("model returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unexpected model response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache file io: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache file unreadable: {0}")]
    Load(#[from] LoadError),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("file is empty")]
    Empty,
    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),
    #[error("file has no extension")]
    MissingExtension,
    #[error("invalid utf-8 in csv: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("excel: {0}")]
    Excel(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SHEET_IDS is not set or lists no sheet ids")]
    NoSources,
    #[error("no sheet credentials: set GOOGLE_CREDS_JSON or GOOGLE_SHEETS_API_KEY")]
    MissingCredentials,
    #[error("GOOGLE_CREDS_JSON is not a valid service account key: {0}")]
    InvalidCredentials(String),
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("CACHE_MODE must be `memory` or `file`, got {0:?}")]
    InvalidCacheMode(String),
}
