//! Unified error types for restyler.

use tokio_rusqlite::rusqlite;

/// Unified error types for the style pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A source URL failed canonicalization.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// A fetch attempt exceeded its timeout.
    #[error("FETCH_TIMEOUT: {0}")]
    Timeout(String),

    /// Transport-level network failure (DNS, TLS, connection reset).
    #[error("NETWORK: {0}")]
    Network(String),

    /// The origin answered with a non-success status.
    #[error("HTTP_STATUS: {0}")]
    HttpStatus(u16),

    /// The body does not look like a stylesheet.
    #[error("CONTENT_INVALID: {0}")]
    ContentInvalid(String),

    /// Every source x transport combination failed across all retry passes.
    #[error("FETCH_EXHAUSTED: {attempts} attempts over {passes} passes")]
    FetchExhausted { attempts: usize, passes: u32 },

    /// No injection technique could be verified.
    #[error("INJECTION_FAILED: {0}")]
    InjectionFailed(String),

    /// The style target refused an operation (page gone, eval error).
    #[error("TARGET: {0}")]
    Target(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),
}

impl Error {
    /// Whether this error is recoverable at the attempt level: the fetcher
    /// logs it and moves on to the next source or transport. Everything else
    /// surfaces past the attempt loop.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Network(_) | Error::HttpStatus(_) | Error::ContentInvalid(_)
        )
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
