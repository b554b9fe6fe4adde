//! Application-wide error types.
//!
//! Library modules use specific error types via `thiserror` ([`FailoverError`],
//! [`ApiError`], [`CacheError`], [`DeviceError`], ...), while the CLI uses
//! `anyhow` for convenient error propagation. [`Error`] aggregates them for
//! code that spans subsystems.
//!
//! [`FailoverError`]: crate::failover::FailoverError
//! [`ApiError`]: crate::api::ApiError
//! [`CacheError`]: crate::cache::CacheError
//! [`DeviceError`]: crate::player::DeviceError

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Every instance failed, or the request was aborted
    #[error("Network error: {0}")]
    Failover(#[from] crate::failover::FailoverError),

    /// Catalog lookup error
    #[error("API error: {0}")]
    Api(#[from] crate::api::ApiError),

    /// Response cache error
    #[error("Cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),

    /// Audio output error
    #[error("Playback error: {0}")]
    Device(#[from] crate::player::DeviceError),

    /// Stream resolution error
    #[error("Resolve error: {0}")]
    Resolve(#[from] crate::player::ResolveError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }

    /// Whether the root cause is a user cancellation.
    pub fn is_aborted(&self) -> bool {
        match self {
            Error::Failover(e) => e.is_aborted(),
            Error::Api(e) => e.is_aborted(),
            Error::WithContext { source, .. } => source.is_aborted(),
            _ => false,
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, crate::api::ApiError> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Api(e).context(ctx))
    }
}
