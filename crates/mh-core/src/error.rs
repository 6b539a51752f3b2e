//! Unified error type for the metahub service.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`].

use std::fmt;
use std::time::Duration;

/// Unified error type covering all failure modes in metahub.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The lookup key could not be normalized into a valid identifier.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "record", "provider").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The resolution deadline elapsed before any usable data arrived.
    #[error("Timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Every upstream provider failed.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The persistent store failed or is unavailable.
    #[error("Store error: {source}")]
    Store {
        /// The underlying store error.
        source: Box<dyn std::error::Error + Send + Sync>,
        /// Whether retrying the same request later may succeed.
        retryable: bool,
    },

    /// The caller is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Request or configuration data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidKey(_) => 400,
            Error::NotFound { .. } => 404,
            Error::Timeout(_) => 504,
            Error::Upstream(_) => 502,
            Error::Store { retryable: true, .. } => 503,
            Error::Store { .. } => 500,
            Error::Unauthorized(_) => 401,
            Error::Validation(_) => 400,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code for API bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidKey(_) => "invalid_key",
            Error::NotFound { .. } => "not_found",
            Error::Timeout(_) => "timeout",
            Error::Upstream(_) => "upstream_error",
            Error::Store { .. } => "store_error",
            Error::Unauthorized(_) => "unauthorized",
            Error::Validation(_) => "validation_error",
            Error::Io { .. } => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Whether a caller may retry the same request with a fresh attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Upstream(_) | Error::Store { retryable: true, .. }
        )
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// A non-retryable store failure (bad SQL, corrupt row, constraint).
    pub fn store(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Store {
            source: source.into(),
            retryable: false,
        }
    }

    /// A retryable store failure (pool exhausted, connection refused).
    pub fn store_unavailable(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Store {
            source: source.into(),
            retryable: true,
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
