//! Trait definition and failure types for metadata providers.
//!
//! This module defines the [`Provider`] trait that every metadata source
//! implements, along with the typed [`ProviderError`] the engine uses to tell
//! "definitively not found" apart from "could not answer".

use std::fmt;

use async_trait::async_trait;
use mh_core::{LookupKey, ProviderId, ProviderResult};
use serde::Serialize;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a provider could not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// The deadline elapsed before the provider answered.
    Timeout,
    /// The provider definitively has no record for the key.
    NotFound,
    /// Transport failure or an unexpected upstream response.
    Upstream,
    /// The provider answered, but the payload was unusable.
    Malformed,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::NotFound => write!(f, "not_found"),
            Self::Upstream => write!(f, "upstream"),
            Self::Malformed => write!(f, "malformed"),
        }
    }
}

/// A typed provider failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Upstream, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Malformed, message)
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Async trait that all metadata providers must implement.
///
/// Providers are stateless from the engine's point of view and are shared
/// across tasks behind an `Arc`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier for this provider (e.g. `"alpha"`).
    fn id(&self) -> &ProviderId;

    /// Default merge trust weight. Configuration may override it.
    fn weight(&self) -> i32 {
        0
    }

    /// Fetch metadata for `key`.
    ///
    /// Implementations must give up and return promptly once `deadline`
    /// passes. This is the engine's hard stop, which may lie past the
    /// caller's deadline: answers that arrive in between are kept for
    /// backfill rather than returned to the caller.
    async fn fetch(
        &self,
        key: &LookupKey,
        deadline: Instant,
    ) -> Result<ProviderResult, ProviderError>;
}
