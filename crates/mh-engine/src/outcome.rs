//! What a resolution hands back to its callers.

use std::time::Duration;

use mh_core::{CanonicalRecord, LookupKey, ProviderId};
use serde::Serialize;

use crate::provider::{ProviderError, ProviderErrorKind};

/// Where the returned record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// A sufficiently fresh stored record; no provider was contacted.
    Cache,
    /// Merged from provider results fetched for this resolution.
    Providers,
}

/// A provider that contributed nothing to a resolution, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderFailure {
    pub fn new(provider: ProviderId, err: ProviderError) -> Self {
        Self {
            provider,
            kind: err.kind,
            message: err.message,
        }
    }
}

/// A successful resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub record: CanonicalRecord,
    pub origin: Origin,
    /// Providers that did not contribute (failed, not found, or late).
    pub missing: Vec<ProviderFailure>,
    /// Whether the merged record reached the store. Always true for cache hits.
    pub persisted: bool,
}

impl Resolution {
    pub(crate) fn cached(record: CanonicalRecord) -> Self {
        Self {
            record,
            origin: Origin::Cache,
            missing: Vec::new(),
            persisted: true,
        }
    }

    /// True when some configured provider did not contribute.
    pub fn is_partial(&self) -> bool {
        !self.missing.is_empty()
    }
}

/// Why a resolution produced no record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Every provider answered, and all of them said not-found.
    #[error("no provider has a record for {0}")]
    NotFound(LookupKey),

    /// The deadline elapsed with no usable result.
    #[error("no usable result within {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Providers failed (or none are configured).
    #[error("{}", upstream_message(.key, .failures))]
    Upstream {
        key: LookupKey,
        failures: Vec<ProviderFailure>,
    },

    /// The resolution task ended without publishing an outcome.
    #[error("resolution aborted: {0}")]
    Aborted(String),
}

fn upstream_message(key: &LookupKey, failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return format!("no providers available to resolve {key}");
    }
    let detail = failures
        .iter()
        .map(|f| format!("{}: {}", f.provider, f.kind))
        .collect::<Vec<_>>()
        .join(", ");
    format!("all providers failed for {key} ({detail})")
}

/// The value shared by every caller attached to one resolution.
pub type ResolutionOutcome = Result<Resolution, ResolveError>;

impl From<ResolveError> for mh_core::Error {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::InvalidKey(msg) => mh_core::Error::InvalidKey(msg),
            ResolveError::NotFound(key) => mh_core::Error::not_found("record", key.as_str()),
            ResolveError::Timeout(d) => mh_core::Error::Timeout(d),
            e @ ResolveError::Upstream { .. } => mh_core::Error::Upstream(e.to_string()),
            ResolveError::Aborted(msg) => mh_core::Error::Internal(msg),
        }
    }
}
