//! Record types shared by the store, the engine, and the transport.
//!
//! A [`ProviderResult`] is what one provider returned for one key. The engine
//! merges a set of them into a [`CanonicalRecord`], which is the only shape the
//! store persists.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::key::{LookupKey, ProviderId};

/// Record payload: field name to JSON value, ordered by name.
pub type Fields = BTreeMap<String, Value>;

/// Well-known field names. Providers may emit others; they pass through.
pub mod field {
    pub const TITLE: &str = "title";
    pub const SUMMARY: &str = "summary";
    pub const COVER_URL: &str = "cover_url";
    pub const RELEASE_DATE: &str = "release_date";
    pub const RUNTIME_MINUTES: &str = "runtime_minutes";
    pub const MAKER: &str = "maker";
    pub const LABEL: &str = "label";
    pub const SERIES: &str = "series";
    pub const GENRES: &str = "genres";
    pub const ACTORS: &str = "actors";
    pub const SCORE: &str = "score";
    pub const HOMEPAGE: &str = "homepage";
}

/// Whether a field value carries information.
///
/// Null, blank strings, and empty arrays/objects are treated as absent so a
/// provider that "knows nothing" about a field never overrides one that does.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Truncate a timestamp to whole milliseconds (the store's resolution).
pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

// ---------------------------------------------------------------------------
// ProviderResult
// ---------------------------------------------------------------------------

/// One provider's answer for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub key: LookupKey,
    pub provider: ProviderId,
    /// Trust weight; stamped by the engine from its provider set.
    pub weight: i32,
    pub retrieved_at: DateTime<Utc>,
    pub fields: Fields,
}

impl ProviderResult {
    /// Start an empty result retrieved now, with weight 0.
    pub fn new(key: LookupKey, provider: ProviderId) -> Self {
        Self {
            key,
            provider,
            weight: 0,
            retrieved_at: truncate_millis(Utc::now()),
            fields: Fields::new(),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn retrieved_at(mut self, at: DateTime<Utc>) -> Self {
        self.retrieved_at = truncate_millis(at);
        self
    }

    /// Number of fields that carry information.
    pub fn present_fields(&self) -> usize {
        self.fields.values().filter(|v| is_present(v)).count()
    }
}

// ---------------------------------------------------------------------------
// CanonicalRecord
// ---------------------------------------------------------------------------

/// The merged, authoritative record for a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub key: LookupKey,
    pub fields: Fields,
    /// Which provider supplied each field.
    pub field_sources: BTreeMap<String, ProviderId>,
    /// Every provider whose result was merged. Never empty.
    pub sources: BTreeSet<ProviderId>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalRecord {
    /// Age relative to `now`; negative ages (clock skew) count as zero.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.updated_at).max(chrono::Duration::zero())
    }

    /// Convenience accessor for a string field.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}
