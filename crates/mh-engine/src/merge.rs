//! Deterministic field-level merge of provider results.
//!
//! Results are ranked by weight (descending), then retrieval time
//! (descending), then provider id (ascending). For every field the first
//! ranked result that carries a present value wins. Because the ranking is a
//! total order over distinct providers, the merged record does not depend on
//! the order results arrived in.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use mh_core::record::{is_present, truncate_millis};
use mh_core::{CanonicalRecord, Fields, LookupKey, ProviderResult};

use crate::provider::ProviderError;

/// Check that a result is usable for `key`.
///
/// A result for a different key, or one with no present fields, is
/// malformed and must not take part in a merge.
pub fn validate(key: &LookupKey, result: &ProviderResult) -> Result<(), ProviderError> {
    if &result.key != key {
        return Err(ProviderError::malformed(format!(
            "result is for key {} (expected {key})",
            result.key
        )));
    }
    if result.present_fields() == 0 {
        return Err(ProviderError::malformed("result carries no fields"));
    }
    Ok(())
}

/// Rank two results; `Less` means `a` takes precedence.
fn precedence(a: &ProviderResult, b: &ProviderResult) -> Ordering {
    b.weight
        .cmp(&a.weight)
        .then_with(|| b.retrieved_at.cmp(&a.retrieved_at))
        .then_with(|| a.provider.cmp(&b.provider))
        .then_with(|| fields_digest(&a.fields).cmp(&fields_digest(&b.fields)))
}

/// Stable tiebreak for two results from the same provider with equal rank.
fn fields_digest(fields: &Fields) -> String {
    serde_json::to_string(fields).unwrap_or_default()
}

/// Merge usable results for `key` into a canonical record.
///
/// Returns `None` when no usable result remains. Callers are expected to
/// [`validate`] first; anything that fails validation here is dropped.
pub fn merge(key: &LookupKey, results: &[ProviderResult]) -> Option<CanonicalRecord> {
    let mut ranked: Vec<&ProviderResult> = results
        .iter()
        .filter(|r| validate(key, r).is_ok())
        .collect();
    if ranked.is_empty() {
        return None;
    }
    ranked.sort_by(|a, b| precedence(a, b));
    // One result per provider: the best-ranked one.
    ranked.dedup_by(|later, earlier| later.provider == earlier.provider);

    let mut fields = Fields::new();
    let mut field_sources = BTreeMap::new();
    let mut sources = BTreeSet::new();

    for result in &ranked {
        sources.insert(result.provider.clone());
        for (name, value) in &result.fields {
            if !is_present(value) || fields.contains_key(name) {
                continue;
            }
            fields.insert(name.clone(), value.clone());
            field_sources.insert(name.clone(), result.provider.clone());
        }
    }

    let updated_at = ranked.iter().map(|r| r.retrieved_at).max()?;

    Some(CanonicalRecord {
        key: key.clone(),
        fields,
        field_sources,
        sources,
        updated_at: truncate_millis(updated_at),
    })
}
