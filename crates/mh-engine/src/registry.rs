//! The ordered, immutable set of providers the engine fans out to.
//!
//! A [`ProviderSet`] is built once at startup and shared by every resolution.
//! Provider ids are unique within a set; the effective merge weight of each
//! provider is fixed at construction (its own default, or a configured
//! override).

use std::sync::Arc;

use mh_core::config::ProviderConfig;
use mh_core::{Error, ProviderId, Result};
use serde::Serialize;

use crate::http_provider::HttpProvider;
use crate::provider::Provider;

/// One provider plus the weight the engine stamps on its results.
#[derive(Clone)]
pub struct ProviderEntry {
    provider: Arc<dyn Provider>,
    weight: i32,
}

impl ProviderEntry {
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn id(&self) -> &ProviderId {
        self.provider.id()
    }

    pub fn weight(&self) -> i32 {
        self.weight
    }
}

/// Public description of a configured provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub id: ProviderId,
    pub weight: i32,
}

/// Ordered, immutable provider list. Cheap to clone.
///
/// # Examples
///
/// ```rust,ignore
/// let set = ProviderSet::new(vec![Arc::new(alpha), Arc::new(beta)])?;
/// assert_eq!(set.len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct ProviderSet {
    entries: Arc<[ProviderEntry]>,
}

impl ProviderSet {
    /// An empty set. Every uncached lookup against it fails upstream.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a set using each provider's own default weight.
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Result<Self> {
        Self::with_weights(
            providers
                .into_iter()
                .map(|p| {
                    let w = p.weight();
                    (p, w)
                })
                .collect(),
        )
    }

    /// Build a set with explicit weights. Duplicate ids are rejected.
    pub fn with_weights(providers: Vec<(Arc<dyn Provider>, i32)>) -> Result<Self> {
        let mut entries: Vec<ProviderEntry> = Vec::with_capacity(providers.len());
        for (provider, weight) in providers {
            if entries.iter().any(|e| e.id() == provider.id()) {
                return Err(Error::Validation(format!(
                    "duplicate provider id '{}'",
                    provider.id()
                )));
            }
            entries.push(ProviderEntry { provider, weight });
        }
        Ok(Self {
            entries: entries.into(),
        })
    }

    /// Build HTTP providers for every enabled entry in `configs`.
    pub fn from_config(configs: &[ProviderConfig]) -> Result<Self> {
        let mut providers: Vec<(Arc<dyn Provider>, i32)> = Vec::new();
        for cfg in configs.iter().filter(|c| c.enabled) {
            let provider = HttpProvider::from_config(cfg)?;
            tracing::info!(
                provider = %provider.id(),
                weight = cfg.weight,
                "Registered HTTP provider"
            );
            providers.push((Arc::new(provider), cfg.weight));
        }
        Self::with_weights(providers)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderEntry> {
        self.entries.iter()
    }

    /// Look up a provider by id.
    pub fn get(&self, id: &ProviderId) -> Option<&ProviderEntry> {
        self.entries.iter().find(|e| e.id() == id)
    }

    /// Ids and weights in registration order.
    pub fn describe(&self) -> Vec<ProviderInfo> {
        self.entries
            .iter()
            .map(|e| ProviderInfo {
                id: e.id().clone(),
                weight: e.weight,
            })
            .collect()
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.describe()).finish()
    }
}
