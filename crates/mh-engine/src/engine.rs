//! The aggregation engine.
//!
//! [`Engine::resolve`] answers one lookup: it serves a fresh stored record
//! when it can, and otherwise fans out to every provider concurrently, merges
//! whatever usable results arrive before the deadline, persists the merged
//! record, and returns it. Concurrent lookups of the same key share a single
//! resolution (see [`crate::inflight`]).

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use mh_core::config::EngineConfig;
use mh_core::{CanonicalRecord, Error, LookupKey, ProviderId, ProviderResult, Result};
use mh_db::RecordStore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::inflight::{InflightRegistry, Joined, Publisher};
use crate::merge;
use crate::outcome::{Origin, ProviderFailure, Resolution, ResolutionOutcome, ResolveError};
use crate::provider::{ProviderError, ProviderErrorKind};
use crate::registry::ProviderSet;

/// Extra time callers wait past the deadline for the merged result.
const PUBLISH_SLACK: Duration = Duration::from_millis(250);

/// How far past the deadline the store write may delay publication.
const UPSERT_SLACK: Duration = Duration::from_millis(150);

type FetchOutput = (ProviderId, std::result::Result<ProviderResult, ProviderError>);

/// Per-call options for [`Engine::resolve`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Caller's deadline; capped at the engine's default.
    pub timeout: Option<Duration>,
    /// Skip the cache and always consult providers.
    pub refresh: bool,
}

/// Coordinates cache, providers, and store. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn RecordStore>,
    providers: ProviderSet,
    config: EngineConfig,
    inflight: Arc<InflightRegistry>,
}

impl Engine {
    pub fn new(store: Arc<dyn RecordStore>, providers: ProviderSet, config: EngineConfig) -> Self {
        let inflight = InflightRegistry::new(config.cancel_on_disconnect);
        Self {
            inner: Arc::new(Inner {
                store,
                providers,
                config,
                inflight,
            }),
        }
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.inner.providers
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.inner.store
    }

    /// The deadline applied when a caller gives none, and the cap on any
    /// caller-supplied deadline.
    pub fn default_timeout(&self) -> Duration {
        self.inner.config.request_timeout()
    }

    /// Number of resolutions currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.inflight.len()
    }

    /// Whether the store is usable.
    pub async fn ready(&self) -> bool {
        let store = self.inner.store.clone();
        tokio::task::spawn_blocking(move || store.ready())
            .await
            .unwrap_or(false)
    }

    /// Provision the schema when `enabled`, then insist the store is ready.
    /// Disabled is a no-op.
    pub async fn auto_migrate(&self, enabled: bool) -> Result<()> {
        if !enabled {
            debug!("Automatic migration disabled");
            return Ok(());
        }
        let store = self.inner.store.clone();
        tokio::task::spawn_blocking(move || store.migrate())
            .await
            .map_err(|e| Error::Internal(format!("migration task failed: {e}")))??;

        if !self.ready().await {
            return Err(Error::store_unavailable("store not ready after migration"));
        }
        info!("Store schema is current");
        Ok(())
    }

    /// Stored records, newest first, plus the total count.
    pub async fn list_records(&self, offset: u64, limit: u64) -> Result<(Vec<CanonicalRecord>, u64)> {
        let store = self.inner.store.clone();
        tokio::task::spawn_blocking(move || -> Result<(Vec<CanonicalRecord>, u64)> {
            let total = store.count()?;
            let records = store.list(offset, limit)?;
            Ok((records, total))
        })
        .await
        .map_err(|e| Error::Internal(format!("store task failed: {e}")))?
    }

    /// Resolve `raw_key` to a canonical record.
    pub async fn resolve(&self, raw_key: &str, opts: ResolveOptions) -> ResolutionOutcome {
        let key = LookupKey::parse(raw_key).map_err(|e| match e {
            Error::InvalidKey(msg) => ResolveError::InvalidKey(msg),
            other => ResolveError::InvalidKey(other.to_string()),
        })?;

        let default = self.default_timeout();
        let budget = opts.timeout.map_or(default, |t| t.min(default));
        let started = Instant::now();
        let deadline = started + budget;

        let mut waiter = match self.inner.inflight.join(&key) {
            Joined::Leader(publisher, waiter) => {
                debug!(key = %key, providers = self.inner.providers.len(), "Starting resolution");
                tokio::spawn(run_resolution(
                    self.inner.clone(),
                    key.clone(),
                    deadline,
                    budget,
                    opts.refresh,
                    publisher,
                ));
                waiter
            }
            Joined::Follower(waiter) => {
                debug!(key = %key, "Attached to running resolution");
                waiter
            }
        };

        let outcome = waiter
            .wait_until(deadline + PUBLISH_SLACK)
            .await
            .unwrap_or(Err(ResolveError::Timeout(budget)));

        match &outcome {
            Ok(res) => info!(
                key = %key,
                sources = res.record.sources.len(),
                missing = res.missing.len(),
                persisted = res.persisted,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Resolved record"
            ),
            Err(e) => info!(
                key = %key,
                error = %e,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Resolution failed"
            ),
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Resolution task
// ---------------------------------------------------------------------------

/// What has come back from the providers so far.
struct Collected {
    results: Vec<ProviderResult>,
    failures: Vec<ProviderFailure>,
    pending: BTreeSet<ProviderId>,
}

impl Collected {
    fn new(providers: &ProviderSet) -> Self {
        Self {
            results: Vec::new(),
            failures: Vec::new(),
            pending: providers.iter().map(|e| e.id().clone()).collect(),
        }
    }

    fn absorb(&mut self, key: &LookupKey, (provider, res): FetchOutput) {
        self.pending.remove(&provider);
        match res.and_then(|r| merge::validate(key, &r).map(|()| r)) {
            Ok(result) => {
                debug!(key = %key, provider = %provider, fields = result.fields.len(), "Provider answered");
                self.results.push(result);
            }
            Err(e) => {
                debug!(key = %key, provider = %provider, kind = %e.kind, error = %e.message, "Provider failed");
                self.failures.push(ProviderFailure::new(provider, e));
            }
        }
    }

    /// Failures plus anything still outstanding, which counts as timed out.
    fn missing(&self) -> Vec<ProviderFailure> {
        let mut missing = self.failures.clone();
        missing.extend(self.pending.iter().map(|p| {
            ProviderFailure::new(p.clone(), ProviderError::timeout("no answer before the deadline"))
        }));
        missing.sort_by(|a, b| a.provider.cmp(&b.provider));
        missing
    }
}

fn spawn_fetches(
    providers: &ProviderSet,
    key: &LookupKey,
    hard_stop: Instant,
) -> JoinSet<FetchOutput> {
    let mut tasks = JoinSet::new();
    for entry in providers.iter() {
        let provider = entry.provider().clone();
        let weight = entry.weight();
        let key = key.clone();
        tasks.spawn(async move {
            let id = provider.id().clone();
            // Providers may run until the hard stop; results after `deadline`
            // only feed the backfill.
            let fetch = AssertUnwindSafe(provider.fetch(&key, hard_stop)).catch_unwind();
            let res = match tokio::time::timeout_at(hard_stop, fetch).await {
                Ok(Ok(res)) => res,
                Ok(Err(_)) => Err(ProviderError::upstream("provider panicked")),
                Err(_) => Err(ProviderError::timeout("no answer within the grace period")),
            };
            let res = res.map(|mut r| {
                r.provider = id.clone();
                r.weight = weight;
                r
            });
            (id, res)
        });
    }
    tasks
}

/// A stored record young enough to serve, if any. Store failures and
/// slow reads count as misses.
async fn cached(inner: &Inner, key: &LookupKey, deadline: Instant) -> Option<CanonicalRecord> {
    let staleness = inner.config.staleness();
    if staleness.is_zero() {
        return None;
    }

    let store = inner.store.clone();
    let k = key.clone();
    let read = tokio::task::spawn_blocking(move || store.get(&k));
    let record = match tokio::time::timeout_at(deadline, read).await {
        Ok(Ok(Ok(record))) => record?,
        Ok(Ok(Err(e))) => {
            warn!(key = %key, error = %e, "Store read failed; treating as cache miss");
            return None;
        }
        Ok(Err(e)) => {
            warn!(key = %key, error = %e, "Store read task failed; treating as cache miss");
            return None;
        }
        Err(_) => {
            warn!(key = %key, "Store read exceeded the deadline; treating as cache miss");
            return None;
        }
    };

    let max_age = chrono::Duration::from_std(staleness).unwrap_or(chrono::Duration::MAX);
    if record.age(chrono::Utc::now()) < max_age {
        Some(record)
    } else {
        debug!(key = %key, updated_at = %record.updated_at, "Cached record is stale");
        None
    }
}

/// Leader side of a resolution. The cache is consulted here, after the
/// key is registered, so a caller that arrives just as an earlier
/// resolution finishes reads that resolution's record instead of fetching
/// again.
async fn run_resolution(
    inner: Arc<Inner>,
    key: LookupKey,
    deadline: Instant,
    budget: Duration,
    refresh: bool,
    publisher: Publisher,
) {
    if !refresh {
        if let Some(record) = cached(&inner, &key, deadline).await {
            debug!(key = %key, "Serving cached record");
            publisher.publish(Ok(Resolution::cached(record)));
            return;
        }
    }

    let cancel = publisher.cancelled();
    let hard_stop = deadline + inner.config.late_grace();
    let mut tasks = spawn_fetches(&inner.providers, &key, hard_stop);
    let mut collected = Collected::new(&inner.providers);

    let expiry = tokio::time::sleep_until(deadline);
    tokio::pin!(expiry);
    let mut timed_out = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tasks.abort_all();
                debug!(key = %key, "Resolution cancelled");
                return;
            }
            joined = tasks.join_next() => match joined {
                Some(Ok(output)) => collected.absorb(&key, output),
                Some(Err(e)) => warn!(key = %key, error = %e, "Provider task failed"),
                None => break,
            },
            _ = &mut expiry => {
                timed_out = true;
                break;
            }
        }
    }

    let missing = collected.missing();
    let outcome = match merge::merge(&key, &collected.results) {
        Some(record) => {
            let persisted = persist(inner.store.clone(), record.clone(), deadline + UPSERT_SLACK).await;
            Ok(Resolution {
                record,
                origin: Origin::Providers,
                missing,
                persisted,
            })
        }
        None => Err(classify_failure(&key, budget, timed_out, missing)),
    };
    publisher.publish(outcome);

    if tasks.is_empty() {
        return;
    }
    if inner.config.backfill_late_results {
        backfill(inner.store.clone(), key, tasks, collected).await;
    } else {
        tasks.detach_all();
    }
}

/// Pick the error for a resolution that produced no usable result.
///
/// A provider that gave up at the deadline itself counts the same as one
/// still outstanding when collection stopped.
fn classify_failure(
    key: &LookupKey,
    budget: Duration,
    timed_out: bool,
    failures: Vec<ProviderFailure>,
) -> ResolveError {
    if timed_out || failures.iter().any(|f| f.kind == ProviderErrorKind::Timeout) {
        ResolveError::Timeout(budget)
    } else if !failures.is_empty()
        && failures.iter().all(|f| f.kind == ProviderErrorKind::NotFound)
    {
        ResolveError::NotFound(key.clone())
    } else {
        ResolveError::Upstream {
            key: key.clone(),
            failures,
        }
    }
}

/// Best-effort upsert. Publication never waits past `until`; a write still
/// running then completes in the background.
async fn persist(store: Arc<dyn RecordStore>, record: CanonicalRecord, until: Instant) -> bool {
    let key = record.key.clone();
    let write = tokio::task::spawn_blocking(move || store.upsert(&record));
    match tokio::time::timeout_at(until, write).await {
        Ok(Ok(Ok(changed))) => {
            debug!(key = %key, changed, "Record persisted");
            true
        }
        Ok(Ok(Err(e))) => {
            warn!(key = %key, error = %e, retryable = e.is_retryable(), "Failed to persist record");
            false
        }
        Ok(Err(e)) => {
            warn!(key = %key, error = %e, "Persist task failed");
            false
        }
        Err(_) => {
            warn!(key = %key, "Store write still running at the deadline");
            false
        }
    }
}

/// Drain providers that missed the deadline and persist a re-merged record
/// if any of them produced something usable.
async fn backfill(
    store: Arc<dyn RecordStore>,
    key: LookupKey,
    mut tasks: JoinSet<FetchOutput>,
    mut collected: Collected,
) {
    let before = collected.results.len();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(output) => collected.absorb(&key, output),
            Err(e) => warn!(key = %key, error = %e, "Provider task failed"),
        }
    }
    if collected.results.len() == before {
        debug!(key = %key, "No late results to backfill");
        return;
    }

    let Some(record) = merge::merge(&key, &collected.results) else {
        return;
    };
    let late = collected.results.len() - before;
    match tokio::task::spawn_blocking(move || store.upsert(&record)).await {
        Ok(Ok(_)) => info!(key = %key, late, "Backfilled late provider results"),
        Ok(Err(e)) => warn!(key = %key, error = %e, "Failed to persist late provider results"),
        Err(e) => warn!(key = %key, error = %e, "Backfill task failed"),
    }
}
