//! Request coalescing for concurrent resolutions of the same key.
//!
//! The first caller for a key becomes the leader and receives a [`Publisher`];
//! everyone who arrives while that resolution is running attaches as a
//! follower. Registration and attachment happen inside one map-entry critical
//! section, so two callers can never both become leader for the same key.
//!
//! The outcome travels over a `watch` channel, which retains the published
//! value: a follower that attaches after publication but before the entry is
//! removed still observes it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mh_core::LookupKey;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::outcome::{ResolutionOutcome, ResolveError};

type Slot = Option<ResolutionOutcome>;

/// One running resolution.
pub(crate) struct Inflight {
    rx: watch::Receiver<Slot>,
    waiters: AtomicUsize,
    cancel: CancellationToken,
}

impl Inflight {
    fn is_published(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

/// Key to running-resolution map.
pub(crate) struct InflightRegistry {
    map: DashMap<LookupKey, Arc<Inflight>>,
    cancel_on_disconnect: bool,
}

/// Result of [`InflightRegistry::join`].
pub(crate) enum Joined {
    /// No resolution was running; the caller must start one.
    Leader(Publisher, Waiter),
    /// A resolution was already running; the caller only waits.
    Follower(Waiter),
}

impl InflightRegistry {
    pub fn new(cancel_on_disconnect: bool) -> Arc<Self> {
        Arc::new(Self {
            map: DashMap::new(),
            cancel_on_disconnect,
        })
    }

    /// Register as leader for `key`, or attach to the running resolution.
    pub fn join(self: &Arc<Self>, key: &LookupKey) -> Joined {
        match self.map.entry(key.clone()) {
            Entry::Occupied(e) => {
                let flight = e.get().clone();
                flight.waiters.fetch_add(1, Ordering::AcqRel);
                drop(e);
                Joined::Follower(Waiter::new(self.clone(), key.clone(), flight))
            }
            Entry::Vacant(e) => {
                let (tx, rx) = watch::channel(None);
                let flight = Arc::new(Inflight {
                    rx,
                    waiters: AtomicUsize::new(1),
                    cancel: CancellationToken::new(),
                });
                e.insert(flight.clone());
                let publisher = Publisher {
                    tx,
                    registry: self.clone(),
                    key: key.clone(),
                    flight: flight.clone(),
                };
                Joined::Leader(publisher, Waiter::new(self.clone(), key.clone(), flight))
            }
        }
    }

    /// Number of resolutions currently registered.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Remove `flight`'s entry if it is still the registered one.
    fn complete(&self, key: &LookupKey, flight: &Arc<Inflight>) {
        self.map.remove_if(key, |_, current| Arc::ptr_eq(current, flight));
    }

    /// Drop one waiter. When the last waiter left without an outcome the
    /// resolution is cancelled and unregistered.
    fn detach(&self, key: &LookupKey, flight: &Arc<Inflight>, abandoned: bool) {
        if let Entry::Occupied(e) = self.map.entry(key.clone()) {
            if Arc::ptr_eq(e.get(), flight) {
                let remaining = flight.waiters.fetch_sub(1, Ordering::AcqRel) - 1;
                if remaining == 0
                    && abandoned
                    && self.cancel_on_disconnect
                    && !flight.is_published()
                {
                    tracing::debug!(key = %key, "All callers gone; cancelling resolution");
                    flight.cancel.cancel();
                    e.remove();
                }
                return;
            }
        }
        // Already unregistered: the outcome is out, nothing to cancel.
        flight.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Held by the task that performs a resolution.
///
/// Dropping it without publishing (cancellation, panic) unregisters the
/// resolution, and attached waiters see it as aborted.
pub(crate) struct Publisher {
    tx: watch::Sender<Slot>,
    registry: Arc<InflightRegistry>,
    key: LookupKey,
    flight: Arc<Inflight>,
}

impl Publisher {
    /// Fires when every caller abandoned the resolution.
    pub fn cancelled(&self) -> CancellationToken {
        self.flight.cancel.clone()
    }

    /// Deliver `outcome` to every attached caller and unregister.
    pub fn publish(self, outcome: ResolutionOutcome) {
        self.tx.send_replace(Some(outcome));
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.registry.complete(&self.key, &self.flight);
    }
}

/// One caller's attachment to a resolution.
pub(crate) struct Waiter {
    registry: Arc<InflightRegistry>,
    key: LookupKey,
    flight: Arc<Inflight>,
    finished: bool,
}

impl Waiter {
    fn new(registry: Arc<InflightRegistry>, key: LookupKey, flight: Arc<Inflight>) -> Self {
        Self {
            registry,
            key,
            flight,
            finished: false,
        }
    }

    /// Wait for the outcome until `until`. `None` means the wait timed out.
    pub async fn wait_until(&mut self, until: Instant) -> Option<ResolutionOutcome> {
        let mut rx = self.flight.rx.clone();
        let res = tokio::time::timeout_at(until, async move {
            let slot = rx.wait_for(Option::is_some).await.map(|slot| slot.clone());
            slot
        })
        .await;
        self.finished = true;

        match res {
            Ok(Ok(Some(outcome))) => Some(outcome),
            Ok(Ok(None)) | Ok(Err(_)) => Some(Err(ResolveError::Aborted(
                "resolution ended without an outcome".into(),
            ))),
            Err(_) => None,
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.registry
            .detach(&self.key, &self.flight, !self.finished);
    }
}
