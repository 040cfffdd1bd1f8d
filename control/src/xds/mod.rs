//! xDS resource caches and DAG visitors
//!
//! Each xDS sub-protocol (LDS, RDS, CDS, EDS) is backed by one
//! [`ResourceCache`] holding the latest snapshot of named resources and a
//! monotonic sequence number. Streaming consumers register a capacity-1
//! resumption token and wait on it; `update` fires every registered token
//! without ever blocking on a consumer.

pub mod cluster;
pub mod endpoint;
pub mod listener;
pub mod route;

pub use cluster::{visit_clusters, ClusterCache};
pub use endpoint::{visit_endpoints, EndpointCache};
pub use listener::{visit_listeners, ListenerCache};
pub use route::{visit_routes, RouteCache};

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc::Sender;
use tracing::warn;

/// A one-shot signal destination handed to [`ResourceCache::register`].
/// Must have capacity for at least one pending value; `update` never waits
/// for the consumer to drain it.
pub type ResumptionToken = Sender<u64>;

/// A versioned snapshot of named xDS resources with notify-on-update
/// registration.
#[derive(Debug)]
pub struct ResourceCache<T> {
    inner: Mutex<Inner<T>>,
}

#[derive(Debug)]
struct Inner<T> {
    values: BTreeMap<String, T>,
    last: u64,
    waiters: Vec<ResumptionToken>,
}

impl<T> Default for ResourceCache<T> {
    fn default() -> Self {
        ResourceCache {
            inner: Mutex::new(Inner {
                values: BTreeMap::new(),
                last: 0,
                waiters: Vec::new(),
            }),
        }
    }
}

impl<T: Clone> ResourceCache<T> {
    pub fn new() -> ResourceCache<T> {
        ResourceCache::default()
    }

    /// Atomically replaces the snapshot, bumps the sequence number and
    /// signals every registered waiter. Tokens whose consumer has gone
    /// away, or whose mailbox is already full, are simply dropped.
    pub fn update(&self, values: BTreeMap<String, T>) {
        let mut inner = self.lock();
        inner.values = values;
        inner.last += 1;
        let last = inner.last;
        for waiter in inner.waiters.drain(..) {
            let _ = waiter.try_send(last);
        }
    }

    /// Registers `token` to be signalled by the next `update`. If the
    /// caller has already missed an update (`last_seen` is behind the
    /// cache), the token fires immediately instead of being enqueued.
    pub fn register(&self, token: ResumptionToken, last_seen: u64) {
        let mut inner = self.lock();
        if last_seen < inner.last {
            let _ = token.try_send(inner.last);
            return;
        }
        inner.waiters.push(token);
    }

    /// Snapshot of the values whose name passes `filter`.
    pub fn values(&self, filter: impl Fn(&str) -> bool) -> Vec<T> {
        let inner = self.lock();
        inner
            .values
            .iter()
            .filter(|(name, _)| filter(name))
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Snapshot of every value in the cache.
    pub fn contents(&self) -> Vec<T> {
        self.values(|_| true)
    }

    /// Current sequence number.
    pub fn last(&self) -> u64 {
        self.lock().last
    }

    /// Releases every waiter with the current sequence number. Used on
    /// shutdown so consumers can observe cancellation.
    pub fn drain_waiters(&self) {
        let mut inner = self.lock();
        let last = inner.last;
        for waiter in inner.waiters.drain(..) {
            let _ = waiter.try_send(last);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("resource cache mutex poisoned, recovering (data is still valid)");
            poisoned.into_inner()
        })
    }
}
