// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Keyed query cache.
//!
//! Entries are addressed by [`QueryKey`] and hold the last successful value,
//! the last error, and fetch bookkeeping (see [`state`]). The cache:
//!
//! - serves fresh data without fetching and refetches stale data
//! - runs at most one fetch per key; concurrent readers join it
//! - discards results from fetches that a newer fetch has superseded
//! - retries transient failures with backoff
//! - evicts entries nobody has observed for `gc_time`
//!
//! # Concurrency
//!
//! `QueryCache` is a cheap handle (`Arc` inside) and can be cloned into
//! tasks. Fetches run as spawned Tokio tasks, so a consumer that stops
//! waiting does not cancel the fetch for everyone else. Entry locks are never
//! held across an `.await`.
//!
//! # Example
//!
//! ```no_run
//! use query_sync::{QueryCache, QueryKey, SyncError};
//! use serde_json::json;
//!
//! # async fn demo() {
//! let cache = QueryCache::default();
//! let key = QueryKey::new("contracts", "count", &json!({"status": "draft"}));
//! let options = cache.default_options();
//!
//! let snapshot = cache
//!     .query(&key, &options, || async { Ok::<_, SyncError>(42u64) })
//!     .await;
//! assert_eq!(snapshot.data(), Some(&42));
//! # }
//! ```

mod observer;
pub mod state;

pub use observer::QueryObserver;
pub use state::{dispatch, CacheEvent, CachedData, EntryState, QueryStatus};

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::metrics;
use crate::query_key::{KeyPrefix, QueryKey};
use crate::resilience::retry::{retry_if, RetryConfig};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Type-erased fetch function stored alongside in-flight work.
pub(crate) type Fetcher =
    Arc<dyn Fn() -> BoxFuture<'static, Result<CachedData, SyncError>> + Send + Sync>;

pub(crate) fn erase<T, F, Fut>(fetcher: F) -> Fetcher
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
{
    Arc::new(move || {
        let fut = fetcher();
        async move { fut.await.map(|value| Arc::new(value) as CachedData) }.boxed()
    })
}

type FetchDone = Shared<BoxFuture<'static, Result<(), SyncError>>>;

/// Per-query behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// How long a successful result counts as fresh.
    pub stale_time: Duration,
    /// How long an unobserved entry is kept before eviction.
    pub gc_time: Duration,
    /// Disabled queries never fetch.
    pub enabled: bool,
    /// Refetch on a timer regardless of staleness (observers only).
    pub refetch_interval: Option<Duration>,
    /// Show the previous key's data while a new key loads (observers only).
    pub keep_previous_data: bool,
    pub retry: RetryConfig,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            gc_time: Duration::from_secs(300),
            enabled: true,
            refetch_interval: None,
            keep_previous_data: false,
            retry: RetryConfig::query(),
        }
    }
}

impl QueryOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            stale_time: config.stale_time(),
            gc_time: config.gc_time(),
            retry: config.retry(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    #[must_use]
    pub fn gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn keep_previous_data(mut self, keep: bool) -> Self {
        self.keep_previous_data = keep;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Typed view of one entry at one moment.
#[derive(Debug)]
pub struct QuerySnapshot<T> {
    pub key: QueryKey,
    pub status: QueryStatus,
    pub data: Option<Arc<T>>,
    pub error: Option<SyncError>,
    pub fetched_at: Option<Instant>,
    pub is_stale: bool,
    pub is_fetching: bool,
    /// `data` belongs to a previous key (keep-previous-data).
    pub is_placeholder: bool,
}

impl<T> Clone for QuerySnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            fetched_at: self.fetched_at,
            is_stale: self.is_stale,
            is_fetching: self.is_fetching,
            is_placeholder: self.is_placeholder,
        }
    }
}

impl<T> QuerySnapshot<T> {
    fn idle(key: &QueryKey) -> Self {
        Self {
            key: key.clone(),
            status: QueryStatus::Idle,
            data: None,
            error: None,
            fetched_at: None,
            is_stale: true,
            is_fetching: false,
            is_placeholder: false,
        }
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_deref()
    }

    /// First load: fetching with nothing to show.
    pub fn is_loading(&self) -> bool {
        self.is_fetching && self.data.is_none()
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }
}

impl<T: Send + Sync + 'static> QuerySnapshot<T> {
    fn from_state(key: &QueryKey, state: &EntryState, now: Instant, stale_time: Duration) -> Self {
        let (data, error) = match &state.data {
            Some(data) => match Arc::clone(data).downcast::<T>() {
                Ok(typed) => (Some(typed), state.error.clone()),
                Err(_) => (None, Some(SyncError::TypeMismatch(key.to_string()))),
            },
            None => (None, state.error.clone()),
        };
        Self {
            key: key.clone(),
            status: state.status,
            data,
            error,
            fetched_at: state.fetched_at,
            is_stale: state.is_stale(now, stale_time),
            is_fetching: state.fetching,
            is_placeholder: false,
        }
    }
}

/// Broadcast whenever an entry changes status or data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheUpdate {
    pub key: QueryKey,
    pub status: QueryStatus,
}

struct InFlight {
    generation: u64,
    done: FetchDone,
    abort: AbortHandle,
}

struct Entry {
    state: EntryState,
    in_flight: Option<InFlight>,
    observers: usize,
    /// When the last observer went away (or the entry was created unobserved).
    released_at: Option<Instant>,
    stale_time: Duration,
    gc_time: Duration,
}

impl Entry {
    fn new(options: &QueryOptions) -> Self {
        Self {
            state: EntryState::default(),
            in_flight: None,
            observers: 0,
            released_at: Some(Instant::now()),
            stale_time: options.stale_time,
            gc_time: options.gc_time,
        }
    }
}

struct CacheInner {
    entries: DashMap<QueryKey, Entry>,
    next_generation: AtomicU64,
    defaults: QueryOptions,
    updates: broadcast::Sender<CacheUpdate>,
}

#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(QueryOptions::default())
    }
}

impl QueryCache {
    pub fn new(defaults: QueryOptions) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(CacheInner {
                entries: DashMap::new(),
                next_generation: AtomicU64::new(0),
                defaults,
                updates,
            }),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(QueryOptions::from_config(config))
    }

    /// Options every query starts from.
    pub fn default_options(&self) -> QueryOptions {
        self.inner.defaults.clone()
    }

    /// Read through the cache: fresh data is returned as is, otherwise a
    /// fetch is started (or joined) and awaited. Failures end up in the
    /// snapshot's `error`; data from an earlier success is kept alongside.
    pub async fn query<T, F, Fut>(&self, key: &QueryKey, options: &QueryOptions, fetcher: F) -> QuerySnapshot<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        self.query_erased(key, options, erase(fetcher)).await;
        self.snapshot_with(key, options.stale_time)
    }

    /// Fetch even if fresh. An in-flight fetch for the key is superseded.
    pub async fn refetch<T, F, Fut>(&self, key: &QueryKey, options: &QueryOptions, fetcher: F) -> QuerySnapshot<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        self.refetch_erased(key, options, erase(fetcher)).await;
        self.snapshot_with(key, options.stale_time)
    }

    /// Start a background fetch when the entry is not fresh. Does not wait.
    pub fn prefetch<T, F, Fut>(&self, key: &QueryKey, options: &QueryOptions, fetcher: F)
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        if !options.enabled || self.is_fresh(key, options.stale_time) {
            return;
        }
        self.start_fetch(key, erase(fetcher), options, false);
    }

    pub(crate) async fn query_erased(&self, key: &QueryKey, options: &QueryOptions, fetcher: Fetcher) {
        if !options.enabled {
            return;
        }
        let fresh = {
            let entry = self.entry_mut(key, options);
            entry.state.is_fresh(Instant::now(), options.stale_time)
        };
        metrics::record_cache_lookup(key.resource(), fresh);
        if !fresh {
            self.start_fetch(key, fetcher, options, false);
        }
        self.wait_settled(key).await;
    }

    pub(crate) async fn refetch_erased(&self, key: &QueryKey, options: &QueryOptions, fetcher: Fetcher) {
        if options.enabled {
            self.start_fetch(key, fetcher, options, true);
            self.wait_settled(key).await;
        }
    }

    /// Fetch regardless of staleness, joining an in-flight fetch unless
    /// `force`. Returns the entry's data once that fetch settles.
    pub(crate) async fn fetch_erased(
        &self,
        key: &QueryKey,
        fetcher: Fetcher,
        options: &QueryOptions,
        force: bool,
    ) -> Result<Option<CachedData>, SyncError> {
        let done = self.start_fetch(key, fetcher, options, force);
        done.await?;
        Ok(self.inner.entries.get(key).and_then(|entry| entry.state.data.clone()))
    }

    fn start_fetch(&self, key: &QueryKey, fetcher: Fetcher, options: &QueryOptions, force: bool) -> FetchDone {
        let mut entry = self.entry_mut(key, options);
        if let Some(in_flight) = &entry.in_flight {
            if !force {
                metrics::record_fetch_deduplicated(key.resource());
                return in_flight.done.clone();
            }
            debug!(key = %key, generation = in_flight.generation, "Superseding in-flight fetch");
            in_flight.abort.abort();
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        entry.state = dispatch(&entry.state, CacheEvent::FetchStarted { generation });

        let cache = self.clone();
        let task_key = key.clone();
        let retry = options.retry.clone();
        let task: JoinHandle<Result<(), SyncError>> = tokio::spawn(async move {
            let _timer = metrics::LatencyTimer::new(task_key.resource());
            let operation = format!("{}/{}", task_key.resource(), task_key.operation());
            let attempt = retry_if(&operation, &retry, || fetcher(), SyncError::is_retryable);
            let result = match AssertUnwindSafe(attempt).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Internal(format!("fetcher for {task_key} panicked"))),
            };
            cache.complete(&task_key, generation, result)
        });

        let abort = task.abort_handle();
        let done: FetchDone = async move {
            match task.await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Cancelled),
            }
        }
        .boxed()
        .shared();

        entry.in_flight = Some(InFlight { generation, done: done.clone(), abort });
        drop(entry);

        self.notify(key, QueryStatus::Loading);
        done
    }

    fn complete(
        &self,
        key: &QueryKey,
        generation: u64,
        result: Result<CachedData, SyncError>,
    ) -> Result<(), SyncError> {
        let at = Instant::now();
        let (event, outcome) = match result {
            Ok(data) => (CacheEvent::FetchSucceeded { generation, data, at }, Ok(())),
            Err(error) => (
                CacheEvent::FetchFailed { generation, error: error.clone(), at },
                Err(error),
            ),
        };

        let status = {
            let Some(mut entry) = self.inner.entries.get_mut(key) else {
                debug!(key = %key, "Entry removed before its fetch completed");
                return outcome;
            };
            if !entry.state.accepts(generation) {
                metrics::record_stale_response_discarded(key.resource());
                debug!(
                    key = %key,
                    generation,
                    current = entry.state.generation,
                    "Discarding superseded response"
                );
                return outcome;
            }
            entry.state = dispatch(&entry.state, event);
            if entry.in_flight.as_ref().is_some_and(|f| f.generation == generation) {
                entry.in_flight = None;
            }
            entry.state.status
        };

        match &outcome {
            Ok(()) => metrics::record_fetch(key.resource(), "success"),
            Err(error) => {
                metrics::record_fetch(key.resource(), "error");
                warn!(key = %key, error = %error, "Query fetch failed");
            }
        }
        self.notify(key, status);
        outcome
    }

    /// Wait until the key has no fetch in flight. A fetch that supersedes the
    /// one being awaited is waited for too.
    async fn wait_settled(&self, key: &QueryKey) {
        loop {
            let pending = self
                .inner
                .entries
                .get(key)
                .and_then(|entry| entry.in_flight.as_ref().map(|f| f.done.clone()));
            match pending {
                Some(done) => {
                    let _ = done.await;
                }
                None => return,
            }
        }
    }

    /// Abort the in-flight fetch for `key`, if any.
    pub fn cancel(&self, key: &QueryKey) -> bool {
        self.cancel_if(key, |_| true)
    }

    /// Cancel on behalf of one consumer: only when no other observer holds
    /// `key`. The caller's own observer registration, if any, counts as one.
    pub(crate) fn cancel_unshared(&self, key: &QueryKey) -> bool {
        self.cancel_if(key, |entry| entry.observers <= 1)
    }

    fn cancel_if(&self, key: &QueryKey, allowed: impl FnOnce(&Entry) -> bool) -> bool {
        let status = {
            let Some(mut entry) = self.inner.entries.get_mut(key) else {
                return false;
            };
            if entry.in_flight.is_none() || !allowed(&entry) {
                return false;
            }
            let Some(in_flight) = entry.in_flight.take() else {
                return false;
            };
            in_flight.abort.abort();
            entry.state = dispatch(
                &entry.state,
                CacheEvent::FetchCancelled { generation: in_flight.generation },
            );
            entry.state.status
        };
        debug!(key = %key, "Cancelled in-flight fetch");
        metrics::record_fetch(key.resource(), "cancelled");
        self.notify(key, status);
        true
    }

    /// Mark every entry under `prefix` stale. Returns how many matched.
    pub fn invalidate(&self, prefix: &KeyPrefix) -> usize {
        let mut touched = Vec::new();
        for mut entry in self.inner.entries.iter_mut() {
            if prefix.matches(entry.key()) {
                entry.state = dispatch(&entry.state, CacheEvent::Invalidated);
                touched.push((entry.key().clone(), entry.state.status));
            }
        }

        debug!(prefix = %prefix, entries = touched.len(), "Invalidated queries");
        metrics::record_invalidation(&prefix.to_string(), touched.len());
        let count = touched.len();
        for (key, status) in touched {
            self.notify(&key, status);
        }
        count
    }

    /// Mark one entry stale.
    pub fn invalidate_key(&self, key: &QueryKey) -> bool {
        let status = match self.inner.entries.get_mut(key) {
            Some(mut entry) => {
                entry.state = dispatch(&entry.state, CacheEvent::Invalidated);
                entry.state.status
            }
            None => return false,
        };
        self.notify(key, status);
        true
    }

    /// Write `value` as the entry's current data and mark it fresh. A fetch
    /// still running for the key is aborted and its result discarded.
    pub fn set_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey, value: T) {
        let status = {
            let mut entry = self
                .inner
                .entries
                .entry(key.clone())
                .or_insert_with(|| Entry::new(&self.inner.defaults));
            if let Some(in_flight) = entry.in_flight.take() {
                in_flight.abort.abort();
                debug!(key = %key, generation = in_flight.generation, "Patch superseded in-flight fetch");
            }
            let data = Arc::new(value) as CachedData;
            entry.state = dispatch(&entry.state, CacheEvent::Patched { data, at: Instant::now() });
            entry.state.status
        };
        self.notify(key, status);
    }

    pub fn get_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
        let data = self.inner.entries.get(key)?.state.data.clone()?;
        data.downcast::<T>().ok()
    }

    /// Current state without fetching. `None` if the key has no entry.
    pub fn snapshot<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<QuerySnapshot<T>> {
        let entry = self.inner.entries.get(key)?;
        Some(QuerySnapshot::from_state(key, &entry.state, Instant::now(), entry.stale_time))
    }

    fn snapshot_with<T: Send + Sync + 'static>(&self, key: &QueryKey, stale_time: Duration) -> QuerySnapshot<T> {
        match self.inner.entries.get(key) {
            Some(entry) => QuerySnapshot::from_state(key, &entry.state, Instant::now(), stale_time),
            None => QuerySnapshot::idle(key),
        }
    }

    /// Drop an entry outright, aborting its fetch.
    pub fn remove_query(&self, key: &QueryKey) -> bool {
        match self.inner.entries.remove(key) {
            Some((_, entry)) => {
                if let Some(in_flight) = entry.in_flight {
                    in_flight.abort.abort();
                }
                self.notify(key, QueryStatus::Idle);
                true
            }
            None => false,
        }
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.inner.entries.get(key).is_some_and(|entry| entry.in_flight.is_some())
    }

    pub fn is_fresh(&self, key: &QueryKey, stale_time: Duration) -> bool {
        self.inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.state.is_fresh(Instant::now(), stale_time))
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner.entries.contains_key(key)
    }

    pub fn observer_count(&self, key: &QueryKey) -> usize {
        self.inner.entries.get(key).map_or(0, |entry| entry.observers)
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.inner.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Subscribe to entry changes. Slow receivers miss updates (lagged)
    /// rather than blocking the cache.
    pub fn updates(&self) -> broadcast::Receiver<CacheUpdate> {
        self.inner.updates.subscribe()
    }

    /// Evict entries that have had no observers for their `gc_time` and have
    /// no fetch running. Returns how many were removed.
    pub fn collect_garbage(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0usize;
        self.inner.entries.retain(|key, entry| {
            let expired = entry.observers == 0
                && entry.in_flight.is_none()
                && entry
                    .released_at
                    .is_some_and(|at| now.saturating_duration_since(at) >= entry.gc_time);
            if expired {
                debug!(key = %key, "Evicting unobserved query");
                removed += 1;
            }
            !expired
        });

        if removed > 0 {
            metrics::record_gc_eviction(removed);
        }
        metrics::set_cache_entries(self.inner.entries.len());
        removed
    }

    /// Run [`collect_garbage`](Self::collect_garbage) every `period` until the
    /// handle is dropped or the cache goes away.
    pub fn spawn_gc(&self, period: Duration) -> GcHandle {
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let removed = QueryCache { inner }.collect_garbage();
                if removed > 0 {
                    info!(removed, "Cache garbage collection");
                }
            }
        });
        GcHandle { task }
    }

    /// Register an observer of `key`. Dropping the guard releases it.
    pub(crate) fn observe(&self, key: &QueryKey, options: &QueryOptions) -> ObserverGuard {
        {
            let mut entry = self.entry_mut(key, options);
            entry.observers += 1;
            entry.released_at = None;
        }
        ObserverGuard { cache: self.clone(), key: key.clone() }
    }

    fn release(&self, key: &QueryKey) {
        if let Some(mut entry) = self.inner.entries.get_mut(key) {
            entry.observers = entry.observers.saturating_sub(1);
            if entry.observers == 0 {
                entry.released_at = Some(Instant::now());
            }
        }
    }

    fn entry_mut(&self, key: &QueryKey, options: &QueryOptions) -> RefMut<'_, QueryKey, Entry> {
        let mut entry = self
            .inner
            .entries
            .entry(key.clone())
            .or_insert_with(|| Entry::new(options));
        entry.stale_time = options.stale_time;
        entry.gc_time = options.gc_time;
        entry
    }

    fn notify(&self, key: &QueryKey, status: QueryStatus) {
        let _ = self.inner.updates.send(CacheUpdate { key: key.clone(), status });
    }
}

/// Keeps an entry from being garbage collected while alive.
pub(crate) struct ObserverGuard {
    cache: QueryCache,
    key: QueryKey,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.cache.release(&self.key);
    }
}

/// Background garbage collector. Stops when dropped.
pub struct GcHandle {
    task: JoinHandle<()>,
}

impl Drop for GcHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
