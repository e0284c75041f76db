// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Long-lived consumer of one query at a time.
//!
//! A [`QueryObserver`] is what a view holds while it is mounted: it keeps its
//! entry alive against garbage collection, owns the polling timer when the
//! options ask for one, and follows the view through key changes (pagination,
//! filters). Dropping it is unmounting.

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use super::{erase, Fetcher, ObserverGuard, QueryCache, QueryOptions, QuerySnapshot};
use crate::error::SyncError;
use crate::polling::{PollingOptions, PollingSubscription};
use crate::query_key::QueryKey;

pub struct QueryObserver<T> {
    cache: QueryCache,
    key: QueryKey,
    options: QueryOptions,
    fetcher: Fetcher,
    /// Dropped before `_guard` so its cancel still counts this observer.
    poller: Option<PollingSubscription>,
    _guard: ObserverGuard,
    /// Last data seen under a previous key.
    placeholder: Option<Arc<T>>,
}

impl<T: Send + Sync + 'static> QueryObserver<T> {
    /// Start observing `key`. Polling (if `refetch_interval` is set) starts
    /// immediately, so this must run inside a Tokio runtime.
    pub fn new<F, Fut>(cache: &QueryCache, key: QueryKey, options: QueryOptions, fetcher: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        let guard = cache.observe(&key, &options);
        let mut observer = Self {
            cache: cache.clone(),
            key,
            options,
            fetcher: erase(fetcher),
            _guard: guard,
            poller: None,
            placeholder: None,
        };
        observer.restart_polling();
        observer
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(PollingSubscription::is_enabled)
    }

    /// Fetch if stale, wait for the entry to settle, and return it.
    pub async fn result(&mut self) -> QuerySnapshot<T> {
        self.cache.query_erased(&self.key, &self.options, self.fetcher.clone()).await;
        let snapshot = self.current();
        if !snapshot.is_placeholder && snapshot.data.is_some() {
            self.placeholder = None;
        }
        snapshot
    }

    /// Fetch even if fresh.
    pub async fn refetch(&mut self) -> QuerySnapshot<T> {
        self.cache.refetch_erased(&self.key, &self.options, self.fetcher.clone()).await;
        self.current()
    }

    /// The entry as it is right now, without fetching.
    pub fn current(&self) -> QuerySnapshot<T> {
        let mut snapshot = self.cache.snapshot_with(&self.key, self.options.stale_time);
        if snapshot.data.is_none() && self.options.keep_previous_data {
            if let Some(previous) = &self.placeholder {
                snapshot.data = Some(Arc::clone(previous));
                snapshot.is_placeholder = true;
            }
        }
        snapshot
    }

    /// Move to a new key (next page, new filters). A fetch still running for
    /// the old key is cancelled unless someone else observes it.
    pub fn switch<F, Fut>(&mut self, key: QueryKey, fetcher: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        self.fetcher = erase(fetcher);
        if key == self.key {
            // Same key, new closure: the poller must pick it up
            self.restart_polling();
            return;
        }

        if self.options.keep_previous_data {
            if let Some(data) = self.cache.get_query_data::<T>(&self.key) {
                self.placeholder = Some(data);
            }
        }

        self.poller = None;
        if self.cache.cancel_unshared(&self.key) {
            debug!(from = %self.key, to = %key, "Cancelled superseded query");
        }
        self.key = key;
        self._guard = self.cache.observe(&self.key, &self.options);
        self.restart_polling();
    }

    /// Disabling stops polling and cancels this key's in-flight fetch unless
    /// another observer is waiting on it.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.options.enabled == enabled {
            return;
        }
        self.options.enabled = enabled;
        self.restart_polling();
        if !enabled {
            self.cache.cancel_unshared(&self.key);
        }
    }

    fn restart_polling(&mut self) {
        self.poller = None;
        if !self.options.enabled {
            return;
        }
        if let Some(interval) = self.options.refetch_interval {
            self.poller = Some(PollingSubscription::spawn_erased(
                self.cache.clone(),
                self.key.clone(),
                self.options.clone(),
                PollingOptions::every(interval),
                self.fetcher.clone(),
                None,
                None,
            ));
        }
    }
}
