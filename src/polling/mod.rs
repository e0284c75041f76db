// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Interval refetching.
//!
//! A [`PollingSubscription`] refetches one key on a timer until it is
//! disabled or dropped. The next tick is scheduled after the previous fetch
//! settles, so a slow backend never sees overlapping polls. Failed ticks
//! stretch the interval by `backoff_factor` up to `max_interval`; the first
//! success restores it.
//!
//! Disabling (or dropping) the subscription clears the timer and cancels the
//! key's in-flight fetch, unless another observer of the key is waiting on it.
//! A standalone subscription counts as an observer of its key for as long as
//! it lives.

pub mod monitor;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{erase, CachedData, Fetcher, ObserverGuard, QueryCache, QueryOptions};
use crate::error::SyncError;
use crate::metrics;
use crate::query_key::QueryKey;

type DataListener = Arc<dyn Fn(CachedData) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct PollingOptions {
    pub interval: Duration,
    pub enabled: bool,
    /// Interval multiplier after a failed tick. `1.0` disables backoff.
    pub backoff_factor: f64,
    pub max_interval: Duration,
}

impl PollingOptions {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            enabled: true,
            backoff_factor: 2.0,
            max_interval: interval.saturating_mul(8),
        }
    }

    /// Fraud feeds: every 10 seconds.
    pub fn fraud_monitoring() -> Self {
        Self::every(Duration::from_secs(10))
    }

    /// Stats widgets: every 30 seconds.
    pub fn stats() -> Self {
        Self::every(Duration::from_secs(30))
    }

    /// Dashboard summaries: every 5 minutes.
    pub fn dashboard() -> Self {
        Self::every(Duration::from_secs(300))
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn backoff(mut self, factor: f64, max_interval: Duration) -> Self {
        self.backoff_factor = factor;
        self.max_interval = max_interval;
        self
    }

    /// Interval to use after a failure at `current`.
    #[must_use]
    pub fn next_interval(&self, current: Duration) -> Duration {
        let ceiling = self.max_interval.max(self.interval);
        current.mul_f64(self.backoff_factor.max(1.0)).min(ceiling)
    }
}

pub struct PollingSubscription {
    key: QueryKey,
    cache: QueryCache,
    enabled: watch::Sender<bool>,
    ticks: Arc<AtomicU64>,
    task: JoinHandle<()>,
    /// `None` when a `QueryObserver` owns this subscription and holds the key.
    _guard: Option<ObserverGuard>,
}

impl PollingSubscription {
    pub fn spawn<T, F, Fut>(
        cache: &QueryCache,
        key: QueryKey,
        query: QueryOptions,
        polling: PollingOptions,
        fetcher: F,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        let guard = cache.observe(&key, &query);
        Self::spawn_erased(cache.clone(), key, query, polling, erase(fetcher), None, Some(guard))
    }

    /// Like [`spawn`](Self::spawn), calling `on_data` after every successful tick.
    pub fn spawn_with<T, F, Fut, L>(
        cache: &QueryCache,
        key: QueryKey,
        query: QueryOptions,
        polling: PollingOptions,
        fetcher: F,
        on_data: L,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
        L: Fn(Arc<T>) + Send + Sync + 'static,
    {
        let listener: DataListener = Arc::new(move |data: CachedData| {
            if let Ok(typed) = data.downcast::<T>() {
                on_data(typed);
            }
        });
        let guard = cache.observe(&key, &query);
        Self::spawn_erased(cache.clone(), key, query, polling, erase(fetcher), Some(listener), Some(guard))
    }

    pub(crate) fn spawn_erased(
        cache: QueryCache,
        key: QueryKey,
        query: QueryOptions,
        polling: PollingOptions,
        fetcher: Fetcher,
        on_data: Option<DataListener>,
        guard: Option<ObserverGuard>,
    ) -> Self {
        let (enabled, enabled_rx) = watch::channel(polling.enabled);
        let ticks = Arc::new(AtomicU64::new(0));
        info!(key = %key, interval_ms = polling.interval.as_millis() as u64, "Polling started");

        let task = tokio::spawn(
            PollLoop {
                cache: cache.clone(),
                key: key.clone(),
                query,
                polling,
                fetcher,
                on_data,
                enabled: enabled_rx,
                ticks: ticks.clone(),
            }
            .run(),
        );

        Self { key, cache, enabled, ticks, task, _guard: guard }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    /// Pause or resume. Pausing cancels the key's in-flight fetch when no
    /// other observer shares it; resuming waits a full interval before the
    /// next tick.
    pub fn set_enabled(&self, enabled: bool) {
        let changed = self.enabled.send_if_modified(|current| {
            if *current == enabled {
                false
            } else {
                *current = enabled;
                true
            }
        });
        if changed && !enabled {
            self.cache.cancel_unshared(&self.key);
            debug!(key = %self.key, "Polling paused");
        }
    }

    /// Completed ticks (successful or not).
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Stop for good. Same as dropping.
    pub fn stop(self) {}
}

impl Drop for PollingSubscription {
    fn drop(&mut self) {
        self.task.abort();
        self.cache.cancel_unshared(&self.key);
        debug!(key = %self.key, "Polling stopped");
    }
}

struct PollLoop {
    cache: QueryCache,
    key: QueryKey,
    query: QueryOptions,
    polling: PollingOptions,
    fetcher: Fetcher,
    on_data: Option<DataListener>,
    enabled: watch::Receiver<bool>,
    ticks: Arc<AtomicU64>,
}

impl PollLoop {
    async fn run(mut self) {
        let mut interval = self.polling.interval;
        loop {
            if !*self.enabled.borrow_and_update() {
                if self.enabled.changed().await.is_err() {
                    return;
                }
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = self.enabled.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue;
                }
            }

            let result = self
                .cache
                .fetch_erased(&self.key, self.fetcher.clone(), &self.query, false)
                .await;
            self.ticks.fetch_add(1, Ordering::Relaxed);

            match result {
                Ok(data) => {
                    metrics::record_poll_tick(self.key.resource(), "success");
                    if interval != self.polling.interval {
                        debug!(key = %self.key, "Polling recovered, interval restored");
                        interval = self.polling.interval;
                    }
                    if let (Some(listener), Some(data)) = (&self.on_data, data) {
                        listener(data);
                    }
                }
                Err(SyncError::Cancelled) => {
                    metrics::record_poll_tick(self.key.resource(), "cancelled");
                }
                Err(error) => {
                    metrics::record_poll_tick(self.key.resource(), "error");
                    interval = self.polling.next_interval(interval);
                    warn!(
                        key = %self.key,
                        error = %error,
                        next_ms = interval.as_millis() as u64,
                        "Poll failed, backing off"
                    );
                }
            }
            metrics::set_poll_interval(self.key.resource(), interval);
        }
    }
}
