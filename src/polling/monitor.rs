// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Suspicious-activity detection on top of polling.
//!
//! Each poll result is compared against the ids already seen. Newly
//! suspicious entries are collected and reported as one [`ActivityAlert`],
//! at most once per debounce window (30 seconds by default). Entries found
//! while the window is closed are held and reported when it reopens.
//!
//! The first result only establishes the baseline: whatever is already
//! flagged when monitoring starts is not news.

use std::collections::HashSet;
use std::future::Future;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::warn;

use super::{PollingOptions, PollingSubscription};
use crate::cache::{QueryCache, QueryOptions};
use crate::error::SyncError;
use crate::metrics;
use crate::query_key::QueryKey;

const ALERT_CHANNEL_CAPACITY: usize = 16;

/// Something that can be flagged as suspicious.
pub trait Flagged {
    /// Stable identity used to tell new entries from ones already seen.
    fn alert_id(&self) -> &str;
    fn is_suspicious(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityAlert {
    /// Newly suspicious entries, in the order they were first seen.
    pub ids: Vec<String>,
    pub raised_at: Instant,
}

#[derive(Debug)]
pub struct SuspicionDetector {
    debounce: Duration,
    seen: HashSet<String>,
    pending: Vec<String>,
    last_alert: Option<Instant>,
    primed: bool,
}

impl Default for SuspicionDetector {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DEBOUNCE)
    }
}

impl SuspicionDetector {
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(30);

    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            seen: HashSet::new(),
            pending: Vec::new(),
            last_alert: None,
            primed: false,
        }
    }

    /// Feed one poll result. Returns an alert when there is something new and
    /// the debounce window allows it.
    pub fn observe<T: Flagged>(&mut self, items: &[T], now: Instant) -> Option<ActivityAlert> {
        for item in items.iter().filter(|item| item.is_suspicious()) {
            if self.seen.insert(item.alert_id().to_string()) && self.primed {
                self.pending.push(item.alert_id().to_string());
            }
        }
        self.primed = true;
        self.flush(now)
    }

    /// Emit held entries if the window is open.
    pub fn flush(&mut self, now: Instant) -> Option<ActivityAlert> {
        if self.pending.is_empty() {
            return None;
        }
        if let Some(last) = self.last_alert {
            if now.saturating_duration_since(last) < self.debounce {
                return None;
            }
        }
        self.last_alert = Some(now);
        Some(ActivityAlert { ids: mem::take(&mut self.pending), raised_at: now })
    }

    /// Entries detected but not yet reported.
    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn is_primed(&self) -> bool {
        self.primed
    }
}

/// Polls a list and broadcasts [`ActivityAlert`]s for new suspicious entries.
pub struct ActivityMonitor {
    subscription: PollingSubscription,
    alerts: broadcast::Sender<ActivityAlert>,
}

impl ActivityMonitor {
    pub fn spawn<T, D, F, Fut>(
        cache: &QueryCache,
        key: QueryKey,
        query: QueryOptions,
        polling: PollingOptions,
        debounce: Duration,
        fetcher: F,
    ) -> Self
    where
        T: Flagged + 'static,
        D: AsRef<[T]> + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<D, SyncError>> + Send + 'static,
    {
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        let detector = Mutex::new(SuspicionDetector::new(debounce));
        let resource = key.resource().to_string();
        let sender = alerts.clone();

        let subscription =
            PollingSubscription::spawn_with(cache, key, query, polling, fetcher, move |data: Arc<D>| {
                let alert = detector.lock().observe((*data).as_ref(), Instant::now());
                if let Some(alert) = alert {
                    metrics::record_activity_alert(&resource, alert.ids.len());
                    warn!(resource = %resource, entries = alert.ids.len(), "Suspicious activity detected");
                    let _ = sender.send(alert);
                }
            });

        Self { subscription, alerts }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivityAlert> {
        self.alerts.subscribe()
    }

    pub fn subscription(&self) -> &PollingSubscription {
        &self.subscription
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.subscription.set_enabled(enabled);
    }
}
