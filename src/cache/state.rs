// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-key entry state and its transition function.
//!
//! [`dispatch`] is pure: it takes the current [`EntryState`] and a
//! [`CacheEvent`] and returns the next state. Everything asynchronous
//! (spawning fetches, timers, notifying observers) happens in the cache
//! around it, which keeps the race rules testable without a runtime.
//!
//! Every fetch carries a generation number. Only the most recently started
//! generation may complete an entry; results and failures from older
//! generations leave the state untouched.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::SyncError;

/// Type-erased cached value. Typed access downcasts.
pub type CachedData = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    /// Nothing fetched yet.
    #[default]
    Idle,
    /// A fetch is running and no attempt has settled since it started.
    Loading,
    Success,
    Error,
}

impl QueryStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Default)]
pub struct EntryState {
    pub status: QueryStatus,
    /// Last successful value. Survives later failures.
    pub data: Option<CachedData>,
    /// Last failure. Cleared by a success or a patch.
    pub error: Option<SyncError>,
    pub fetched_at: Option<Instant>,
    pub error_at: Option<Instant>,
    pub invalidated: bool,
    /// Generation of the most recently started fetch.
    pub generation: u64,
    pub fetching: bool,
}

impl fmt::Debug for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryState")
            .field("status", &self.status)
            .field("has_data", &self.data.is_some())
            .field("error", &self.error)
            .field("fetched_at", &self.fetched_at)
            .field("invalidated", &self.invalidated)
            .field("generation", &self.generation)
            .field("fetching", &self.fetching)
            .finish()
    }
}

impl EntryState {
    /// Stale when invalidated, never fetched, or older than `stale_time`.
    #[must_use]
    pub fn is_stale(&self, now: Instant, stale_time: Duration) -> bool {
        if self.invalidated {
            return true;
        }
        match self.fetched_at {
            Some(at) => now.saturating_duration_since(at) >= stale_time,
            None => true,
        }
    }

    /// Has data that can be served without fetching.
    #[must_use]
    pub fn is_fresh(&self, now: Instant, stale_time: Duration) -> bool {
        self.data.is_some() && !self.is_stale(now, stale_time)
    }

    /// Would a completion for `generation` be applied?
    #[must_use]
    pub fn accepts(&self, generation: u64) -> bool {
        self.fetching && self.generation == generation
    }
}

#[derive(Clone)]
pub enum CacheEvent {
    FetchStarted { generation: u64 },
    FetchSucceeded { generation: u64, data: CachedData, at: Instant },
    FetchFailed { generation: u64, error: SyncError, at: Instant },
    /// The in-flight fetch was aborted without a result.
    FetchCancelled { generation: u64 },
    /// Mark stale; data stays readable until the next fetch replaces it.
    Invalidated,
    /// Write data directly (mutation results, optimistic updates). Supersedes
    /// any fetch in flight: its result was requested before the write.
    Patched { data: CachedData, at: Instant },
}

impl fmt::Debug for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchStarted { generation } => write!(f, "FetchStarted({generation})"),
            Self::FetchSucceeded { generation, .. } => write!(f, "FetchSucceeded({generation})"),
            Self::FetchFailed { generation, error, .. } => {
                write!(f, "FetchFailed({generation}, {error})")
            }
            Self::FetchCancelled { generation } => write!(f, "FetchCancelled({generation})"),
            Self::Invalidated => f.write_str("Invalidated"),
            Self::Patched { .. } => f.write_str("Patched"),
        }
    }
}

/// Apply `event` to `state`.
#[must_use]
pub fn dispatch(state: &EntryState, event: CacheEvent) -> EntryState {
    let mut next = state.clone();
    match event {
        CacheEvent::FetchStarted { generation } => {
            if generation <= state.generation {
                return next;
            }
            next.generation = generation;
            next.fetching = true;
            next.status = QueryStatus::Loading;
        }
        CacheEvent::FetchSucceeded { generation, data, at } => {
            if !state.accepts(generation) {
                return next;
            }
            next.status = QueryStatus::Success;
            next.data = Some(data);
            next.error = None;
            next.fetched_at = Some(at);
            next.invalidated = false;
            next.fetching = false;
        }
        CacheEvent::FetchFailed { generation, error, at } => {
            if !state.accepts(generation) {
                return next;
            }
            next.status = QueryStatus::Error;
            next.error = Some(error);
            next.error_at = Some(at);
            next.fetching = false;
        }
        CacheEvent::FetchCancelled { generation } => {
            if !state.accepts(generation) {
                return next;
            }
            next.fetching = false;
            next.status = settled_status(&next);
        }
        CacheEvent::Invalidated => {
            next.invalidated = true;
        }
        CacheEvent::Patched { data, at } => {
            next.data = Some(data);
            next.error = None;
            next.fetched_at = Some(at);
            next.invalidated = false;
            next.fetching = false;
            next.status = QueryStatus::Success;
        }
    }
    next
}

fn settled_status(state: &EntryState) -> QueryStatus {
    if state.error.is_some() {
        QueryStatus::Error
    } else if state.data.is_some() {
        QueryStatus::Success
    } else {
        QueryStatus::Idle
    }
}
