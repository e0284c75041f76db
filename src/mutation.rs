// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write operations and their cache side effects.
//!
//! A [`Mutation`] wraps one server write. On success it applies its declared
//! effects to the [`QueryCache`], in this order:
//!
//! 1. invalidate every key under each registered [`KeyPrefix`]
//! 2. run patch / remove / custom effects with the input and the server's output
//!
//! Invalidating first means a patched entry is left fresh even when it falls
//! under an invalidated prefix. On failure the cache is not touched and the
//! error is kept in the mutation's state.
//!
//! Mutations are never retried.
//!
//! # Example
//!
//! ```no_run
//! use query_sync::{KeyPrefix, Mutation, QueryCache, QueryKey, SyncError};
//!
//! # async fn demo(cache: QueryCache) -> Result<(), SyncError> {
//! let rename = Mutation::new("contracts.rename", &cache, |(id, title): (String, String)| async move {
//!     Ok::<_, SyncError>(format!("{id}:{title}"))
//! })
//! .invalidates(KeyPrefix::list("contracts"))
//! .patches(|(id, _): &(String, String), out: &String| {
//!     Some((QueryKey::detail("contracts", id), out.clone()))
//! });
//!
//! rename.mutate_async(("c1".into(), "Renewal".into())).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::QueryCache;
use crate::error::SyncError;
use crate::metrics;
use crate::query_key::{KeyPrefix, QueryKey};

type Runner<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O, SyncError>> + Send + Sync>;
type Effect<I, O> = Arc<dyn Fn(&QueryCache, &I, &O) + Send + Sync>;

pub enum MutationState<O> {
    Idle,
    Pending,
    Success(Arc<O>),
    Error(SyncError),
}

impl<O> Clone for MutationState<O> {
    fn clone(&self) -> Self {
        match self {
            Self::Idle => Self::Idle,
            Self::Pending => Self::Pending,
            Self::Success(data) => Self::Success(Arc::clone(data)),
            Self::Error(error) => Self::Error(error.clone()),
        }
    }
}

impl<O: fmt::Debug> fmt::Debug for MutationState<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Pending => f.write_str("Pending"),
            Self::Success(data) => f.debug_tuple("Success").field(data).finish(),
            Self::Error(error) => f.debug_tuple("Error").field(error).finish(),
        }
    }
}

impl<O> MutationState<O> {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn data(&self) -> Option<&O> {
        match self {
            Self::Success(data) => Some(data.as_ref()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }
}

pub struct Mutation<I, O> {
    name: Arc<str>,
    cache: QueryCache,
    run: Runner<I, O>,
    invalidates: Vec<KeyPrefix>,
    effects: Vec<Effect<I, O>>,
    exclusive: bool,
    pending: Arc<AtomicUsize>,
    state: Arc<watch::Sender<MutationState<O>>>,
}

impl<I, O> Clone for Mutation<I, O> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            cache: self.cache.clone(),
            run: Arc::clone(&self.run),
            invalidates: self.invalidates.clone(),
            effects: self.effects.clone(),
            exclusive: self.exclusive,
            pending: Arc::clone(&self.pending),
            state: Arc::clone(&self.state),
        }
    }
}

impl<I, O> Mutation<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    pub fn new<F, Fut>(name: impl Into<String>, cache: &QueryCache, run: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, SyncError>> + Send + 'static,
    {
        let name: String = name.into();
        let (state, _) = watch::channel(MutationState::Idle);
        Self {
            name: Arc::from(name),
            cache: cache.clone(),
            run: Arc::new(move |input: I| run(input).boxed()),
            invalidates: Vec::new(),
            effects: Vec::new(),
            exclusive: false,
            pending: Arc::new(AtomicUsize::new(0)),
            state: Arc::new(state),
        }
    }

    /// Mark everything under `prefix` stale after a success.
    #[must_use]
    pub fn invalidates(mut self, prefix: KeyPrefix) -> Self {
        self.invalidates.push(prefix);
        self
    }

    /// Write a value derived from the input and output into the cache.
    #[must_use]
    pub fn patches<T, F>(mut self, patch: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&I, &O) -> Option<(QueryKey, T)> + Send + Sync + 'static,
    {
        self.effects.push(Arc::new(move |cache: &QueryCache, input: &I, output: &O| {
            if let Some((key, value)) = patch(input, output) {
                cache.set_query_data(&key, value);
            }
        }));
        self
    }

    /// Drop an entry (e.g. the detail of a deleted record).
    #[must_use]
    pub fn removes<F>(mut self, key: F) -> Self
    where
        F: Fn(&I, &O) -> Option<QueryKey> + Send + Sync + 'static,
    {
        self.effects.push(Arc::new(move |cache: &QueryCache, input: &I, output: &O| {
            if let Some(key) = key(input, output) {
                cache.remove_query(&key);
            }
        }));
        self
    }

    /// Arbitrary cache work after a success.
    #[must_use]
    pub fn on_success<F>(mut self, effect: F) -> Self
    where
        F: Fn(&QueryCache, &I, &O) + Send + Sync + 'static,
    {
        self.effects.push(Arc::new(effect));
        self
    }

    /// Refuse to start while a previous call is still pending.
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the mutation and wait for it, effects included.
    #[tracing::instrument(skip_all, fields(mutation = %self.name))]
    pub async fn mutate_async(&self, input: I) -> Result<Arc<O>, SyncError> {
        let _pending = self.begin()?;
        self.state.send_replace(MutationState::Pending);
        let started = Instant::now();

        let result = (self.run)(input.clone()).await;
        metrics::record_mutation_latency(&self.name, started.elapsed());

        match result {
            Ok(output) => {
                for prefix in &self.invalidates {
                    self.cache.invalidate(prefix);
                }
                for effect in &self.effects {
                    effect(&self.cache, &input, &output);
                }
                let output = Arc::new(output);
                self.state.send_replace(MutationState::Success(Arc::clone(&output)));
                metrics::record_mutation(&self.name, "success");
                debug!("Mutation succeeded");
                Ok(output)
            }
            Err(error) => {
                self.state.send_replace(MutationState::Error(error.clone()));
                metrics::record_mutation(&self.name, error.kind());
                warn!(error = %error, "Mutation failed");
                Err(error)
            }
        }
    }

    /// Fire and forget. The result is still visible through [`state`](Self::state).
    pub fn mutate(&self, input: I) -> JoinHandle<Result<Arc<O>, SyncError>> {
        let this = self.clone();
        tokio::spawn(async move { this.mutate_async(input).await })
    }

    pub fn state(&self) -> MutationState<O> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MutationState<O>> {
        self.state.subscribe()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    pub fn is_success(&self) -> bool {
        self.state.borrow().is_success()
    }

    pub fn is_error(&self) -> bool {
        self.state.borrow().is_error()
    }

    pub fn error(&self) -> Option<SyncError> {
        self.state.borrow().error().cloned()
    }

    /// Back to `Idle`, e.g. when a form is closed.
    pub fn reset(&self) {
        if !self.is_pending() {
            self.state.send_replace(MutationState::Idle);
        }
    }

    fn begin(&self) -> Result<PendingGuard<O>, SyncError> {
        if self.exclusive {
            if self.pending.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire).is_err() {
                metrics::record_mutation(&self.name, "rejected_in_flight");
                return Err(SyncError::MutationInFlight(self.name.to_string()));
            }
        } else {
            self.pending.fetch_add(1, Ordering::AcqRel);
        }
        Ok(PendingGuard { pending: Arc::clone(&self.pending), state: Arc::clone(&self.state) })
    }
}

/// Decrements the pending count even if the caller stops awaiting. A call
/// abandoned mid-flight leaves the state `Idle` rather than `Pending`.
struct PendingGuard<O> {
    pending: Arc<AtomicUsize>,
    state: Arc<watch::Sender<MutationState<O>>>,
}

impl<O> Drop for PendingGuard<O> {
    fn drop(&mut self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.state.send_if_modified(|state| {
                if state.is_pending() {
                    *state = MutationState::Idle;
                    true
                } else {
                    false
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn list_key() -> QueryKey {
        QueryKey::new("contracts", "list", &json!({"page": 1}))
    }

    fn detail_key(id: &str) -> QueryKey {
        QueryKey::detail("contracts", id)
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Contract {
        id: String,
        title: String,
    }

    fn update(cache: &QueryCache) -> Mutation<(String, String), Contract> {
        Mutation::new("contracts.update", cache, |(id, title): (String, String)| async move {
            if title.is_empty() {
                return Err(SyncError::Rejected { status: 422, message: "Title is required".into() });
            }
            Ok(Contract { id, title })
        })
        .invalidates(KeyPrefix::list("contracts"))
        .patches(|_, out: &Contract| Some((QueryKey::detail("contracts", &out.id), out.clone())))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_invalidates_lists_and_patches_detail() {
        let cache = QueryCache::default();
        let fresh = Duration::from_secs(60);
        cache.set_query_data(&list_key(), vec!["c1".to_string()]);
        cache.set_query_data(&detail_key("c1"), Contract { id: "c1".into(), title: "Old".into() });

        let out = update(&cache).mutate_async(("c1".into(), "New".into())).await.unwrap();

        assert_eq!(out.title, "New");
        assert!(!cache.is_fresh(&list_key(), fresh));
        assert!(cache.is_fresh(&detail_key("c1"), fresh));
        assert_eq!(cache.get_query_data::<Contract>(&detail_key("c1")).unwrap().title, "New");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_leaves_cache_untouched() {
        let cache = QueryCache::default();
        let fresh = Duration::from_secs(60);
        cache.set_query_data(&list_key(), vec!["c1".to_string()]);
        let original = Contract { id: "c1".into(), title: "Old".into() };
        cache.set_query_data(&detail_key("c1"), original.clone());

        let mutation = update(&cache);
        let err = mutation.mutate_async(("c1".into(), String::new())).await.unwrap_err();

        assert_eq!(err.to_string(), "Title is required");
        assert!(mutation.is_error());
        assert_eq!(mutation.error(), Some(err));
        assert!(cache.is_fresh(&list_key(), fresh));
        assert_eq!(*cache.get_query_data::<Contract>(&detail_key("c1")).unwrap(), original);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_transitions() {
        let cache = QueryCache::default();
        let mutation = Mutation::new("slow", &cache, |n: u32| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, SyncError>(n * 2)
        });
        assert!(mutation.state().is_idle());

        let handle = mutation.mutate(21);
        tokio::task::yield_now().await;
        assert!(mutation.is_pending());
        assert!(mutation.state().is_pending());

        let out = handle.await.unwrap().unwrap();
        assert_eq!(*out, 42);
        assert!(!mutation.is_pending());
        assert_eq!(mutation.state().data(), Some(&42));

        mutation.reset();
        assert!(mutation.state().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exclusive_rejects_overlap() {
        let cache = QueryCache::default();
        let mutation = Mutation::new("contracts.sign", &cache, |_: ()| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, SyncError>(())
        })
        .exclusive();

        let first = mutation.mutate(());
        tokio::task::yield_now().await;
        let second = mutation.mutate_async(()).await;

        assert!(matches!(second, Err(SyncError::MutationInFlight(ref name)) if name == "contracts.sign"));
        assert!(first.await.unwrap().is_ok());
        assert!(mutation.mutate_async(()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_removes_and_custom_effects() {
        let cache = QueryCache::default();
        cache.set_query_data(&detail_key("c1"), 1u8);
        cache.set_query_data(&QueryKey::new("contracts", "stats", &json!(null)), 9u8);

        let remove = Mutation::new("contracts.remove", &cache, |_id: String| async { Ok::<_, SyncError>(()) })
            .removes(|id: &String, _| Some(QueryKey::detail("contracts", id)))
            .on_success(|cache, _, _| {
                cache.invalidate(&KeyPrefix::resource("contracts").operation("stats"));
            });

        remove.mutate_async("c1".into()).await.unwrap();

        assert!(!cache.contains(&detail_key("c1")));
        assert!(!cache.is_fresh(&QueryKey::new("contracts", "stats", &json!(null)), Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_call_returns_to_idle() {
        let cache = QueryCache::default();
        let mutation = Mutation::new("slow", &cache, |_: ()| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, SyncError>(())
        });

        let _ = tokio::time::timeout(Duration::from_secs(1), mutation.mutate_async(())).await;
        assert!(!mutation.is_pending());
        assert!(mutation.state().is_idle());
    }
}
