//! # Query Sync
//!
//! A client-side data synchronization layer for REST backends: a keyed query
//! cache, mutation orchestration with cache invalidation, and polling for
//! near-real-time views.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Consumers (views, CLIs, background jobs)       │
//! │  • QueryObserver: mounted query, keep-previous-data         │
//! │  • Mutation: mutate / mutate_async, pending guard           │
//! │  • PollingSubscription / ActivityMonitor                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Query Cache                          │
//! │  • Entries keyed by (resource, operation, params)           │
//! │  • One fetch in flight per key, generation-checked results  │
//! │  • Staleness window, retries, refcounted GC                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Resource Services                       │
//! │  • contracts, redemptions, discounts, templates, ...        │
//! │  • Canonical query strings, id + date normalization         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        HTTP Client                          │
//! │  • Bearer token injection, 401 → credentials cleared        │
//! │  • { success, data, message, pagination } envelope          │
//! │  • Pluggable Transport (reqwest, in-memory)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use query_sync::resources::contracts::Contract;
//! use query_sync::{HttpClient, ListParams, QueryCache, ResourceQueries, ResourceService, SyncConfig, Update};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), query_sync::SyncError> {
//!     let config = SyncConfig::from_env()?;
//!     let http = HttpClient::from_config(&config)?;
//!     let cache = QueryCache::from_config(&config);
//!     let _gc = cache.spawn_gc(config.gc_interval());
//!
//!     let contracts = ResourceQueries::<Contract>::new(ResourceService::new(http), cache.clone());
//!     let options = cache.default_options();
//!
//!     let page = contracts.list(&ListParams::default().page(1).limit(20), &options).await;
//!     if let Some(page) = page.data() {
//!         println!("{} contracts", page.pagination.total);
//!     }
//!
//!     // Lists go stale, the detail entry takes the server's copy
//!     contracts
//!         .update_mutation()
//!         .mutate_async(Update { id: "c1".into(), patch: json!({"title": "Renewal"}) })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`http`]: HTTP client, transports, token storage, response envelope
//! - [`resources`]: Typed resource services and payload normalization
//! - [`query_key`]: Canonical query keys and key prefixes
//! - [`cache`]: Query cache, pure state reducer, observers
//! - [`mutation`]: Mutations and their cache effects
//! - [`polling`]: Interval refetch and suspicious-activity monitoring
//! - [`queries`]: Resource services bound to the cache
//! - [`resilience`]: Retry with exponential backoff

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod mutation;
pub mod polling;
pub mod queries;
pub mod query_key;
pub mod resilience;
pub mod resources;

pub use cache::{
    dispatch, CacheEvent, CacheUpdate, EntryState, GcHandle, QueryCache, QueryObserver, QueryOptions,
    QuerySnapshot, QueryStatus,
};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use http::{
    ApiResponse, AuthEvent, FileTokenStore, HttpClient, InMemoryTransport, MemoryTokenStore, Paginated,
    Pagination, ReqwestTransport, TokenStore, Transport,
};
pub use metrics::LatencyTimer;
pub use mutation::{Mutation, MutationState};
pub use polling::monitor::{ActivityAlert, ActivityMonitor, Flagged, SuspicionDetector};
pub use polling::{PollingOptions, PollingSubscription};
pub use queries::{ActionInput, ResourceQueries, SignContract, Update};
pub use query_key::{KeyPrefix, QueryKey};
pub use resilience::retry::RetryConfig;
pub use resources::{ExportFile, ExportFormat, ListParams, Resource, ResourceService};
