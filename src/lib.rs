//! # Offline Core
//!
//! The offline-resilience core of a mobile alarm app: a background layer
//! between the application and the network that decides, per request,
//! whether to answer from a local cache, the network, or both, and that
//! replays locally made changes once connectivity returns.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Strategy Router                        │
//! │  • Classifies each GET by URL pattern (first match wins)    │
//! │  • CacheFirst / NetworkFirst / SWR / NetworkWithFallback    │
//! │  • Never fails: stale, placeholder, or offline response     │
//! └─────────────────────────────────────────────────────────────┘
//!          │ reads / write-backs                │ failed mutations
//!          ▼                                    ▼
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │        Tiered Cache          │   │    Offline Mutation Queue    │
//! │  • 6 budgeted tiers          │   │  • SQLite, FIFO per domain   │
//! │  • Access metadata per entry │   │  • Survives restarts         │
//! │  • Eviction to 80% of budget │   │  • Deferred conflicts        │
//! └──────────────────────────────┘   └──────────────────────────────┘
//!                                               │ reconnect / periodic
//!                                               ▼
//!                                    ┌──────────────────────────────┐
//!                                    │      Sync Coordinator        │
//!                                    │  • Batches of 20, retry 3x   │
//!                                    │  • Conflict detect + resolve │
//!                                    │  • Bounded SyncRun history   │
//!                                    └──────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use offline_core::{OfflineConfig, OfflineService};
//! use offline_core::http::{HttpMethod, RequestDescriptor};
//! use offline_core::transport::HttpTransport;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), offline_core::OfflineError> {
//!     let config = OfflineConfig {
//!         data_dir: Some("/data/offline".into()),
//!         ..Default::default()
//!     };
//!     let transport = Arc::new(HttpTransport::new(Some("https://api.example.com"), Duration::from_secs(8))?);
//!
//!     let service = OfflineService::open(config, transport).await?;
//!     service.start()?;
//!
//!     // Reads are routed through the cache
//!     let alarms = service.handle(RequestDescriptor::get("/api/alarms")).await;
//!     println!("alarms via {}", alarms.source.label());
//!
//!     // Writes that cannot reach the server are queued (202)
//!     let edit = RequestDescriptor::new(HttpMethod::Put, "/api/alarms/7")
//!         .with_json(&json!({"hour": 6, "minute": 30}));
//!     service.handle(edit).await;
//!
//!     // The platform reports connectivity; reconnecting drains the queue
//!     service.set_online(true);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`service`]: [`OfflineService`], the lifecycle owner and public API
//! - [`router`]: routing table and strategy execution
//! - [`cache`]: tiers, access-tracked entries, the [`TieredCache`]
//! - [`eviction`]: retention scoring and eviction passes
//! - [`queue`]: durable mutation queue and sync domains
//! - [`sync`]: replay, conflict resolution, run history
//! - [`storage`]: blob and record stores (memory, SQLite)
//! - [`transport`]: network boundary (reqwest, scripted)
//! - [`resilience`]: retry with a delay schedule
//! - [`tasks`]: supervised background tasks

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod eviction;
pub mod http;
pub mod metrics;
pub mod queue;
pub mod resilience;
pub mod router;
pub mod service;
pub mod storage;
pub mod sync;
pub mod tasks;
pub mod transport;

pub use cache::{CacheStats, CacheTier, CachedPayload, TierBudgets, TierStats, TieredCache};
pub use config::OfflineConfig;
pub use connectivity::Connectivity;
pub use error::OfflineError;
pub use eviction::{EvictionEngine, EvictionReport, RetentionPolicy};
pub use http::{HttpMethod, RequestDescriptor, RequestMode, Response, ResponseSource};
pub use queue::{
    ConflictKind, ConflictPolicy, ConflictRecord, DomainConfig, MutationQueue, MutationState, QueueStats,
    QueuedMutation, Resolution,
};
pub use resilience::retry::RetryConfig;
pub use router::{RouteSpec, RouteTable, Strategy, StrategyRouter};
pub use service::{OfflineService, OptimizeReport, ServiceState, ServiceStatus};
pub use storage::records::{RecordStore, SyncRecord};
pub use storage::traits::{BlobStore, StorageError};
pub use sync::{ManualResolution, MergeOptions, SyncCoordinator, SyncRun, SyncSettings};
pub use tasks::{BackgroundTasks, TaskStats};
pub use transport::{HttpTransport, ScriptedTransport, Transport};
pub use metrics::NetworkTimer;
