// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline service: owns every store and component for the life of the
//! process and is the application's single handle on the core.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use offline_core::{OfflineConfig, OfflineService, ServiceState};
//! use offline_core::http::RequestDescriptor;
//! use offline_core::transport::HttpTransport;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), offline_core::OfflineError> {
//! let config = OfflineConfig::default();
//! let transport = Arc::new(HttpTransport::new(Some("https://api.example.com"), Duration::from_secs(8))?);
//! let service = OfflineService::open(config, transport).await?;
//! assert_eq!(service.state(), ServiceState::Created);
//!
//! service.start()?;
//! let response = service.handle(RequestDescriptor::get("/api/alarms")).await;
//! println!("{} via {}", response.status, response.source.label());
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod lifecycle;
mod types;

pub use types::{OptimizeReport, ServiceState, ServiceStatus};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{CacheStats, TieredCache};
use crate::config::OfflineConfig;
use crate::connectivity::Connectivity;
use crate::error::OfflineError;
use crate::http::{RequestDescriptor, Response};
use crate::queue::{ConflictRecord, MutationQueue, QueueStats, Resolution};
use crate::router::StrategyRouter;
use crate::storage::blob_sql::SqliteBlobStore;
use crate::storage::records::{RecordStore, SyncRecord};
use crate::sync::{ManualResolution, SyncCoordinator, SyncRun};
use crate::tasks::BackgroundTasks;

pub struct OfflineService {
    pub(super) config: OfflineConfig,
    pub(super) state: watch::Sender<ServiceState>,
    pub(super) cache: Arc<TieredCache>,
    /// Set when the blob cache lives in SQLite, so shutdown can close it
    pub(super) sqlite_blobs: Option<Arc<SqliteBlobStore>>,
    pub(super) records: Arc<RecordStore>,
    pub(super) queue: Arc<MutationQueue>,
    pub(super) router: Arc<StrategyRouter>,
    pub(super) sync: Arc<SyncCoordinator>,
    pub(super) connectivity: Arc<Connectivity>,
    pub(super) tasks: Arc<BackgroundTasks>,
    pub(super) shutdown_tx: watch::Sender<bool>,
    pub(super) run_handle: Mutex<Option<JoinHandle<()>>>,
}

impl OfflineService {
    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    pub(super) fn set_state(&self, state: ServiceState) {
        self.state.send_replace(state);
        crate::metrics::set_service_state(state.as_str());
    }

    #[must_use]
    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    /// Route one application request. Never fails.
    pub async fn handle(&self, request: RequestDescriptor) -> Response {
        self.router.handle(request).await
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Feed the platform's connectivity signal. A running service syncs
    /// every domain on an offline → online transition.
    pub fn set_online(&self, online: bool) -> bool {
        let reconnected = self.connectivity.set_online(online);
        if reconnected && self.state() == ServiceState::Running {
            info!("Back online, syncing queued mutations");
            lifecycle::spawn_sync(&self.tasks, &self.sync, "reconnect_sync");
        }
        reconnected
    }

    pub async fn sync_domain(&self, domain: &str) -> Result<Option<SyncRun>, OfflineError> {
        self.sync.sync_domain(domain).await
    }

    pub async fn sync_all(&self) -> Result<Vec<SyncRun>, OfflineError> {
        self.sync.sync_all().await
    }

    /// Hand over records that need pushing; returns how many were queued.
    pub async fn stage_for_sync(&self, domain: &str, records: Vec<SyncRecord>) -> Result<usize, OfflineError> {
        self.sync.stage_for_sync(domain, records).await
    }

    /// Records of `domain` the remote has not confirmed yet.
    pub async fn unsynced_records(&self, domain: &str) -> Result<Vec<SyncRecord>, OfflineError> {
        Ok(self.records.unsynced(domain).await?)
    }

    pub async fn cache_stats(&self) -> Result<CacheStats, OfflineError> {
        Ok(self.cache.stats().await?)
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, OfflineError> {
        Ok(self.queue.stats().await?)
    }

    pub async fn status(&self) -> Result<ServiceStatus, OfflineError> {
        Ok(ServiceStatus {
            state: self.state(),
            online: self.is_online(),
            cache: self.cache.stats().await?,
            queue: self.queue.stats().await?,
            tasks: self.tasks.stats(),
        })
    }

    /// Recent sync runs, oldest first.
    #[must_use]
    pub fn sync_history(&self) -> Vec<SyncRun> {
        self.sync.history()
    }

    /// Every completed sync run is sent here.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncRun> {
        self.sync.subscribe()
    }

    pub async fn deferred_conflicts(&self) -> Result<Vec<ConflictRecord>, OfflineError> {
        self.sync.deferred_conflicts().await
    }

    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        answer: ManualResolution,
    ) -> Result<Option<Resolution>, OfflineError> {
        self.sync.resolve_conflict(conflict_id, answer).await
    }

    /// Drop every cached response in every tier. Queued mutations and
    /// records are untouched.
    pub async fn clear_all_cached(&self) -> Result<usize, OfflineError> {
        let removed = self.cache.clear_all().await?;
        info!(removed, "Cleared all cached data");
        Ok(removed)
    }

    /// Evict every tier down to its target, then fetch the warm list again.
    pub async fn force_optimize(&self) -> Result<OptimizeReport, OfflineError> {
        let mut report = OptimizeReport::default();
        for pass in self.cache.evict_all().await? {
            report.evicted_entries += pass.evicted.len();
            report.freed_bytes += pass.freed_bytes;
        }

        for url in &self.config.warm_urls {
            match self.router.warm(url).await {
                Ok(true) => report.warmed += 1,
                Ok(false) => report.warm_failures.push(url.clone()),
                Err(err) => {
                    warn!(url = %url, error = %err, "Re-warm failed");
                    report.warm_failures.push(url.clone());
                }
            }
        }

        info!(
            evicted = report.evicted_entries,
            freed_bytes = report.freed_bytes,
            warmed = report.warmed,
            failures = report.warm_failures.len(),
            "Force optimize complete"
        );
        Ok(report)
    }
}
