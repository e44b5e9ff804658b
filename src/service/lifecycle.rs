//! Service lifecycle: open, start, run loop, shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{OfflineService, ServiceState};
use crate::cache::TieredCache;
use crate::config::OfflineConfig;
use crate::connectivity::Connectivity;
use crate::error::OfflineError;
use crate::queue::{DomainTable, MutationQueue};
use crate::resilience::retry::{retry, RetryConfig};
use crate::router::{RouteTable, StrategyRouter};
use crate::storage::blob_sql::SqliteBlobStore;
use crate::storage::memory::InMemoryBlobStore;
use crate::storage::records::RecordStore;
use crate::storage::traits::BlobStore;
use crate::sync::SyncCoordinator;
use crate::tasks::BackgroundTasks;
use crate::transport::Transport;

/// Longest shutdown waits for in-flight background work before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn db_path(dir: Option<&PathBuf>, file: &str) -> Option<PathBuf> {
    dir.map(|d| d.join(file))
}

/// Components the run loop drives.
struct RunLoop {
    cache: Arc<TieredCache>,
    sync: Arc<SyncCoordinator>,
    connectivity: Arc<Connectivity>,
    tasks: Arc<BackgroundTasks>,
    eviction_every: Duration,
    sync_every: Option<Duration>,
}

impl OfflineService {
    /// Validate the config and open every store.
    ///
    /// Startup flow:
    /// 1. Blob cache (SQLite under `data_dir`, else in memory)
    /// 2. Record store
    /// 3. Mutation queue (items left in flight by a crash go back to pending)
    /// 4. Router and sync coordinator wired to the shared stores
    #[tracing::instrument(skip(config, transport), fields(data_dir = ?config.data_dir))]
    pub async fn open(config: OfflineConfig, transport: Arc<dyn Transport>) -> Result<Self, OfflineError> {
        let open_start = Instant::now();
        config.validate()?;

        if let Some(ref dir) = config.data_dir {
            std::fs::create_dir_all(dir)
                .map_err(|e| OfflineError::Config(format!("cannot create data_dir {}: {}", dir.display(), e)))?;
        }
        let startup = RetryConfig::startup();

        // ========== Blob cache ==========
        let cache_path = db_path(config.data_dir.as_ref(), "cache.db");
        let (blobs, sqlite_blobs): (Arc<dyn BlobStore>, Option<Arc<SqliteBlobStore>>) = match cache_path {
            Some(ref path) => {
                let path: &Path = path;
                let store = Arc::new(retry("open_blob_cache", &startup, move || SqliteBlobStore::open(Some(path))).await?);
                info!(path = %path.display(), "Blob cache opened");
                (store.clone(), Some(store))
            }
            None => {
                debug!("Blob cache kept in memory");
                (Arc::new(InMemoryBlobStore::new()), None)
            }
        };
        let cache = Arc::new(TieredCache::new(blobs, config.tier_budgets.clone(), config.retention_policy()));

        // ========== Record store ==========
        let records_path = db_path(config.data_dir.as_ref(), "records.db");
        let records_path = records_path.as_deref();
        let records = Arc::new(retry("open_record_store", &startup, move || RecordStore::open(records_path)).await?);

        // ========== Mutation queue ==========
        let queue_path = db_path(config.data_dir.as_ref(), "mutations.db");
        let queue_path = queue_path.as_deref();
        let queue = Arc::new(retry("open_mutation_queue", &startup, move || MutationQueue::open(queue_path)).await?);

        // ========== Components ==========
        let domains = Arc::new(DomainTable::new(&config.domains)?);
        let connectivity = Arc::new(Connectivity::default());
        let tasks = Arc::new(BackgroundTasks::new());

        let router = StrategyRouter::new(
            RouteTable::from_specs(&config.routes)?,
            Arc::clone(&cache),
            Arc::clone(&transport),
            Arc::clone(&connectivity),
            Arc::clone(&queue),
            Arc::clone(&domains),
            Arc::clone(&tasks),
            config.router_settings(),
        )?;
        let sync = SyncCoordinator::new(
            Arc::clone(&queue),
            Arc::clone(&records),
            Arc::clone(&cache),
            transport,
            domains,
            config.sync_settings(),
        );

        let queued = queue.stats().await?.total_queued();
        let (state, _) = watch::channel(ServiceState::Created);
        let (shutdown_tx, _) = watch::channel(false);
        crate::metrics::set_service_state(ServiceState::Created.as_str());
        info!(queued, elapsed_ms = open_start.elapsed().as_millis() as u64, "Offline service opened");

        Ok(Self {
            config,
            state,
            cache,
            sqlite_blobs,
            records,
            queue,
            router: Arc::new(router),
            sync: Arc::new(sync),
            connectivity,
            tasks,
            shutdown_tx,
            run_handle: Mutex::new(None),
        })
    }

    /// Spawn the run loop. Must be called inside a tokio runtime.
    #[tracing::instrument(skip(self))]
    pub fn start(&self) -> Result<(), OfflineError> {
        if self.state() != ServiceState::Created {
            return Err(OfflineError::Config(format!("cannot start a service in state {}", self.state())));
        }

        let run = RunLoop {
            cache: Arc::clone(&self.cache),
            sync: Arc::clone(&self.sync),
            connectivity: Arc::clone(&self.connectivity),
            tasks: Arc::clone(&self.tasks),
            eviction_every: Duration::from_secs(self.config.eviction_interval_secs.max(1)),
            sync_every: (self.config.sync_interval_secs > 0)
                .then(|| Duration::from_secs(self.config.sync_interval_secs)),
        };
        let shutdown_rx = self.shutdown_tx.subscribe();
        *self.run_handle.lock() = Some(tokio::spawn(run.run(shutdown_rx)));

        self.set_state(ServiceState::Running);
        info!("Offline service running");
        Ok(())
    }

    /// Stop the loop, let background work finish (bounded), close stores.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        if self.state() == ServiceState::Stopped {
            return;
        }
        let shutdown_start = Instant::now();
        info!("Initiating offline service shutdown...");
        self.set_state(ServiceState::Stopping);

        self.shutdown_tx.send_replace(true);
        let handle = self.run_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "Run loop ended abnormally");
            }
        }

        if tokio::time::timeout(SHUTDOWN_GRACE, self.tasks.wait_idle()).await.is_err() {
            warn!(running = self.tasks.stats().running, "Background tasks still running, aborting");
            self.tasks.abort_all().await;
        }

        self.queue.close().await;
        self.records.close().await;
        if let Some(ref blobs) = self.sqlite_blobs {
            blobs.close().await;
        }

        self.set_state(ServiceState::Stopped);
        info!(elapsed_ms = shutdown_start.elapsed().as_millis() as u64, "Offline service shutdown complete");
    }
}

async fn tick_or_never(timer: &mut Option<Interval>) {
    match timer {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl RunLoop {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut eviction = interval(self.eviction_every);
        eviction.set_missed_tick_behavior(MissedTickBehavior::Skip);
        eviction.reset();

        let mut sync = self.sync_every.map(|every| {
            let mut t = interval(every);
            t.set_missed_tick_behavior(MissedTickBehavior::Skip);
            t.reset();
            t
        });

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = eviction.tick() => {
                    match self.cache.evict_all().await {
                        Ok(reports) => {
                            let evicted: usize = reports.iter().map(|r| r.evicted.len()).sum();
                            if evicted > 0 {
                                info!(evicted, "Periodic eviction pass");
                            }
                        }
                        Err(err) => {
                            crate::metrics::record_storage_error("eviction");
                            error!(error = %err, "Periodic eviction failed");
                        }
                    }
                }

                _ = tick_or_never(&mut sync) => {
                    if self.connectivity.is_online() {
                        self.spawn_sync("periodic_sync");
                    }
                }
            }
        }
        debug!("Run loop stopped");
    }

    fn spawn_sync(&self, name: &'static str) {
        spawn_sync(&self.tasks, &self.sync, name);
    }
}

/// Drain every domain on the task registry. Domains already draining are
/// skipped by the coordinator.
pub(super) fn spawn_sync(tasks: &BackgroundTasks, sync: &Arc<SyncCoordinator>, name: &'static str) {
    let sync = Arc::clone(sync);
    tasks.spawn(name, async move {
        let runs = sync.sync_all().await?;
        debug!(runs = runs.len(), "Sync pass finished");
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpMethod, RequestDescriptor};
    use crate::transport::{Reply, ScriptedTransport};
    use serde_json::json;

    fn fast_config() -> OfflineConfig {
        OfflineConfig {
            retry_delays_ms: vec![1],
            network_timeout_ms: 200,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let service = OfflineService::open(fast_config(), Arc::new(ScriptedTransport::new()))
            .await
            .unwrap();
        assert_eq!(service.state(), ServiceState::Created);

        service.start().unwrap();
        assert_eq!(service.state(), ServiceState::Running);
        assert!(service.start().is_err());

        service.shutdown().await;
        assert_eq!(service.state(), ServiceState::Stopped);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnect_triggers_sync() {
        let transport = Arc::new(ScriptedTransport::new());
        let service = OfflineService::open(fast_config(), transport.clone()).await.unwrap();
        let mut runs = service.subscribe();
        service.start().unwrap();

        service.set_online(false);
        let request = RequestDescriptor::new(HttpMethod::Put, "/api/alarms/7").with_json(&json!({"hour": 7}));
        assert_eq!(service.handle(request).await.status, 202);

        transport.always(HttpMethod::Put, "/api/alarms/7", Reply::status(204));
        service.set_online(true);

        let run = tokio::time::timeout(Duration::from_secs(5), runs.recv()).await.unwrap().unwrap();
        assert_eq!((run.domain.as_str(), run.succeeded), ("alarms", 1));
        assert_eq!(service.queue_stats().await.unwrap().total_queued(), 0);

        service.shutdown().await;
    }
}
