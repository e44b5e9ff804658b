//! Sync coordinator: drains the mutation queue against the remote API.
//!
//! # Replay
//!
//! ```text
//! Pending ──▶ InFlight ──┬─ 2xx ───────────────────────▶ removed (succeeded)
//!                        ├─ transport error / 5xx ─────▶ retry per schedule,
//!                        │                               then Pending (failed)
//!                        └─ 409 / 404 / newer 2xx echo ─▶ conflict ─┬─ resolved ▶ removed
//!                                                                   └─ deferred ▶ DeferredConflict
//! ```
//!
//! A `2xx` to a create is never a conflict. An item whose stored row cannot
//! be decoded is dropped with an error log; any other storage failure on
//! one item puts it back to pending and the run moves on.
//!
//! At most one drain runs per domain. A second trigger while one is in
//! progress returns `None` instead of waiting.

pub mod conflict;
pub mod history;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::cache::TieredCache;
use crate::error::OfflineError;
use crate::http::{HttpMethod, RequestDescriptor, Response};
use crate::queue::{
    ConflictKind, ConflictPolicy, ConflictRecord, DomainTable, MutationQueue, MutationState, QueuedMutation,
    Resolution,
};
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::records::{RecordStore, SyncRecord};
use crate::storage::traits::StorageError;
use crate::transport::Transport;

pub use conflict::{ManualResolution, MergeOptions};
pub use history::{SyncHistory, SyncRun};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub batch_size: usize,
    pub retry: RetryConfig,
    pub default_policy: ConflictPolicy,
    pub merge: MergeOptions,
    pub network_timeout: Duration,
    pub history_limit: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            retry: RetryConfig::replay(),
            default_policy: ConflictPolicy::default(),
            merge: MergeOptions::default(),
            network_timeout: Duration::from_secs(8),
            history_limit: 50,
        }
    }
}

enum ReplayOutcome {
    Succeeded,
    Failed,
    /// Conflict detected; `retry` is set when applying the resolution hit a
    /// transient failure and the item went back to pending
    Conflict { record: ConflictRecord, retry: bool },
}

enum Applied {
    Resolved(Resolution),
    Retry(Resolution),
    Defer,
}

/// Clears the domain's drain flag when dropped.
struct DrainGuard<'a> {
    draining: &'a DashMap<String, ()>,
    domain: String,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.draining.remove(&self.domain);
    }
}

pub struct SyncCoordinator {
    queue: Arc<MutationQueue>,
    records: Arc<RecordStore>,
    cache: Arc<TieredCache>,
    transport: Arc<dyn Transport>,
    domains: Arc<DomainTable>,
    settings: SyncSettings,
    history: SyncHistory,
    events: broadcast::Sender<SyncRun>,
    draining: DashMap<String, ()>,
}

impl SyncCoordinator {
    pub fn new(
        queue: Arc<MutationQueue>,
        records: Arc<RecordStore>,
        cache: Arc<TieredCache>,
        transport: Arc<dyn Transport>,
        domains: Arc<DomainTable>,
        settings: SyncSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            queue,
            records,
            cache,
            transport,
            domains,
            history: SyncHistory::new(settings.history_limit),
            settings,
            events,
            draining: DashMap::new(),
        }
    }

    /// Completed runs are broadcast here. Slow receivers may miss runs.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncRun> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn history(&self) -> Vec<SyncRun> {
        self.history.snapshot()
    }

    #[must_use]
    pub fn is_draining(&self, domain: &str) -> bool {
        self.draining.contains_key(domain)
    }

    fn try_lock_domain(&self, domain: &str) -> Option<DrainGuard<'_>> {
        if self.draining.insert(domain.to_string(), ()).is_some() {
            return None;
        }
        Some(DrainGuard {
            draining: &self.draining,
            domain: domain.to_string(),
        })
    }

    /// Drain one domain. Returns `None` if a drain of it is already running.
    #[tracing::instrument(skip(self))]
    pub async fn sync_domain(&self, domain: &str) -> Result<Option<SyncRun>, OfflineError> {
        let Some(_guard) = self.try_lock_domain(domain) else {
            debug!(domain, "Drain already in progress, skipping");
            return Ok(None);
        };

        let started = Instant::now();
        let mut run = SyncRun::begin(domain);
        let ids = self.queue.pending_ids(domain).await?;
        let batch_size = self.settings.batch_size.max(1);

        for batch in ids.chunks(batch_size) {
            debug!(domain, batch = batch.len(), "Replaying batch");
            for id in batch {
                let mutation = match self.queue.get(id).await {
                    Ok(Some(mutation)) if mutation.state == MutationState::Pending => mutation,
                    Ok(_) => continue,
                    Err(StorageError::Corrupt { reason, .. }) => {
                        error!(domain, id = %id, reason = %reason, "Queued mutation cannot be decoded, dropping it");
                        if let Err(err) = self.queue.remove(id).await {
                            error!(domain, id = %id, error = %err, "Failed to drop undecodable mutation");
                        }
                        run.dropped += 1;
                        crate::metrics::record_replay(domain, "dropped");
                        continue;
                    }
                    Err(err) => {
                        warn!(domain, id = %id, error = %err, "Queued mutation could not be loaded");
                        run.failed += 1;
                        crate::metrics::record_replay(domain, "failed");
                        continue;
                    }
                };

                let outcome = match self.replay(mutation).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        self.release(id, &err).await;
                        ReplayOutcome::Failed
                    }
                };

                match outcome {
                    ReplayOutcome::Succeeded => {
                        run.succeeded += 1;
                        crate::metrics::record_replay(domain, "succeeded");
                    }
                    ReplayOutcome::Failed => {
                        run.failed += 1;
                        crate::metrics::record_replay(domain, "failed");
                    }
                    ReplayOutcome::Conflict { record, retry } => {
                        run.conflicted += 1;
                        if retry {
                            run.failed += 1;
                            crate::metrics::record_replay(domain, "failed");
                        } else if record.resolution == Resolution::Deferred {
                            run.deferred += 1;
                            crate::metrics::record_replay(domain, "deferred");
                        } else {
                            crate::metrics::record_replay(domain, "conflicted");
                        }
                        crate::metrics::record_conflict(domain, record.kind.as_str(), record.resolution.as_str());
                        run.conflicts.push(record);
                    }
                }
            }
            tokio::task::yield_now().await;
        }

        run.finished_at = Utc::now();
        crate::metrics::record_sync_run(domain, started.elapsed());
        match self.queue.count(domain, MutationState::Pending).await {
            Ok(depth) => crate::metrics::set_queue_depth(domain, depth),
            Err(err) => warn!(domain, error = %err, "Queue depth unavailable"),
        }
        info!(
            domain,
            succeeded = run.succeeded,
            failed = run.failed,
            dropped = run.dropped,
            conflicted = run.conflicted,
            deferred = run.deferred,
            "Sync run complete"
        );

        self.history.push(run.clone());
        // No receivers is fine
        let _ = self.events.send(run.clone());
        Ok(Some(run))
    }

    /// Drain every domain that has pending work, oldest work first.
    pub async fn sync_all(&self) -> Result<Vec<SyncRun>, OfflineError> {
        let mut runs = Vec::new();
        for domain in self.queue.domains_with_pending().await? {
            if let Some(run) = self.sync_domain(&domain).await? {
                runs.push(run);
            }
        }
        Ok(runs)
    }

    /// Put an item whose replay hit a local error back in the queue.
    async fn release(&self, id: &str, cause: &OfflineError) {
        crate::metrics::record_storage_error("sync_replay");
        error!(id, error = %cause, "Replay interrupted by a local error, item goes back to pending");
        if let Err(err) = self.queue.set_state(id, MutationState::Pending).await {
            error!(id, error = %err, "Failed to reset interrupted mutation");
        }
    }

    /// Cached reads of the target are stale now. Failing to drop them only
    /// costs a refetch.
    async fn invalidate_cached(&self, url: &str) {
        if let Err(err) = self.cache.invalidate_url(url).await {
            crate::metrics::record_storage_error("cache_invalidate");
            error!(url, error = %err, "Cache invalidation failed");
        }
    }

    /// One network attempt. `Ok` only for answers that settle the item
    /// (2xx, 409, 404, 410); everything else is a transient failure.
    async fn send_once(&self, request: &RequestDescriptor) -> Result<Response, OfflineError> {
        let _timer = crate::metrics::NetworkTimer::start();
        match timeout(self.settings.network_timeout, self.transport.send(request)).await {
            Err(_) => {
                crate::metrics::record_network_timeout();
                Err(OfflineError::Timeout(self.settings.network_timeout))
            }
            Ok(Err(err)) => Err(err),
            Ok(Ok(response)) if response.is_success() || matches!(response.status, 404 | 409 | 410) => {
                Ok(response)
            }
            Ok(Ok(response)) => Err(OfflineError::ServerRejected {
                status: response.status,
            }),
        }
    }

    async fn replay(&self, mutation: QueuedMutation) -> Result<ReplayOutcome, OfflineError> {
        self.queue.set_state(&mutation.id, MutationState::InFlight).await?;
        let request = mutation.to_request();
        let (request, id) = (&request, mutation.id.as_str());

        let attempt = retry("replay_mutation", &self.settings.retry, || async move {
            match self.send_once(request).await {
                Ok(response) => Ok(response),
                Err(err) => {
                    if let Err(store_err) = self.queue.record_attempt(id).await {
                        error!(id, error = %store_err, "Failed to record replay attempt");
                    }
                    Err(err)
                }
            }
        })
        .await;

        match attempt {
            Ok(response) => self.settle(mutation, response).await,
            Err(err) => {
                self.queue.set_state(&mutation.id, MutationState::Pending).await?;
                warn!(
                    domain = %mutation.domain,
                    id = %mutation.id,
                    url = %mutation.url,
                    error = %err,
                    "Replay attempts exhausted, item stays queued"
                );
                Ok(ReplayOutcome::Failed)
            }
        }
    }

    fn local_json(mutation: &QueuedMutation) -> Option<Value> {
        if !mutation.to_request().has_json_body() {
            return None;
        }
        mutation.body_json().unwrap_or(None)
    }

    async fn settle(&self, mutation: QueuedMutation, response: Response) -> Result<ReplayOutcome, OfflineError> {
        let local = Self::local_json(&mutation);
        let remote = response.json_body().ok();

        match response.status {
            404 | 410 if mutation.method == HttpMethod::Delete => {
                self.complete(&mutation, None).await?;
                Ok(ReplayOutcome::Succeeded)
            }
            404 | 410 => self.on_conflict(mutation, ConflictKind::DeletedRemotely, local, None).await,
            409 => {
                let kind = conflict::classify_rejection(local.as_ref(), remote.as_ref());
                self.on_conflict(mutation, kind, local, remote).await
            }
            _ => {
                // Creates and forced resends are not checked
                if mutation.method != HttpMethod::Post && mutation.resolution_header().is_none() {
                    if let (Some(l), Some(r)) = (local.as_ref(), remote.as_ref()) {
                        if let Some(kind) = conflict::detect_in_success(l, r, &self.settings.merge.version_field) {
                            return self.on_conflict(mutation, kind, local, remote).await;
                        }
                    }
                }
                let server_copy = remote.filter(Value::is_object);
                self.complete(&mutation, server_copy.as_ref()).await?;
                Ok(ReplayOutcome::Succeeded)
            }
        }
    }

    /// Remove a confirmed item and propagate the confirmation.
    async fn complete(&self, mutation: &QueuedMutation, server_copy: Option<&Value>) -> Result<(), OfflineError> {
        self.queue.remove(&mutation.id).await?;
        if let Some(ref record_id) = mutation.record_id {
            self.records.mark_synced(&mutation.domain, record_id, server_copy).await?;
        }
        self.invalidate_cached(&mutation.url).await;
        debug!(domain = %mutation.domain, id = %mutation.id, "Mutation replayed");
        Ok(())
    }

    /// Drop the local change and take the remote state.
    async fn adopt_remote(
        &self,
        mutation: &QueuedMutation,
        kind: ConflictKind,
        remote: Option<&Value>,
    ) -> Result<(), OfflineError> {
        self.queue.remove(&mutation.id).await?;
        if let Some(ref record_id) = mutation.record_id {
            if kind == ConflictKind::DeletedRemotely {
                self.records.remove(&mutation.domain, record_id).await?;
            } else if let Some(remote) = remote {
                let mut record = SyncRecord::new(&mutation.domain, record_id, remote.clone());
                record.synced = true;
                self.records.upsert(&record).await?;
            }
        }
        self.invalidate_cached(&mutation.url).await;
        Ok(())
    }

    async fn on_conflict(
        &self,
        mut mutation: QueuedMutation,
        kind: ConflictKind,
        local: Option<Value>,
        remote: Option<Value>,
    ) -> Result<ReplayOutcome, OfflineError> {
        let mut record = ConflictRecord::new(&mutation, kind, local.clone(), remote.clone());
        let policy = self.domains.policy_for(&mutation.domain, self.settings.default_policy);
        debug!(domain = %mutation.domain, item = %record.item_id, kind = kind.as_str(), ?policy, "Conflict detected");

        let applied = match policy {
            ConflictPolicy::Client => {
                mutation.set_resolution_header(Resolution::Client);
                self.resend(&mut mutation, Resolution::Client, None).await?
            }
            ConflictPolicy::Server => {
                self.adopt_remote(&mutation, kind, remote.as_ref()).await?;
                Applied::Resolved(Resolution::Server)
            }
            ConflictPolicy::Merge => {
                let merged = match (kind, local.as_ref(), remote.as_ref()) {
                    (ConflictKind::ConcurrentlyModified, Some(l), Some(r)) => {
                        conflict::merge(l, r, &self.settings.merge, Utc::now())
                    }
                    _ => None,
                };
                match merged {
                    Some(merged) => {
                        mutation.rewrite(&merged, Resolution::Merged);
                        self.resend(&mut mutation, Resolution::Merged, Some(merged)).await?
                    }
                    None => Applied::Defer,
                }
            }
            ConflictPolicy::Manual => Applied::Defer,
        };

        match applied {
            Applied::Resolved(resolution) => {
                record.resolution = resolution;
                info!(domain = %record.domain, item = %record.item_id, resolution = resolution.as_str(), "Conflict resolved");
                Ok(ReplayOutcome::Conflict { record, retry: false })
            }
            Applied::Retry(resolution) => {
                record.resolution = resolution;
                Ok(ReplayOutcome::Conflict { record, retry: true })
            }
            Applied::Defer => {
                record.resolution = Resolution::Deferred;
                self.queue.defer(&record).await?;
                warn!(
                    domain = %record.domain,
                    item = %record.item_id,
                    kind = kind.as_str(),
                    "Conflict deferred for manual resolution"
                );
                Ok(ReplayOutcome::Conflict { record, retry: false })
            }
        }
    }

    /// Send a resolved payload once. A transient failure stores the rewritten
    /// item back as pending so the next run sends the resolved version.
    async fn resend(
        &self,
        mutation: &mut QueuedMutation,
        resolution: Resolution,
        resolved_copy: Option<Value>,
    ) -> Result<Applied, OfflineError> {
        match self.send_once(&mutation.to_request()).await {
            Ok(response) if response.is_success() => {
                let server_copy = response.json_body().ok().filter(Value::is_object).or(resolved_copy);
                self.complete(mutation, server_copy.as_ref()).await?;
                Ok(Applied::Resolved(resolution))
            }
            Ok(response) => {
                debug!(status = response.status, "Resolved payload rejected again");
                Ok(Applied::Defer)
            }
            Err(err) => {
                mutation.state = MutationState::Pending;
                self.queue.update(mutation).await?;
                self.queue.record_attempt(&mutation.id).await?;
                warn!(id = %mutation.id, error = %err, "Resolved payload not delivered, item stays queued");
                Ok(Applied::Retry(resolution))
            }
        }
    }

    pub async fn deferred_conflicts(&self) -> Result<Vec<ConflictRecord>, OfflineError> {
        Ok(self.queue.deferred_conflicts().await?)
    }

    /// Apply a manual answer to a deferred conflict.
    ///
    /// `KeepLocal` and `Replace` put the item back in the queue for the next
    /// run; `AcceptRemote` settles it immediately. Returns `None` for an
    /// unknown conflict id.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        answer: ManualResolution,
    ) -> Result<Option<Resolution>, OfflineError> {
        let Some(conflict) = self.queue.conflict(conflict_id).await? else {
            return Ok(None);
        };
        let Some(mut mutation) = self.queue.get(&conflict.mutation_id).await? else {
            self.queue.remove_conflict(conflict_id).await?;
            return Ok(None);
        };

        let resolution = match answer {
            ManualResolution::KeepLocal => {
                mutation.set_resolution_header(Resolution::Client);
                mutation.state = MutationState::Pending;
                self.queue.update(&mutation).await?;
                Resolution::Client
            }
            ManualResolution::Replace(value) => {
                mutation.rewrite(&value, Resolution::Merged);
                mutation.state = MutationState::Pending;
                self.queue.update(&mutation).await?;
                Resolution::Merged
            }
            ManualResolution::AcceptRemote => {
                self.adopt_remote(&mutation, conflict.kind, conflict.remote_version.as_ref())
                    .await?;
                Resolution::Server
            }
        };

        self.queue.remove_conflict(conflict_id).await?;
        crate::metrics::record_conflict(&conflict.domain, conflict.kind.as_str(), resolution.as_str());
        info!(
            domain = %conflict.domain,
            item = %conflict.item_id,
            resolution = resolution.as_str(),
            "Deferred conflict resolved manually"
        );
        Ok(Some(resolution))
    }

    /// Save records handed over by a collaborator and queue them for push.
    ///
    /// Each record becomes `PUT {endpoint}/{id}` (or `DELETE` for a
    /// tombstone). A still-pending push of the same record is replaced.
    pub async fn stage_for_sync(&self, domain: &str, records: Vec<SyncRecord>) -> Result<usize, OfflineError> {
        if self.domains.get(domain).is_none() {
            return Err(OfflineError::Config(format!("unknown sync domain {}", domain)));
        }

        let mut staged = 0;
        for mut record in records {
            let url = self.domains.record_url(domain, &record.id)?;
            let request = if record.deleted {
                RequestDescriptor::new(HttpMethod::Delete, url)
            } else {
                RequestDescriptor::new(HttpMethod::Put, url).with_json(&record.data)
            };
            let mutation = QueuedMutation::from_request(domain, &request)?.with_record_id(&record.id);

            record.domain = domain.to_string();
            record.synced = false;
            self.records.upsert(&record).await?;
            self.queue.remove_pending_for_record(domain, &record.id).await?;
            self.queue.enqueue(&mutation).await?;
            staged += 1;
        }

        debug!(domain, staged, "Records staged for sync");
        Ok(staged)
    }
}
