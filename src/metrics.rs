// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the offline core.
//!
//! Uses the `metrics` crate facade. The host application installs the
//! exporter; without one every call is a no-op.
//!
//! # Metric Naming Convention
//! - `offline_core_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size gauges
//!
//! # Labels
//! - `tier`: static, dynamic, api, assets, telemetry, auxiliary
//! - `strategy`: cache_first, network_first, stale_while_revalidate, network_with_fallback
//! - `domain`: sync domain (alarms, settings, general, ...)

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a cache lookup (`outcome`: hit, miss)
pub fn record_cache_lookup(tier: &str, outcome: &str) {
    counter!(
        "offline_core_cache_lookups_total",
        "tier" => tier.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a cache write (`status`: stored, rejected, dropped)
pub fn record_cache_write(tier: &str, status: &str) {
    counter!(
        "offline_core_cache_writes_total",
        "tier" => tier.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Set current occupied bytes of a tier
pub fn set_tier_bytes(tier: &str, bytes: usize) {
    gauge!("offline_core_tier_bytes", "tier" => tier.to_string()).set(bytes as f64);
}

/// Record entries removed by an eviction pass
pub fn record_eviction(tier: &str, count: usize, bytes: usize) {
    counter!("offline_core_evictions_total", "tier" => tier.to_string()).increment(count as u64);
    counter!("offline_core_evicted_bytes_total", "tier" => tier.to_string()).increment(bytes as u64);
}

/// Record which source answered a routed request
pub fn record_strategy_outcome(strategy: &str, source: &str) {
    counter!(
        "offline_core_strategy_outcomes_total",
        "strategy" => strategy.to_string(),
        "source" => source.to_string()
    )
    .increment(1);
}

/// Record network call latency
pub fn record_network_latency(duration: Duration) {
    histogram!("offline_core_network_seconds").record(duration.as_secs_f64());
}

/// Record a network call that hit its deadline
pub fn record_network_timeout() {
    counter!("offline_core_network_timeouts_total").increment(1);
}

/// Record a mutation accepted into the queue
pub fn record_mutation_enqueued(domain: &str) {
    counter!("offline_core_mutations_enqueued_total", "domain" => domain.to_string()).increment(1);
}

/// Record a mutation dropped before queueing (malformed payload)
pub fn record_mutation_dropped(domain: &str) {
    counter!("offline_core_mutations_dropped_total", "domain" => domain.to_string()).increment(1);
}

/// Record the outcome of one replayed item
/// (`outcome`: succeeded, failed, conflicted, deferred)
pub fn record_replay(domain: &str, outcome: &str) {
    counter!(
        "offline_core_replays_total",
        "domain" => domain.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set pending queue depth of a domain
pub fn set_queue_depth(domain: &str, depth: u64) {
    gauge!("offline_core_queue_depth", "domain" => domain.to_string()).set(depth as f64);
}

/// Record a completed sync run
pub fn record_sync_run(domain: &str, duration: Duration) {
    counter!("offline_core_sync_runs_total", "domain" => domain.to_string()).increment(1);
    histogram!("offline_core_sync_run_seconds", "domain" => domain.to_string())
        .record(duration.as_secs_f64());
}

/// Record a conflict by kind and resolution
pub fn record_conflict(domain: &str, kind: &str, resolution: &str) {
    counter!(
        "offline_core_conflicts_total",
        "domain" => domain.to_string(),
        "kind" => kind.to_string(),
        "resolution" => resolution.to_string()
    )
    .increment(1);
}

/// Record how a background task ended (`outcome`: ok, failed, panicked)
pub fn record_background_task(task: &str, outcome: &str) {
    counter!(
        "offline_core_background_tasks_total",
        "task" => task.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set connectivity (1 online, 0 offline)
pub fn set_online(online: bool) {
    gauge!("offline_core_online").set(if online { 1.0 } else { 0.0 });
}

/// Record service state transitions (one-hot gauge)
pub fn set_service_state(state: &str) {
    for s in ["created", "running", "stopping", "stopped"] {
        gauge!("offline_core_service_state", "state" => s).set(if s == state { 1.0 } else { 0.0 });
    }
}

/// Record storage backend errors
pub fn record_storage_error(operation: &str) {
    counter!("offline_core_storage_errors_total", "operation" => operation.to_string()).increment(1);
}

/// A timing guard that records network latency on drop
pub struct NetworkTimer {
    start: Instant,
}

impl NetworkTimer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }
}

impl Drop for NetworkTimer {
    fn drop(&mut self) {
        record_network_latency(self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // No recorder is installed, so these only check the calls don't panic.

    #[test]
    fn test_cache_metrics() {
        record_cache_lookup("api", "hit");
        record_cache_lookup("static", "miss");
        record_cache_write("assets", "dropped");
        set_tier_bytes("dynamic", 4096);
        record_eviction("api", 2, 80);
    }

    #[test]
    fn test_sync_metrics() {
        record_mutation_enqueued("alarms");
        record_mutation_dropped("general");
        record_replay("alarms", "succeeded");
        set_queue_depth("settings", 3);
        record_sync_run("alarms", Duration::from_millis(12));
        record_conflict("alarms", "concurrently_modified", "merged");
    }

    #[test]
    fn test_state_and_timer() {
        set_service_state("running");
        set_online(false);
        record_background_task("revalidate", "failed");
        let _timer = NetworkTimer::start();
    }
}
