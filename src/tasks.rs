// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Supervised background tasks.
//!
//! Detached work (cache revalidation, connectivity-triggered sync) runs
//! here instead of bare `tokio::spawn`. Failures and panics are logged and
//! counted but never reach the code that spawned the task.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use crate::error::OfflineError;

/// Outcome counters since creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub spawned: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    pub running: usize,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Counters {
    spawned: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    last_error: Mutex<Option<String>>,
}

#[derive(Default)]
pub struct BackgroundTasks {
    set: Mutex<JoinSet<()>>,
    counters: Arc<Counters>,
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a detached task. Must be called inside a tokio runtime.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), OfflineError>> + Send + 'static,
    {
        let counters = Arc::clone(&self.counters);
        counters.spawned.fetch_add(1, Ordering::Relaxed);

        let mut set = self.set.lock();
        Self::reap(&mut set, &self.counters);
        set.spawn(async move {
            match task.await {
                Ok(()) => {
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::record_background_task(name, "ok");
                    debug!(task = name, "Background task finished");
                }
                Err(err) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    *counters.last_error.lock() = Some(format!("{}: {}", name, err));
                    crate::metrics::record_background_task(name, "failed");
                    warn!(task = name, error = %err, "Background task failed");
                }
            }
        });
    }

    fn reap(set: &mut JoinSet<()>, counters: &Counters) {
        while let Some(res) = set.try_join_next() {
            if let Err(err) = res {
                Self::record_join_error(err, counters);
            }
        }
    }

    fn record_join_error(err: JoinError, counters: &Counters) {
        if err.is_panic() {
            counters.panicked.fetch_add(1, Ordering::Relaxed);
            *counters.last_error.lock() = Some("background task panicked".to_string());
            crate::metrics::record_background_task("unknown", "panicked");
            warn!("Background task panicked");
        }
    }

    /// Wait until every spawned task (including ones spawned meanwhile) ends.
    pub async fn wait_idle(&self) {
        loop {
            let mut set = std::mem::take(&mut *self.set.lock());
            if set.is_empty() {
                return;
            }
            while let Some(res) = set.join_next().await {
                if let Err(err) = res {
                    Self::record_join_error(err, &self.counters);
                }
            }
        }
    }

    /// Abort everything still running.
    pub async fn abort_all(&self) {
        let mut set = std::mem::take(&mut *self.set.lock());
        set.abort_all();
        while let Some(res) = set.join_next().await {
            if let Err(err) = res {
                Self::record_join_error(err, &self.counters);
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> TaskStats {
        let running = {
            let mut set = self.set.lock();
            Self::reap(&mut set, &self.counters);
            set.len()
        };
        TaskStats {
            spawned: self.counters.spawned.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
            running,
            last_error: self.counters.last_error.lock().clone(),
        }
    }
}
