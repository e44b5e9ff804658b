// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::queue::ConflictRecord;

/// Result of one drain of one domain's queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRun {
    pub id: String,
    pub domain: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: u32,
    /// Attempts exhausted this run; the items stay pending
    pub failed: u32,
    /// Conflicts detected this run, whatever their resolution
    pub conflicted: u32,
    /// Conflicts parked for manual resolution this run
    pub deferred: u32,
    /// Undecodable items removed from the queue
    pub dropped: u32,
    pub conflicts: Vec<ConflictRecord>,
}

impl SyncRun {
    pub(crate) fn begin(domain: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            domain: domain.to_string(),
            started_at: now,
            finished_at: now,
            succeeded: 0,
            failed: 0,
            conflicted: 0,
            deferred: 0,
            dropped: 0,
            conflicts: Vec::new(),
        }
    }

    /// Conflicts resolved automatically this run.
    #[must_use]
    pub fn resolved(&self) -> u32 {
        self.conflicted.saturating_sub(self.deferred)
    }

    #[must_use]
    pub fn has_unresolved(&self) -> bool {
        self.deferred > 0
    }
}

/// Bounded ring of recent runs; the oldest is dropped first.
pub struct SyncHistory {
    limit: usize,
    runs: Mutex<VecDeque<SyncRun>>,
}

impl SyncHistory {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            runs: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    pub fn push(&self, run: SyncRun) {
        let mut runs = self.runs.lock();
        while runs.len() >= self.limit {
            runs.pop_front();
        }
        runs.push_back(run);
    }

    /// Oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SyncRun> {
        self.runs.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn latest(&self, domain: &str) -> Option<SyncRun> {
        self.runs.lock().iter().rev().find(|r| r.domain == domain).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.lock().is_empty()
    }
}
