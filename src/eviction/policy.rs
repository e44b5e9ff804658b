// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use crate::cache::entry::{AccessMetadata, EntryInfo};

/// Recency/frequency retention policy.
///
/// `score = access_count * access_weight_ms + last_accessed_at`, so one
/// access buys `access_weight_ms` of recency. Lowest score is evicted first.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    /// Milliseconds of recency one recorded access is worth
    pub access_weight_ms: u64,
    /// Fraction of the budget a pass evicts down to (hysteresis)
    pub target_ratio: f64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            access_weight_ms: 60_000,
            target_ratio: 0.8,
        }
    }
}

impl RetentionPolicy {
    pub fn new(access_weight_ms: u64, target_ratio: f64) -> Self {
        Self {
            access_weight_ms,
            target_ratio: target_ratio.clamp(0.0, 1.0),
        }
    }

    /// Retention score. Entries without recorded access metadata score 0.
    #[must_use]
    pub fn score(&self, meta: &AccessMetadata) -> u128 {
        if !meta.is_recorded() {
            return 0;
        }
        meta.access_count as u128 * self.access_weight_ms as u128 + meta.last_accessed_at as u128
    }

    /// Occupied bytes a pass evicts down to.
    #[must_use]
    pub fn target_bytes(&self, budget: usize) -> usize {
        (budget as f64 * self.target_ratio).floor() as usize
    }

    /// Pick entries to delete so that `occupied` falls to the target.
    ///
    /// Returns nothing while the tier is within budget. Entries for which
    /// `protected` returns true are never selected. Ties on score go to the
    /// older insertion, then the smaller key, so the order is deterministic.
    pub fn select_victims<F>(
        &self,
        entries: &[EntryInfo],
        occupied: usize,
        budget: usize,
        protected: F,
    ) -> Vec<EntryInfo>
    where
        F: Fn(&str) -> bool,
    {
        if occupied <= budget {
            return Vec::new();
        }

        let target = self.target_bytes(budget);
        let mut candidates: Vec<_> = entries
            .iter()
            .filter(|e| !protected(&e.key))
            .map(|e| (self.score(&e.meta), e))
            .collect();

        candidates.sort_by(|(sa, a), (sb, b)| {
            sa.cmp(sb)
                .then(a.meta.inserted_at.cmp(&b.meta.inserted_at))
                .then(a.key.cmp(&b.key))
        });

        let mut remaining = occupied;
        let mut victims = Vec::new();
        for (_, entry) in candidates {
            if remaining <= target {
                break;
            }
            remaining = remaining.saturating_sub(entry.size_bytes);
            victims.push(entry.clone());
        }
        victims
    }
}
