//! Eviction passes over the blob store.
//!
//! A pass runs when a tier's occupied bytes exceed its budget, either right
//! after a write ([`crate::cache::TieredCache::put`]) or from the periodic
//! job in the service loop. Keys with a write in progress are skipped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use super::policy::RetentionPolicy;
use crate::cache::{CacheTier, TierBudgets};
use crate::storage::traits::{BlobStore, StorageError};

/// Registry of `(tier, key)` slots with a write in progress.
#[derive(Debug, Default)]
pub struct WriteGuards {
    active: DashMap<(CacheTier, String), usize>,
}

impl WriteGuards {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a write as started. The slot is released when the guard drops.
    pub fn begin(self: &Arc<Self>, tier: CacheTier, key: &str) -> WriteGuard {
        let slot = (tier, key.to_string());
        *self.active.entry(slot.clone()).or_insert(0) += 1;
        WriteGuard {
            guards: Arc::clone(self),
            slot,
        }
    }

    #[must_use]
    pub fn is_writing(&self, tier: CacheTier, key: &str) -> bool {
        self.active.contains_key(&(tier, key.to_string()))
    }

    #[must_use]
    pub fn in_progress(&self) -> usize {
        self.active.len()
    }
}

/// RAII release for a [`WriteGuards`] slot.
pub struct WriteGuard {
    guards: Arc<WriteGuards>,
    slot: (CacheTier, String),
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if let Some(mut count) = self.guards.active.get_mut(&self.slot) {
            *count = count.saturating_sub(1);
        }
        self.guards.active.remove_if(&self.slot, |_, count| *count == 0);
    }
}

/// Outcome of one pass over one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionReport {
    pub tier: CacheTier,
    pub evicted: Vec<String>,
    pub freed_bytes: usize,
    pub occupied_before: usize,
    /// Recomputed from the store after deletion
    pub occupied_after: usize,
    pub budget: usize,
}

impl EvictionReport {
    #[must_use]
    pub fn within_budget(&self) -> bool {
        self.occupied_after <= self.budget
    }
}

/// Lifetime totals across passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionStats {
    pub passes: u64,
    pub evicted_entries: u64,
    pub evicted_bytes: u64,
}

pub struct EvictionEngine {
    store: Arc<dyn BlobStore>,
    budgets: TierBudgets,
    policy: RetentionPolicy,
    writes: Arc<WriteGuards>,
    passes: AtomicU64,
    evicted_entries: AtomicU64,
    evicted_bytes: AtomicU64,
}

impl EvictionEngine {
    pub fn new(
        store: Arc<dyn BlobStore>,
        budgets: TierBudgets,
        policy: RetentionPolicy,
        writes: Arc<WriteGuards>,
    ) -> Self {
        Self {
            store,
            budgets,
            policy,
            writes,
            passes: AtomicU64::new(0),
            evicted_entries: AtomicU64::new(0),
            evicted_bytes: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn budget(&self, tier: CacheTier) -> usize {
        self.budgets.get(tier)
    }

    #[must_use]
    pub fn budgets(&self) -> &TierBudgets {
        &self.budgets
    }

    #[must_use]
    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Evict from `tier` if it is over budget.
    pub async fn evict_tier(&self, tier: CacheTier) -> Result<EvictionReport, StorageError> {
        let budget = self.budget(tier);
        let entries = self.store.entries(tier).await?;
        let occupied_before: usize = entries.iter().map(|e| e.size_bytes).sum();

        let victims = self
            .policy
            .select_victims(&entries, occupied_before, budget, |key| self.writes.is_writing(tier, key));

        let mut evicted = Vec::with_capacity(victims.len());
        let mut freed_bytes = 0;
        for victim in victims {
            // A write may have started since selection
            if self.writes.is_writing(tier, &victim.key) {
                continue;
            }
            if self.store.delete(tier, &victim.key).await? {
                debug!(tier = %tier, key = %victim.key, size = victim.size_bytes, "Evicted cache entry");
                freed_bytes += victim.size_bytes;
                evicted.push(victim.key);
            }
        }

        let occupied_after = if evicted.is_empty() {
            occupied_before
        } else {
            self.store.occupied_bytes(tier).await?
        };
        crate::metrics::set_tier_bytes(tier.as_str(), occupied_after);

        if !evicted.is_empty() {
            self.passes.fetch_add(1, Ordering::Relaxed);
            self.evicted_entries.fetch_add(evicted.len() as u64, Ordering::Relaxed);
            self.evicted_bytes.fetch_add(freed_bytes as u64, Ordering::Relaxed);
            crate::metrics::record_eviction(tier.as_str(), evicted.len(), freed_bytes);
            info!(
                tier = %tier,
                evicted = evicted.len(),
                freed_bytes,
                occupied_after,
                budget,
                "Eviction pass complete"
            );
        }

        Ok(EvictionReport {
            tier,
            evicted,
            freed_bytes,
            occupied_before,
            occupied_after,
            budget,
        })
    }

    /// One pass over every tier.
    pub async fn evict_all(&self) -> Result<Vec<EvictionReport>, StorageError> {
        let mut reports = Vec::with_capacity(CacheTier::ALL.len());
        for tier in CacheTier::ALL {
            reports.push(self.evict_tier(tier).await?);
        }
        Ok(reports)
    }

    #[must_use]
    pub fn stats(&self) -> EvictionStats {
        EvictionStats {
            passes: self.passes.load(Ordering::Relaxed),
            evicted_entries: self.evicted_entries.load(Ordering::Relaxed),
            evicted_bytes: self.evicted_bytes.load(Ordering::Relaxed),
        }
    }
}
