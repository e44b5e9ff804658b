// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tiered cache facade over a [`BlobStore`].
//!
//! Reads go through `touch`, so every hit updates the entry's access
//! metadata. Writes that push a tier over budget trigger an eviction pass
//! before `put` returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::entry::{now_millis, CacheEntry, CachedPayload};
use super::tier::{CacheTier, TierBudgets};
use crate::error::OfflineError;
use crate::eviction::{EvictionEngine, EvictionReport, EvictionStats, RetentionPolicy, WriteGuards};
use crate::http::{cache_key, parent_collection_url, HttpMethod};
use crate::storage::traits::{BlobStore, StorageError};

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Diagnostics for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub tier: CacheTier,
    pub entries: usize,
    pub occupied_bytes: usize,
    pub budget_bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Snapshot returned by [`TieredCache::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub tiers: Vec<TierStats>,
    pub evicted_entries: u64,
    pub evicted_bytes: u64,
}

impl CacheStats {
    #[must_use]
    pub fn tier(&self, tier: CacheTier) -> Option<&TierStats> {
        self.tiers.iter().find(|t| t.tier == tier)
    }

    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.tiers.iter().map(|t| t.occupied_bytes).sum()
    }

    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let hits: u64 = self.tiers.iter().map(|t| t.hits).sum();
        let misses: u64 = self.tiers.iter().map(|t| t.misses).sum();
        if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        }
    }
}

pub struct TieredCache {
    store: Arc<dyn BlobStore>,
    eviction: Arc<EvictionEngine>,
    writes: Arc<WriteGuards>,
    counters: HashMap<CacheTier, TierCounters>,
}

impl TieredCache {
    pub fn new(store: Arc<dyn BlobStore>, budgets: TierBudgets, policy: RetentionPolicy) -> Self {
        let writes = Arc::new(WriteGuards::new());
        let eviction = Arc::new(EvictionEngine::new(
            Arc::clone(&store),
            budgets,
            policy,
            Arc::clone(&writes),
        ));
        let counters = CacheTier::ALL
            .into_iter()
            .map(|t| (t, TierCounters::default()))
            .collect();
        Self {
            store,
            eviction,
            writes,
            counters,
        }
    }

    #[must_use]
    pub fn eviction(&self) -> &Arc<EvictionEngine> {
        &self.eviction
    }

    #[must_use]
    pub fn budget(&self, tier: CacheTier) -> usize {
        self.eviction.budget(tier)
    }

    fn count(&self, tier: CacheTier, hit: bool) {
        if let Some(c) = self.counters.get(&tier) {
            if hit {
                c.hits.fetch_add(1, Ordering::Relaxed);
            } else {
                c.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        crate::metrics::record_cache_lookup(tier.as_str(), if hit { "hit" } else { "miss" });
    }

    /// Read an entry, recording the access.
    pub async fn get(&self, tier: CacheTier, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let entry = self.store.touch(tier, key, now_millis()).await?;
        self.count(tier, entry.is_some());
        debug!(tier = %tier, key, hit = entry.is_some(), "Cache lookup");
        Ok(entry)
    }

    /// Read without touching access metadata or counters.
    pub async fn peek(&self, tier: CacheTier, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        self.store.get(tier, key).await
    }

    /// Search `order` and return the first tier holding `key`.
    pub async fn find_any(
        &self,
        key: &str,
        order: &[CacheTier],
    ) -> Result<Option<(CacheTier, CacheEntry)>, StorageError> {
        for &tier in order {
            if let Some(entry) = self.store.touch(tier, key, now_millis()).await? {
                self.count(tier, true);
                return Ok(Some((tier, entry)));
            }
        }
        Ok(None)
    }

    /// Store a payload, evicting if the tier goes over budget.
    ///
    /// Fails with [`OfflineError::StorageFull`] when the entry cannot fit even
    /// after eviction; in that case nothing is left stored for `key`.
    pub async fn put(&self, tier: CacheTier, key: &str, payload: CachedPayload) -> Result<(), OfflineError> {
        let budget = self.budget(tier);
        let entry = CacheEntry::new(key, payload);
        let size = entry.size_bytes;

        if size > budget {
            crate::metrics::record_cache_write(tier.as_str(), "rejected");
            return Err(OfflineError::StorageFull { tier, size, budget });
        }

        let _guard = self.writes.begin(tier, key);
        self.store.put(tier, &entry).await?;

        let report = self.eviction.evict_tier(tier).await?;
        if !report.within_budget() {
            // Everything evictable is gone and the tier is still full
            self.store.delete(tier, key).await?;
            crate::metrics::record_cache_write(tier.as_str(), "dropped");
            warn!(tier = %tier, key, size, budget, "Entry dropped, tier full after eviction");
            return Err(OfflineError::StorageFull { tier, size, budget });
        }

        crate::metrics::record_cache_write(tier.as_str(), "stored");
        debug!(tier = %tier, key, size, "Cached entry");
        Ok(())
    }

    pub async fn delete(&self, tier: CacheTier, key: &str) -> Result<bool, StorageError> {
        self.store.delete(tier, key).await
    }

    /// Remove `key` from every tier, returning how many copies were removed.
    pub async fn invalidate(&self, key: &str) -> Result<usize, StorageError> {
        let mut removed = 0;
        for tier in CacheTier::ALL {
            if self.store.delete(tier, key).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(key, removed, "Invalidated cached entry");
        }
        Ok(removed)
    }

    /// Drop cached reads of `url` and of its parent collection after a
    /// mutation touched them.
    pub async fn invalidate_url(&self, url: &str) -> Result<usize, StorageError> {
        let mut removed = self.invalidate(&cache_key(HttpMethod::Get, url)).await?;
        if let Some(parent) = parent_collection_url(url) {
            removed += self.invalidate(&cache_key(HttpMethod::Get, &parent)).await?;
        }
        Ok(removed)
    }

    /// Occupied bytes, recomputed from the live entries.
    pub async fn size_of(&self, tier: CacheTier) -> Result<usize, StorageError> {
        self.store.occupied_bytes(tier).await
    }

    pub async fn evict_all(&self) -> Result<Vec<EvictionReport>, StorageError> {
        self.eviction.evict_all().await
    }

    /// Drop every entry in every tier and reset the hit/miss counters.
    pub async fn clear_all(&self) -> Result<usize, StorageError> {
        let mut removed = 0;
        for tier in CacheTier::ALL {
            removed += self.store.clear(tier).await?;
            crate::metrics::set_tier_bytes(tier.as_str(), 0);
        }
        for c in self.counters.values() {
            c.hits.store(0, Ordering::Relaxed);
            c.misses.store(0, Ordering::Relaxed);
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<CacheStats, StorageError> {
        let mut tiers = Vec::with_capacity(CacheTier::ALL.len());
        for tier in CacheTier::ALL {
            let entries = self.store.entries(tier).await?;
            let (hits, misses) = self
                .counters
                .get(&tier)
                .map(|c| (c.hits.load(Ordering::Relaxed), c.misses.load(Ordering::Relaxed)))
                .unwrap_or_default();
            tiers.push(TierStats {
                tier,
                entries: entries.len(),
                occupied_bytes: entries.iter().map(|e| e.size_bytes).sum(),
                budget_bytes: self.budget(tier),
                hits,
                misses,
            });
        }
        let EvictionStats {
            evicted_entries,
            evicted_bytes,
            ..
        } = self.eviction.stats();
        Ok(CacheStats {
            tiers,
            evicted_entries,
            evicted_bytes,
        })
    }
}
