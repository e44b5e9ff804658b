use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{BlobStore, StorageError};
use crate::cache::entry::{CacheEntry, EntryInfo};
use crate::cache::CacheTier;

/// Process-local blob store. Used when no data directory is configured.
pub struct InMemoryBlobStore {
    data: DashMap<(CacheTier, String), CacheEntry>,
}

impl InMemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Entry count across all tiers
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, tier: CacheTier, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        Ok(self
            .data
            .get(&(tier, key.to_string()))
            .map(|r| r.value().clone()))
    }

    async fn touch(&self, tier: CacheTier, key: &str, now: u64) -> Result<Option<CacheEntry>, StorageError> {
        Ok(self.data.get_mut(&(tier, key.to_string())).map(|mut r| {
            r.meta.record_access(now);
            r.value().clone()
        }))
    }

    async fn put(&self, tier: CacheTier, entry: &CacheEntry) -> Result<(), StorageError> {
        self.data.insert((tier, entry.key.clone()), entry.clone());
        Ok(())
    }

    async fn delete(&self, tier: CacheTier, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.remove(&(tier, key.to_string())).is_some())
    }

    async fn entries(&self, tier: CacheTier) -> Result<Vec<EntryInfo>, StorageError> {
        Ok(self
            .data
            .iter()
            .filter(|r| r.key().0 == tier)
            .map(|r| r.value().info())
            .collect())
    }

    async fn clear(&self, tier: CacheTier) -> Result<usize, StorageError> {
        let before = self.data.len();
        self.data.retain(|k, _| k.0 != tier);
        Ok(before - self.data.len())
    }
}
