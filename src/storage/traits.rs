use async_trait::async_trait;
use thiserror::Error;

use crate::cache::entry::{CacheEntry, EntryInfo};
use crate::cache::CacheTier;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Stored data for '{id}' could not be decoded: {reason}")]
    Corrupt { id: String, reason: String },
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Blob store namespaced by tier and key.
///
/// Each call is atomic for its key. `touch` is the read path: it records the
/// access and returns the updated entry in one step, so a concurrent delete
/// can never be undone by a stale write-back.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read without recording an access.
    async fn get(&self, tier: CacheTier, key: &str) -> Result<Option<CacheEntry>, StorageError>;

    /// Record an access at `now` and return the updated entry.
    async fn touch(&self, tier: CacheTier, key: &str, now: u64) -> Result<Option<CacheEntry>, StorageError>;

    async fn put(&self, tier: CacheTier, entry: &CacheEntry) -> Result<(), StorageError>;

    /// Returns whether an entry was removed.
    async fn delete(&self, tier: CacheTier, key: &str) -> Result<bool, StorageError>;

    /// Metadata of every live entry in the tier.
    async fn entries(&self, tier: CacheTier) -> Result<Vec<EntryInfo>, StorageError>;

    /// Remove every entry in the tier, returning how many were removed.
    async fn clear(&self, tier: CacheTier) -> Result<usize, StorageError>;

    /// Sum of live entry sizes. Always recomputed from the entries.
    async fn occupied_bytes(&self, tier: CacheTier) -> Result<usize, StorageError> {
        Ok(self.entries(tier).await?.iter().map(|e| e.size_bytes).sum())
    }
}
