// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed blob cache.
//!
//! One row per `(tier, key)`; access metadata lives in columns beside the
//! payload rather than in response headers:
//!
//! ```sql
//! CREATE TABLE cache_entries (
//!   tier TEXT NOT NULL,
//!   key TEXT NOT NULL,
//!   status INTEGER NOT NULL,
//!   content_type TEXT,
//!   headers TEXT NOT NULL,       -- JSON array of [name, value]
//!   body BLOB NOT NULL,
//!   size_bytes INTEGER NOT NULL,
//!   inserted_at INTEGER NOT NULL,
//!   last_accessed_at INTEGER NOT NULL,
//!   access_count INTEGER NOT NULL,
//!   PRIMARY KEY (tier, key)
//! )
//! ```

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use super::sqlite::{execute_schema, open_pool};
use super::traits::{BlobStore, StorageError};
use crate::cache::entry::{AccessMetadata, CacheEntry, CachedPayload, EntryInfo};
use crate::cache::CacheTier;

pub struct SqliteBlobStore {
    pool: SqlitePool,
}

impl SqliteBlobStore {
    /// Open (or create) the blob cache. `None` keeps it in memory.
    pub async fn open(path: Option<&Path>) -> Result<Self, StorageError> {
        let pool = open_pool(path).await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        execute_schema(
            &self.pool,
            "blob_cache_schema",
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                tier TEXT NOT NULL,
                key TEXT NOT NULL,
                status INTEGER NOT NULL,
                content_type TEXT,
                headers TEXT NOT NULL DEFAULT '[]',
                body BLOB NOT NULL,
                size_bytes INTEGER NOT NULL,
                inserted_at INTEGER NOT NULL,
                last_accessed_at INTEGER NOT NULL DEFAULT 0,
                access_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (tier, key)
            )
            "#,
        )
        .await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_entry(row: &SqliteRow) -> Result<CacheEntry, StorageError> {
        let key: String = row.try_get("key")?;
        let status: i64 = row.try_get("status")?;
        let content_type: Option<String> = row.try_get("content_type")?;
        let headers_json: String = row.try_get("headers")?;
        let body: Vec<u8> = row.try_get("body")?;
        let size_bytes: i64 = row.try_get("size_bytes")?;

        let headers: Vec<(String, String)> = serde_json::from_str(&headers_json).map_err(|e| {
            StorageError::Corrupt {
                id: key.clone(),
                reason: format!("headers: {}", e),
            }
        })?;

        Ok(CacheEntry {
            key,
            payload: CachedPayload {
                status: status as u16,
                content_type,
                headers,
                body,
            },
            size_bytes: size_bytes as usize,
            meta: Self::row_to_meta(row)?,
        })
    }

    fn row_to_meta(row: &SqliteRow) -> Result<AccessMetadata, StorageError> {
        let inserted_at: i64 = row.try_get("inserted_at")?;
        let last_accessed_at: i64 = row.try_get("last_accessed_at")?;
        let access_count: i64 = row.try_get("access_count")?;
        Ok(AccessMetadata {
            inserted_at: inserted_at as u64,
            last_accessed_at: last_accessed_at as u64,
            access_count: access_count as u64,
        })
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn get(&self, tier: CacheTier, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let row = sqlx::query("SELECT * FROM cache_entries WHERE tier = ? AND key = ?")
            .bind(tier.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn touch(&self, tier: CacheTier, key: &str, now: u64) -> Result<Option<CacheEntry>, StorageError> {
        let row = sqlx::query(
            "UPDATE cache_entries \
             SET access_count = access_count + 1, last_accessed_at = MAX(last_accessed_at, ?) \
             WHERE tier = ? AND key = ? \
             RETURNING *",
        )
        .bind(now as i64)
        .bind(tier.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn put(&self, tier: CacheTier, entry: &CacheEntry) -> Result<(), StorageError> {
        let headers = serde_json::to_string(&entry.payload.headers).map_err(|e| StorageError::Corrupt {
            id: entry.key.clone(),
            reason: format!("headers: {}", e),
        })?;

        sqlx::query(
            "INSERT INTO cache_entries \
             (tier, key, status, content_type, headers, body, size_bytes, inserted_at, last_accessed_at, access_count) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(tier, key) DO UPDATE SET \
                status = excluded.status, \
                content_type = excluded.content_type, \
                headers = excluded.headers, \
                body = excluded.body, \
                size_bytes = excluded.size_bytes, \
                inserted_at = excluded.inserted_at, \
                last_accessed_at = excluded.last_accessed_at, \
                access_count = excluded.access_count",
        )
        .bind(tier.as_str())
        .bind(&entry.key)
        .bind(entry.payload.status as i64)
        .bind(entry.payload.content_type.as_deref())
        .bind(headers)
        .bind(&entry.payload.body)
        .bind(entry.size_bytes as i64)
        .bind(entry.meta.inserted_at as i64)
        .bind(entry.meta.last_accessed_at as i64)
        .bind(entry.meta.access_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, tier: CacheTier, key: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE tier = ? AND key = ?")
            .bind(tier.as_str())
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn entries(&self, tier: CacheTier) -> Result<Vec<EntryInfo>, StorageError> {
        let rows = sqlx::query(
            "SELECT key, size_bytes, inserted_at, last_accessed_at, access_count \
             FROM cache_entries WHERE tier = ?",
        )
        .bind(tier.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let key: String = row.try_get("key")?;
                let size_bytes: i64 = row.try_get("size_bytes")?;
                Ok(EntryInfo {
                    key,
                    size_bytes: size_bytes as usize,
                    meta: Self::row_to_meta(row)?,
                })
            })
            .collect()
    }

    async fn clear(&self, tier: CacheTier) -> Result<usize, StorageError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE tier = ?")
            .bind(tier.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn occupied_bytes(&self, tier: CacheTier) -> Result<usize, StorageError> {
        let row = sqlx::query("SELECT COALESCE(SUM(size_bytes), 0) AS total FROM cache_entries WHERE tier = ?")
            .bind(tier.as_str())
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.try_get("total")?;
        Ok(total as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(key: &str, size: usize) -> CacheEntry {
        let mut payload = CachedPayload::new(200, Some("application/json".into()), vec![1u8; size]);
        payload.headers.push(("etag".into(), "\"v1\"".into()));
        CacheEntry::with_metadata(key, payload, AccessMetadata::fresh(10_000))
    }

    #[tokio::test]
    async fn test_put_get_preserves_payload_and_metadata() {
        let store = SqliteBlobStore::open(None).await.unwrap();
        let original = entry("GET https://x.test/api/alarms", 32);
        store.put(CacheTier::Api, &original).await.unwrap();

        let loaded = store.get(CacheTier::Api, &original.key).await.unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn test_touch_updates_in_one_statement() {
        let store = SqliteBlobStore::open(None).await.unwrap();
        store.put(CacheTier::Api, &entry("k", 4)).await.unwrap();

        let touched = store.touch(CacheTier::Api, "k", 20_000).await.unwrap().unwrap();
        assert_eq!(touched.meta.access_count, 1);
        assert_eq!(touched.meta.last_accessed_at, 20_000);

        // Older clock reading must not move last access backwards
        let touched = store.touch(CacheTier::Api, "k", 15_000).await.unwrap().unwrap();
        assert_eq!(touched.meta.access_count, 2);
        assert_eq!(touched.meta.last_accessed_at, 20_000);

        assert!(store.touch(CacheTier::Api, "missing", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites_and_sums_sizes() {
        let store = SqliteBlobStore::open(None).await.unwrap();
        store.put(CacheTier::Dynamic, &entry("a", 10)).await.unwrap();
        store.put(CacheTier::Dynamic, &entry("a", 30)).await.unwrap();
        store.put(CacheTier::Dynamic, &entry("b", 5)).await.unwrap();

        assert_eq!(store.occupied_bytes(CacheTier::Dynamic).await.unwrap(), 35);
        assert_eq!(store.entries(CacheTier::Dynamic).await.unwrap().len(), 2);
        assert_eq!(store.occupied_bytes(CacheTier::Api).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let store = SqliteBlobStore::open(Some(&path)).await.unwrap();
            store.put(CacheTier::Static, &entry("app.js", 64)).await.unwrap();
            store.close().await;
        }

        let store = SqliteBlobStore::open(Some(&path)).await.unwrap();
        let loaded = store.get(CacheTier::Static, "app.js").await.unwrap();
        assert_eq!(loaded.map(|e| e.size_bytes), Some(64));
    }

    #[tokio::test]
    async fn test_clear_and_delete() {
        let store = SqliteBlobStore::open(None).await.unwrap();
        store.put(CacheTier::Assets, &entry("a", 1)).await.unwrap();
        store.put(CacheTier::Assets, &entry("b", 1)).await.unwrap();

        assert!(store.delete(CacheTier::Assets, "a").await.unwrap());
        assert!(!store.delete(CacheTier::Assets, "a").await.unwrap());
        assert_eq!(store.clear(CacheTier::Assets).await.unwrap(), 1);
        assert!(store.entries(CacheTier::Assets).await.unwrap().is_empty());
    }
}
