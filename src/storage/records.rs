// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Structured record store, namespaced by domain and queryable by the
//! "unsynced" flag.
//!
//! Collaborators own the record shapes; this store only keeps the JSON, a
//! tombstone flag and whether the remote has confirmed the latest copy.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::debug;

use super::sqlite::{execute_schema, open_pool};
use super::traits::StorageError;
use crate::cache::entry::now_millis;

/// A domain record handed over by a data-owning collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub domain: String,
    pub id: String,
    pub data: Value,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub synced: bool,
    /// Local write time (epoch millis)
    pub updated_at: u64,
}

impl SyncRecord {
    pub fn new(domain: impl Into<String>, id: impl Into<String>, data: Value) -> Self {
        Self {
            domain: domain.into(),
            id: id.into(),
            data,
            deleted: false,
            synced: false,
            updated_at: now_millis(),
        }
    }

    /// A local delete that still has to reach the remote.
    pub fn tombstone(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            deleted: true,
            ..Self::new(domain, id, Value::Null)
        }
    }
}

pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    pub async fn open(path: Option<&Path>) -> Result<Self, StorageError> {
        let pool = open_pool(path).await?;
        let store = Self { pool };
        execute_schema(
            &store.pool,
            "record_store_schema",
            r#"
            CREATE TABLE IF NOT EXISTS records (
                domain TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                synced INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (domain, id)
            )
            "#,
        )
        .await?;
        execute_schema(
            &store.pool,
            "record_store_index",
            "CREATE INDEX IF NOT EXISTS idx_records_unsynced ON records (domain, synced)",
        )
        .await?;
        Ok(store)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_record(row: &SqliteRow) -> Result<SyncRecord, StorageError> {
        let domain: String = row.try_get("domain")?;
        let id: String = row.try_get("id")?;
        let data: String = row.try_get("data")?;
        let deleted: i64 = row.try_get("deleted")?;
        let synced: i64 = row.try_get("synced")?;
        let updated_at: i64 = row.try_get("updated_at")?;

        let data = serde_json::from_str(&data).map_err(|e| StorageError::Corrupt {
            id: format!("{}/{}", domain, id),
            reason: e.to_string(),
        })?;

        Ok(SyncRecord {
            domain,
            id,
            data,
            deleted: deleted != 0,
            synced: synced != 0,
            updated_at: updated_at as u64,
        })
    }

    pub async fn upsert(&self, record: &SyncRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO records (domain, id, data, deleted, synced, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(domain, id) DO UPDATE SET \
                data = excluded.data, deleted = excluded.deleted, \
                synced = excluded.synced, updated_at = excluded.updated_at",
        )
        .bind(&record.domain)
        .bind(&record.id)
        .bind(record.data.to_string())
        .bind(record.deleted as i64)
        .bind(record.synced as i64)
        .bind(record.updated_at as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, domain: &str, id: &str) -> Result<Option<SyncRecord>, StorageError> {
        let row = sqlx::query("SELECT * FROM records WHERE domain = ? AND id = ?")
            .bind(domain)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    /// Records of `domain` that the remote has not confirmed, oldest first.
    pub async fn unsynced(&self, domain: &str) -> Result<Vec<SyncRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM records WHERE domain = ? AND synced = 0 ORDER BY updated_at ASC, id ASC",
        )
        .bind(domain)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    pub async fn count_unsynced(&self, domain: &str) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM records WHERE domain = ? AND synced = 0")
            .bind(domain)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    /// Mark a record as confirmed by the remote, optionally replacing its
    /// data with the server's copy. Confirmed tombstones are removed.
    pub async fn mark_synced(
        &self,
        domain: &str,
        id: &str,
        server_copy: Option<&Value>,
    ) -> Result<(), StorageError> {
        let Some(mut record) = self.get(domain, id).await? else {
            return Ok(());
        };

        if record.deleted {
            self.remove(domain, id).await?;
            debug!(domain, id, "Tombstone confirmed, record removed");
            return Ok(());
        }

        if let Some(copy) = server_copy {
            record.data = copy.clone();
        }
        record.synced = true;
        self.upsert(&record).await
    }

    pub async fn remove(&self, domain: &str, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM records WHERE domain = ? AND id = ?")
            .bind(domain)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unsynced_query_by_domain() {
        let store = RecordStore::open(None).await.unwrap();
        store.upsert(&SyncRecord::new("alarms", "1", json!({"hour": 7}))).await.unwrap();
        store.upsert(&SyncRecord::new("alarms", "2", json!({"hour": 8}))).await.unwrap();
        store.upsert(&SyncRecord::new("settings", "theme", json!({"dark": true}))).await.unwrap();

        let alarms = store.unsynced("alarms").await.unwrap();
        assert_eq!(alarms.len(), 2);
        assert_eq!(store.count_unsynced("settings").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_synced_adopts_server_copy() {
        let store = RecordStore::open(None).await.unwrap();
        store.upsert(&SyncRecord::new("alarms", "7", json!({"hour": 7}))).await.unwrap();

        let server = json!({"hour": 7, "lastModified": 99});
        store.mark_synced("alarms", "7", Some(&server)).await.unwrap();

        let record = store.get("alarms", "7").await.unwrap().unwrap();
        assert!(record.synced);
        assert_eq!(record.data, server);
        assert_eq!(store.count_unsynced("alarms").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_confirmed_tombstone_is_removed() {
        let store = RecordStore::open(None).await.unwrap();
        store.upsert(&SyncRecord::tombstone("alarms", "3")).await.unwrap();

        store.mark_synced("alarms", "3", None).await.unwrap();
        assert!(store.get("alarms", "3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_synced_unknown_record_is_noop() {
        let store = RecordStore::open(None).await.unwrap();
        store.mark_synced("alarms", "ghost", None).await.unwrap();
        assert!(store.get("alarms", "ghost").await.unwrap().is_none());
    }
}
