// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared SQLite pool setup for the persisted stores.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use tracing::debug;

use super::traits::StorageError;
use crate::resilience::retry::{retry, RetryConfig};

/// Open a pool for `path`, or a private in-memory database when `path` is `None`.
///
/// File databases use WAL journaling with `synchronous = NORMAL`: readers do
/// not block the writer, and a crash loses at most the last transaction.
/// In-memory databases are pinned to a single connection that is never
/// recycled, since each SQLite connection would otherwise get its own empty
/// database.
pub async fn open_pool(path: Option<&Path>) -> Result<SqlitePool, StorageError> {
    let (options, max_connections) = match path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StorageError::Backend(format!("Failed to create {}: {}", parent.display(), e))
                    })?;
                }
            }
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
            (options, 4)
        }
        None => (SqliteConnectOptions::from_str("sqlite::memory:")?, 1),
    };

    debug!(path = ?path, max_connections, "Opening SQLite pool");

    retry("sqlite_connect", &RetryConfig::startup(), || {
        let options = options.clone();
        async move {
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .min_connections(1)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
                .map_err(StorageError::from)
        }
    })
    .await
}

/// Run a schema statement with query-mode retry.
pub(crate) async fn execute_schema(pool: &SqlitePool, name: &str, sql: &str) -> Result<(), StorageError> {
    retry(name, &RetryConfig::query(), || async {
        sqlx::query(sql)
            .execute(pool)
            .await
            .map(|_| ())
            .map_err(StorageError::from)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_memory_pool_keeps_state_between_queries() {
        let pool = open_pool(None).await.unwrap();
        execute_schema(&pool, "t", "CREATE TABLE t (v INTEGER)").await.unwrap();
        sqlx::query("INSERT INTO t (v) VALUES (1)").execute(&pool).await.unwrap();

        let row = sqlx::query("SELECT COUNT(*) AS n FROM t").fetch_one(&pool).await.unwrap();
        let n: i64 = row.try_get("n").unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn test_file_pool_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");

        let pool = open_pool(Some(&path)).await.unwrap();
        execute_schema(&pool, "t", "CREATE TABLE IF NOT EXISTS t (v INTEGER)").await.unwrap();
        pool.close().await;

        assert!(path.exists());
    }
}
