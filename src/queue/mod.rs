//! Durable offline mutation queue.
//!
//! Failed mutating requests are written to SQLite before the caller gets
//! its "queued" acknowledgment, so they survive a process restart. Replay
//! order is FIFO per domain (insertion sequence, not wall clock).
//!
//! Deferred conflicts are stored in the same database, next to the
//! mutation they block.

pub mod domains;
pub mod types;

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::error::OfflineError;
use crate::http::HttpMethod;
use crate::storage::sqlite::{execute_schema, open_pool};
use crate::storage::traits::StorageError;

pub use domains::{builtin_domains, DomainConfig, DomainTable, GENERAL_DOMAIN};
pub use types::{
    ConflictKind, ConflictPolicy, ConflictRecord, DomainQueueStats, MutationState, QueueStats, QueuedMutation,
    Resolution, RESOLUTION_HEADER,
};

pub struct MutationQueue {
    pool: SqlitePool,
}

impl MutationQueue {
    /// Open (or create) the queue. `None` keeps it in memory.
    ///
    /// Items left `InFlight` by a crash are put back to `Pending`.
    pub async fn open(path: Option<&Path>) -> Result<Self, StorageError> {
        let pool = open_pool(path).await?;
        let queue = Self { pool };
        queue.init_schema().await?;

        let recovered = queue.reset_in_flight().await?;
        if recovered > 0 {
            info!(recovered, "Recovered in-flight mutations from previous run");
        }
        Ok(queue)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        execute_schema(
            &self.pool,
            "mutation_queue_schema",
            r#"
            CREATE TABLE IF NOT EXISTS mutations (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                domain TEXT NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                headers TEXT NOT NULL,
                body BLOB,
                enqueued_at INTEGER NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL,
                record_id TEXT
            )
            "#,
        )
        .await?;
        execute_schema(
            &self.pool,
            "mutation_queue_index",
            "CREATE INDEX IF NOT EXISTS idx_mutations_domain_state ON mutations (domain, state, seq)",
        )
        .await?;
        execute_schema(
            &self.pool,
            "conflict_schema",
            r#"
            CREATE TABLE IF NOT EXISTS conflicts (
                id TEXT PRIMARY KEY,
                mutation_id TEXT NOT NULL,
                domain TEXT NOT NULL,
                item_id TEXT NOT NULL,
                local_version TEXT,
                remote_version TEXT,
                kind TEXT NOT NULL,
                resolution TEXT NOT NULL,
                detected_at TEXT NOT NULL
            )
            "#,
        )
        .await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_mutation(row: &SqliteRow) -> Result<QueuedMutation, StorageError> {
        let id: String = row.try_get("id")?;
        let method: String = row.try_get("method")?;
        let headers: String = row.try_get("headers")?;
        let state: String = row.try_get("state")?;
        let enqueued_at: i64 = row.try_get("enqueued_at")?;
        let attempt_count: i64 = row.try_get("attempt_count")?;

        let corrupt = |reason: String| StorageError::Corrupt {
            id: id.clone(),
            reason,
        };

        Ok(QueuedMutation {
            domain: row.try_get("domain")?,
            method: HttpMethod::parse(&method).ok_or_else(|| corrupt(format!("method {}", method)))?,
            url: row.try_get("url")?,
            headers: serde_json::from_str(&headers).map_err(|e| corrupt(format!("headers: {}", e)))?,
            body: row.try_get("body")?,
            enqueued_at: enqueued_at as u64,
            attempt_count: attempt_count as u32,
            state: MutationState::parse(&state).ok_or_else(|| corrupt(format!("state {}", state)))?,
            record_id: row.try_get("record_id")?,
            id,
        })
    }

    /// Persist a mutation at the tail of its domain's queue.
    pub async fn enqueue(&self, mutation: &QueuedMutation) -> Result<(), OfflineError> {
        let headers = serde_json::to_string(&mutation.headers)?;
        sqlx::query(
            "INSERT INTO mutations \
             (id, domain, method, url, headers, body, enqueued_at, attempt_count, state, record_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&mutation.id)
        .bind(&mutation.domain)
        .bind(mutation.method.as_str())
        .bind(&mutation.url)
        .bind(headers)
        .bind(mutation.body.as_deref())
        .bind(mutation.enqueued_at as i64)
        .bind(mutation.attempt_count as i64)
        .bind(mutation.state.as_str())
        .bind(mutation.record_id.as_deref())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        crate::metrics::record_mutation_enqueued(&mutation.domain);
        debug!(domain = %mutation.domain, id = %mutation.id, method = %mutation.method, url = %mutation.url, "Mutation queued");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<QueuedMutation>, StorageError> {
        let row = sqlx::query("SELECT * FROM mutations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_mutation).transpose()
    }

    /// Pending items of `domain`, oldest first.
    pub async fn pending(&self, domain: &str) -> Result<Vec<QueuedMutation>, StorageError> {
        let rows = sqlx::query("SELECT * FROM mutations WHERE domain = ? AND state = 'pending' ORDER BY seq ASC")
            .bind(domain)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_mutation).collect()
    }

    /// Ids of pending items, oldest first. A sync run snapshots these up front.
    pub async fn pending_ids(&self, domain: &str) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT id FROM mutations WHERE domain = ? AND state = 'pending' ORDER BY seq ASC")
            .bind(domain)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| r.try_get("id").map_err(StorageError::from)).collect()
    }

    /// Domains with at least one pending item.
    pub async fn domains_with_pending(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query(
            "SELECT domain, MIN(seq) AS first FROM mutations WHERE state = 'pending' \
             GROUP BY domain ORDER BY first ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| r.try_get("domain").map_err(StorageError::from)).collect()
    }

    pub async fn set_state(&self, id: &str, state: MutationState) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE mutations SET state = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count one failed replay attempt, returning the new total.
    pub async fn record_attempt(&self, id: &str) -> Result<u32, StorageError> {
        let row = sqlx::query(
            "UPDATE mutations SET attempt_count = attempt_count + 1 WHERE id = ? RETURNING attempt_count",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let n: i64 = row.try_get("attempt_count")?;
                Ok(n as u32)
            }
            None => Ok(0),
        }
    }

    /// Replace body, headers and state in place, keeping the queue position.
    pub async fn update(&self, mutation: &QueuedMutation) -> Result<(), OfflineError> {
        let headers = serde_json::to_string(&mutation.headers)?;
        sqlx::query("UPDATE mutations SET headers = ?, body = ?, state = ? WHERE id = ?")
            .bind(headers)
            .bind(mutation.body.as_deref())
            .bind(mutation.state.as_str())
            .bind(&mutation.id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM mutations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop pending items that push an older copy of the same record.
    pub async fn remove_pending_for_record(&self, domain: &str, record_id: &str) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM mutations WHERE domain = ? AND record_id = ? AND state = 'pending'")
            .bind(domain)
            .bind(record_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn reset_in_flight(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("UPDATE mutations SET state = 'pending' WHERE state = 'in_flight'")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self, domain: &str, state: MutationState) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM mutations WHERE domain = ? AND state = ?")
            .bind(domain)
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    pub async fn stats(&self) -> Result<QueueStats, StorageError> {
        let rows = sqlx::query(
            "SELECT domain, \
                SUM(CASE WHEN state = 'pending' THEN 1 ELSE 0 END) AS pending, \
                SUM(CASE WHEN state = 'in_flight' THEN 1 ELSE 0 END) AS in_flight, \
                SUM(CASE WHEN state = 'deferred_conflict' THEN 1 ELSE 0 END) AS deferred \
             FROM mutations GROUP BY domain ORDER BY domain",
        )
        .fetch_all(&self.pool)
        .await?;

        let domains = rows
            .iter()
            .map(|row| {
                let pending: i64 = row.try_get("pending")?;
                let in_flight: i64 = row.try_get("in_flight")?;
                let deferred: i64 = row.try_get("deferred")?;
                Ok(DomainQueueStats {
                    domain: row.try_get("domain")?,
                    pending: pending as u64,
                    in_flight: in_flight as u64,
                    deferred: deferred as u64,
                })
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        for d in &domains {
            crate::metrics::set_queue_depth(&d.domain, d.pending);
        }
        Ok(QueueStats { domains })
    }

    fn row_to_conflict(row: &SqliteRow) -> Result<ConflictRecord, StorageError> {
        let id: String = row.try_get("id")?;
        let kind: String = row.try_get("kind")?;
        let resolution: String = row.try_get("resolution")?;
        let detected_at: String = row.try_get("detected_at")?;
        let local: Option<String> = row.try_get("local_version")?;
        let remote: Option<String> = row.try_get("remote_version")?;

        let corrupt = |reason: String| StorageError::Corrupt {
            id: id.clone(),
            reason,
        };
        let parse_json = |raw: Option<String>| {
            raw.map(|s| serde_json::from_str(&s))
                .transpose()
                .map_err(|e| corrupt(format!("version: {}", e)))
        };

        Ok(ConflictRecord {
            mutation_id: row.try_get("mutation_id")?,
            domain: row.try_get("domain")?,
            item_id: row.try_get("item_id")?,
            local_version: parse_json(local)?,
            remote_version: parse_json(remote)?,
            kind: ConflictKind::parse(&kind).ok_or_else(|| corrupt(format!("kind {}", kind)))?,
            resolution: Resolution::parse(&resolution).ok_or_else(|| corrupt(format!("resolution {}", resolution)))?,
            detected_at: DateTime::parse_from_rfc3339(&detected_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("detected_at: {}", e)))?,
            id,
        })
    }

    /// Park a mutation as a deferred conflict. Both writes share a transaction.
    pub async fn defer(&self, conflict: &ConflictRecord) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE mutations SET state = 'deferred_conflict' WHERE id = ?")
            .bind(&conflict.mutation_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT OR REPLACE INTO conflicts \
             (id, mutation_id, domain, item_id, local_version, remote_version, kind, resolution, detected_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&conflict.id)
        .bind(&conflict.mutation_id)
        .bind(&conflict.domain)
        .bind(&conflict.item_id)
        .bind(conflict.local_version.as_ref().map(|v| v.to_string()))
        .bind(conflict.remote_version.as_ref().map(|v| v.to_string()))
        .bind(conflict.kind.as_str())
        .bind(conflict.resolution.as_str())
        .bind(conflict.detected_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Deferred conflicts, oldest first.
    pub async fn deferred_conflicts(&self) -> Result<Vec<ConflictRecord>, StorageError> {
        let rows = sqlx::query("SELECT * FROM conflicts ORDER BY detected_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_conflict).collect()
    }

    pub async fn conflict(&self, id: &str) -> Result<Option<ConflictRecord>, StorageError> {
        let row = sqlx::query("SELECT * FROM conflicts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_conflict).transpose()
    }

    pub async fn remove_conflict(&self, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM conflicts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestDescriptor;
    use serde_json::json;
    use tempfile::tempdir;

    fn put(url: &str, body: serde_json::Value) -> QueuedMutation {
        let request = RequestDescriptor::new(HttpMethod::Put, url).with_json(&body);
        QueuedMutation::from_request("alarms", &request).unwrap()
    }

    #[tokio::test]
    async fn test_fifo_within_domain() {
        let queue = MutationQueue::open(None).await.unwrap();
        let a = put("/api/alarms/1", json!({"n": 1}));
        let b = put("/api/alarms/2", json!({"n": 2}));
        let c = put("/api/alarms/3", json!({"n": 3}));
        for m in [&a, &b, &c] {
            queue.enqueue(m).await.unwrap();
        }

        let ids = queue.pending_ids("alarms").await.unwrap();
        assert_eq!(ids, vec![a.id.clone(), b.id.clone(), c.id.clone()]);
        assert!(queue.pending_ids("settings").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attempts_and_state_transitions() {
        let queue = MutationQueue::open(None).await.unwrap();
        let m = put("/api/alarms/7", json!({"hour": 7}));
        queue.enqueue(&m).await.unwrap();

        queue.set_state(&m.id, MutationState::InFlight).await.unwrap();
        assert_eq!(queue.record_attempt(&m.id).await.unwrap(), 1);
        assert_eq!(queue.record_attempt(&m.id).await.unwrap(), 2);
        assert!(queue.pending_ids("alarms").await.unwrap().is_empty());

        queue.set_state(&m.id, MutationState::Pending).await.unwrap();
        let loaded = queue.get(&m.id).await.unwrap().unwrap();
        assert_eq!(loaded.attempt_count, 2);
        assert_eq!(loaded.state, MutationState::Pending);
        assert_eq!(loaded.body, m.body);

        assert!(queue.remove(&m.id).await.unwrap());
        assert!(queue.get(&m.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_survives_restart_and_recovers_in_flight() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mutations.db");
        let m = put("/api/alarms/7", json!({"hour": 7}));

        {
            let queue = MutationQueue::open(Some(&path)).await.unwrap();
            queue.enqueue(&m).await.unwrap();
            queue.set_state(&m.id, MutationState::InFlight).await.unwrap();
            queue.close().await;
        }

        let queue = MutationQueue::open(Some(&path)).await.unwrap();
        assert_eq!(queue.pending_ids("alarms").await.unwrap(), vec![m.id.clone()]);
        assert_eq!(queue.domains_with_pending().await.unwrap(), vec!["alarms".to_string()]);
    }

    #[tokio::test]
    async fn test_defer_persists_conflict_and_hides_mutation() {
        let queue = MutationQueue::open(None).await.unwrap();
        let m = put("/api/alarms/7", json!({"hour": 7}));
        queue.enqueue(&m).await.unwrap();

        let conflict = ConflictRecord::new(
            &m,
            ConflictKind::SchemaMismatch,
            Some(json!({"hour": 7})),
            Some(json!([1, 2])),
        );
        queue.defer(&conflict).await.unwrap();

        assert!(queue.pending_ids("alarms").await.unwrap().is_empty());
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.domain("alarms").unwrap().deferred, 1);
        assert_eq!(stats.total_queued(), 1);

        let stored = queue.deferred_conflicts().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, conflict.id);
        assert_eq!(stored[0].kind, ConflictKind::SchemaMismatch);
        assert_eq!(stored[0].remote_version, Some(json!([1, 2])));
        assert_eq!(stored[0].item_id, "7");

        assert!(queue.remove_conflict(&conflict.id).await.unwrap());
        assert!(queue.conflict(&conflict.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restaging_replaces_pending_copy() {
        let queue = MutationQueue::open(None).await.unwrap();
        let first = put("/api/alarms/7", json!({"v": 1})).with_record_id("7");
        queue.enqueue(&first).await.unwrap();

        assert_eq!(queue.remove_pending_for_record("alarms", "7").await.unwrap(), 1);
        assert_eq!(queue.count("alarms", MutationState::Pending).await.unwrap(), 0);
    }
}
