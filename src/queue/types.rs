// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::cache::entry::now_millis;
use crate::error::OfflineError;
use crate::http::{url_path, HttpMethod, RequestDescriptor};

/// Header telling the remote how a conflicting write was resolved.
pub const RESOLUTION_HEADER: &str = "x-conflict-resolution";

/// Replay state of a queued mutation.
///
/// Succeeded and resolved items are deleted rather than kept in a
/// terminal state; failed items go back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    Pending,
    InFlight,
    DeferredConflict,
}

impl MutationState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::DeferredConflict => "deferred_conflict",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "deferred_conflict" => Some(Self::DeferredConflict),
            _ => None,
        }
    }
}

impl fmt::Display for MutationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutating request waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: String,
    pub domain: String,
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<Vec<u8>>,
    /// Epoch millis
    pub enqueued_at: u64,
    pub attempt_count: u32,
    pub state: MutationState,
    /// Record this mutation pushes, when it was staged from the record store
    #[serde(default)]
    pub record_id: Option<String>,
}

impl QueuedMutation {
    /// Serialize a failed request for the queue.
    ///
    /// A JSON content type with a body that does not parse is rejected with
    /// [`OfflineError::SerializationFailure`].
    pub fn from_request(domain: impl Into<String>, request: &RequestDescriptor) -> Result<Self, OfflineError> {
        if !request.method.is_mutating() {
            return Err(OfflineError::SerializationFailure(format!(
                "{} is not a mutating method",
                request.method
            )));
        }
        if request.has_json_body() {
            if let Some(ref body) = request.body {
                serde_json::from_slice::<Value>(body)?;
            }
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            domain: domain.into(),
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            enqueued_at: now_millis(),
            attempt_count: 0,
            state: MutationState::Pending,
            record_id: None,
        })
    }

    #[must_use]
    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    #[must_use]
    pub fn to_request(&self) -> RequestDescriptor {
        RequestDescriptor {
            method: self.method,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            mode: Default::default(),
        }
    }

    /// Body parsed as JSON. `Ok(None)` when there is no body.
    pub fn body_json(&self) -> Result<Option<Value>, OfflineError> {
        match self.body {
            Some(ref body) if !body.is_empty() => Ok(Some(serde_json::from_slice(body)?)),
            _ => Ok(None),
        }
    }

    /// Item the mutation targets: the staged record id, else the last path segment.
    #[must_use]
    pub fn item_id(&self) -> String {
        if let Some(ref id) = self.record_id {
            return id.clone();
        }
        url_path(&self.url)
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    #[must_use]
    pub fn resolution_header(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(RESOLUTION_HEADER))
            .map(|(_, v)| v.as_str())
    }

    /// Replace the body with a JSON value and tag the resolution.
    pub fn rewrite(&mut self, body: &Value, resolution: Resolution) {
        self.body = Some(body.to_string().into_bytes());
        self.set_resolution_header(resolution);
    }

    pub fn set_resolution_header(&mut self, resolution: Resolution) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(RESOLUTION_HEADER));
        self.headers
            .push((RESOLUTION_HEADER.to_string(), resolution.as_str().to_string()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    ConcurrentlyModified,
    DeletedRemotely,
    SchemaMismatch,
}

impl ConflictKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConcurrentlyModified => "concurrently-modified",
            Self::DeletedRemotely => "deleted-remotely",
            Self::SchemaMismatch => "schema-mismatch",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "concurrently-modified" => Some(Self::ConcurrentlyModified),
            "deleted-remotely" => Some(Self::DeletedRemotely),
            "schema-mismatch" => Some(Self::SchemaMismatch),
            _ => None,
        }
    }
}

/// How a conflict ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Client,
    Server,
    Merged,
    Deferred,
}

impl Resolution {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Merged => "merged",
            Self::Deferred => "deferred",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "client" => Some(Self::Client),
            "server" => Some(Self::Server),
            "merged" => Some(Self::Merged),
            "deferred" => Some(Self::Deferred),
            _ => None,
        }
    }
}

/// Automatic resolution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Local overwrites server
    Client,
    /// Discard the local change
    Server,
    /// Field-level merge, deferring when not applicable
    #[default]
    Merge,
    /// Always defer to the application
    Manual,
}

/// Divergence between a queued change and the remote state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: String,
    pub mutation_id: String,
    pub domain: String,
    pub item_id: String,
    pub local_version: Option<Value>,
    pub remote_version: Option<Value>,
    pub kind: ConflictKind,
    pub resolution: Resolution,
    pub detected_at: DateTime<Utc>,
}

impl ConflictRecord {
    pub fn new(
        mutation: &QueuedMutation,
        kind: ConflictKind,
        local_version: Option<Value>,
        remote_version: Option<Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mutation_id: mutation.id.clone(),
            domain: mutation.domain.clone(),
            item_id: mutation.item_id(),
            local_version,
            remote_version,
            kind,
            resolution: Resolution::Deferred,
            detected_at: Utc::now(),
        }
    }
}

/// Per-domain queue counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainQueueStats {
    pub domain: String,
    pub pending: u64,
    pub in_flight: u64,
    pub deferred: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub domains: Vec<DomainQueueStats>,
}

impl QueueStats {
    #[must_use]
    pub fn domain(&self, domain: &str) -> Option<&DomainQueueStats> {
        self.domains.iter().find(|d| d.domain == domain)
    }

    /// Items still waiting for replay or manual resolution.
    #[must_use]
    pub fn total_queued(&self) -> u64 {
        self.domains.iter().map(|d| d.pending + d.in_flight + d.deferred).sum()
    }
}
