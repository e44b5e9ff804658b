// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for the offline core.
//!
//! Only [`OfflineError::ConflictUnresolved`] is meant to reach the user.
//! Network failures are absorbed by the router, storage-full writes are
//! dropped, and serialization failures drop the single offending mutation.

use std::time::Duration;

use thiserror::Error;

use crate::cache::CacheTier;
use crate::storage::traits::StorageError;

#[derive(Error, Debug)]
pub enum OfflineError {
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server rejected request with status {status}")]
    ServerRejected { status: u16 },

    #[error("tier {tier} cannot hold {size} bytes (budget {budget})")]
    StorageFull {
        tier: CacheTier,
        size: usize,
        budget: usize,
    },

    #[error("conflict on {domain}/{item_id} left unresolved")]
    ConflictUnresolved { domain: String, item_id: String },

    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl OfflineError {
    /// Whether the failure is a connectivity problem that a later attempt may fix.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnavailable(_) | Self::Timeout(_) | Self::ServerRejected { .. }
        )
    }

    /// Short label used for metrics and log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NetworkUnavailable(_) => "network_unavailable",
            Self::Timeout(_) => "timeout",
            Self::ServerRejected { .. } => "server_rejected",
            Self::StorageFull { .. } => "storage_full",
            Self::ConflictUnresolved { .. } => "conflict_unresolved",
            Self::SerializationFailure(_) => "serialization_failure",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for OfflineError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailure(err.to_string())
    }
}
