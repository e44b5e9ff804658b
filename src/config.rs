//! Configuration for the offline core.
//!
//! # Example
//!
//! ```
//! use offline_core::OfflineConfig;
//!
//! // Minimal config (uses defaults, everything in memory)
//! let config = OfflineConfig::default();
//! assert_eq!(config.sync_batch_size, 20);
//! assert_eq!(config.retry_delays_ms, vec![1000, 5000]);
//!
//! // From the host app's JSON settings
//! let config = OfflineConfig::from_json(r#"{
//!     "data_dir": "/data/offline",
//!     "conflict_policy": "server",
//!     "tier_budgets": { "api_bytes": 1048576 }
//! }"#).unwrap();
//! assert_eq!(config.tier_budgets.api_bytes, 1024 * 1024);
//! assert_eq!(config.sync_batch_size, 20);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheTier, TierBudgets};
use crate::error::OfflineError;
use crate::eviction::RetentionPolicy;
use crate::queue::{builtin_domains, ConflictPolicy, DomainConfig};
use crate::resilience::retry::RetryConfig;
use crate::router::{RouteSpec, RouterSettings, AUTH_PATTERN};
use crate::sync::{MergeOptions, SyncSettings};

/// Configuration for the offline service.
///
/// Every field has a default; an empty JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Directory for `cache.db`, `records.db` and `mutations.db`. `None`
    /// keeps everything in memory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub tier_budgets: TierBudgets,

    /// Retention score weight: one access is worth this many ms of recency
    #[serde(default = "default_eviction_access_weight_ms")]
    pub eviction_access_weight_ms: u64,
    /// Fraction of the budget an eviction pass shrinks a tier to
    #[serde(default = "default_eviction_target_ratio")]
    pub eviction_target_ratio: f64,
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,

    #[serde(default = "default_max_cacheable_bytes")]
    pub max_cacheable_bytes: usize,
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,

    /// Ordered routing rules. Empty means the built-in table.
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
    /// Sync domains, tried in order
    #[serde(default = "builtin_domains")]
    pub domains: Vec<DomainConfig>,

    /// Sends per item per sync run, the first one included
    #[serde(default = "default_max_replay_attempts")]
    pub max_replay_attempts: usize,
    /// Pause before each retry; the last entry repeats
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,
    #[serde(default = "default_sync_batch_size")]
    pub sync_batch_size: usize,
    /// Periodic sync (0 = only on reconnect or on demand)
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_sync_history_limit")]
    pub sync_history_limit: usize,

    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    #[serde(default = "default_version_field")]
    pub version_field: String,
    /// Field identifying array elements when merging
    #[serde(default = "default_merge_key_field")]
    pub merge_key_field: String,

    /// URLs fetched again by force-optimize
    #[serde(default)]
    pub warm_urls: Vec<String>,
    #[serde(default = "default_offline_document_url")]
    pub offline_document_url: String,
    #[serde(default = "default_api_path_prefix")]
    pub api_path_prefix: String,
    #[serde(default = "default_auth_path_patterns")]
    pub auth_path_patterns: Vec<String>,
}

fn default_eviction_access_weight_ms() -> u64 { 60_000 }
fn default_eviction_target_ratio() -> f64 { 0.8 }
fn default_eviction_interval_secs() -> u64 { 300 }
fn default_max_cacheable_bytes() -> usize { 2 * 1024 * 1024 } // 2 MB
fn default_network_timeout_ms() -> u64 { 8_000 }
fn default_max_replay_attempts() -> usize { 3 }
fn default_retry_delays_ms() -> Vec<u64> { vec![1_000, 5_000] }
fn default_sync_batch_size() -> usize { 20 }
fn default_sync_interval_secs() -> u64 { 60 }
fn default_sync_history_limit() -> usize { 50 }
fn default_version_field() -> String { "lastModified".to_string() }
fn default_merge_key_field() -> String { "id".to_string() }
fn default_offline_document_url() -> String { "/offline.html".to_string() }
fn default_api_path_prefix() -> String { "/api/".to_string() }
fn default_auth_path_patterns() -> Vec<String> { vec![AUTH_PATTERN.to_string()] }

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            tier_budgets: TierBudgets::default(),
            eviction_access_weight_ms: default_eviction_access_weight_ms(),
            eviction_target_ratio: default_eviction_target_ratio(),
            eviction_interval_secs: default_eviction_interval_secs(),
            max_cacheable_bytes: default_max_cacheable_bytes(),
            network_timeout_ms: default_network_timeout_ms(),
            routes: Vec::new(),
            domains: builtin_domains(),
            max_replay_attempts: default_max_replay_attempts(),
            retry_delays_ms: default_retry_delays_ms(),
            sync_batch_size: default_sync_batch_size(),
            sync_interval_secs: default_sync_interval_secs(),
            sync_history_limit: default_sync_history_limit(),
            conflict_policy: ConflictPolicy::default(),
            version_field: default_version_field(),
            merge_key_field: default_merge_key_field(),
            warm_urls: Vec::new(),
            offline_document_url: default_offline_document_url(),
            api_path_prefix: default_api_path_prefix(),
            auth_path_patterns: default_auth_path_patterns(),
        }
    }
}

impl OfflineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, OfflineError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| OfflineError::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the components cannot run with.
    pub fn validate(&self) -> Result<(), OfflineError> {
        for tier in CacheTier::ALL {
            if self.tier_budgets.get(tier) == 0 {
                return Err(OfflineError::Config(format!("tier {} has a zero budget", tier)));
            }
        }
        if !(self.eviction_target_ratio > 0.0 && self.eviction_target_ratio <= 1.0) {
            return Err(OfflineError::Config(format!(
                "eviction_target_ratio must be in (0, 1], got {}",
                self.eviction_target_ratio
            )));
        }
        if self.sync_batch_size == 0 {
            return Err(OfflineError::Config("sync_batch_size must be positive".into()));
        }
        if self.max_replay_attempts == 0 {
            return Err(OfflineError::Config("max_replay_attempts must be positive".into()));
        }
        if self.retry_delays_ms.is_empty() {
            return Err(OfflineError::Config("retry_delays_ms must not be empty".into()));
        }
        if self.network_timeout_ms == 0 {
            return Err(OfflineError::Config("network_timeout_ms must be positive".into()));
        }

        let patterns = self
            .routes
            .iter()
            .map(|r| &r.pattern)
            .chain(self.domains.iter().map(|d| &d.pattern))
            .chain(self.auth_path_patterns.iter());
        for pattern in patterns {
            Regex::new(pattern).map_err(|e| OfflineError::Config(format!("pattern {:?}: {}", pattern, e)))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    #[must_use]
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.eviction_access_weight_ms, self.eviction_target_ratio)
    }

    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from_millis(self.max_replay_attempts, &self.retry_delays_ms)
    }

    #[must_use]
    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            network_timeout: self.network_timeout(),
            max_cacheable_bytes: self.max_cacheable_bytes,
            offline_document_url: self.offline_document_url.clone(),
            api_path_prefix: self.api_path_prefix.clone(),
            auth_path_patterns: self.auth_path_patterns.clone(),
        }
    }

    #[must_use]
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            batch_size: self.sync_batch_size,
            retry: self.retry_config(),
            default_policy: self.conflict_policy,
            merge: MergeOptions {
                version_field: self.version_field.clone(),
                merge_key_field: self.merge_key_field.clone(),
            },
            network_timeout: self.network_timeout(),
            history_limit: self.sync_history_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_empty_json() {
        let parsed = OfflineConfig::from_json("{}").unwrap();
        assert_eq!(parsed, OfflineConfig::default());
        assert_eq!(parsed.domains.len(), 2);
        assert_eq!(parsed.conflict_policy, ConflictPolicy::Merge);
        // One pause between each pair of attempts, none left unused
        assert_eq!(parsed.retry_delays_ms.len(), parsed.max_replay_attempts - 1);
    }

    #[test]
    fn test_derived_settings() {
        let config = OfflineConfig {
            retry_delays_ms: vec![10, 20],
            max_replay_attempts: 4,
            ..Default::default()
        };
        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, Some(4));
        assert_eq!(retry.delay_for(3), Duration::from_millis(20));

        let sync = config.sync_settings();
        assert_eq!(sync.batch_size, 20);
        assert_eq!(sync.merge.version_field, "lastModified");
        assert_eq!(config.router_settings().max_cacheable_bytes, 2 * 1024 * 1024);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = OfflineConfig::default();
        config.tier_budgets.api_bytes = 0;
        assert!(config.validate().is_err());

        let config = OfflineConfig {
            retry_delays_ms: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let err = OfflineConfig::from_json(r#"{"routes":[{"pattern":"(","strategy":"cache_first","tier":"static"}]}"#)
            .unwrap_err();
        assert_eq!(err.kind(), "config");

        assert!(OfflineConfig::from_json(r#"{"sync_batch_size": 0}"#).is_err());
        assert!(OfflineConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_policy_override_parses() {
        let config = OfflineConfig::from_json(
            r#"{"domains":[{"name":"alarms","pattern":"^/api/alarms","endpoint":"/api/alarms","policy":"manual"}]}"#,
        )
        .unwrap();
        assert_eq!(config.domains[0].policy, Some(ConflictPolicy::Manual));
    }
}
