// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync domains: which queue a mutation lands in and how it is replayed.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::types::ConflictPolicy;
use crate::error::OfflineError;
use crate::http::url_path;

/// Domain for mutations no configured pattern claims.
pub const GENERAL_DOMAIN: &str = "general";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub name: String,
    /// Regex matched against the request path
    pub pattern: String,
    /// Collection URL staged records are written under (`{endpoint}/{id}`)
    pub endpoint: String,
    /// Overrides the global conflict policy
    #[serde(default)]
    pub policy: Option<ConflictPolicy>,
}

impl DomainConfig {
    pub fn new(name: &str, pattern: &str, endpoint: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            endpoint: endpoint.to_string(),
            policy: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// Built-in alarm and settings domains.
#[must_use]
pub fn builtin_domains() -> Vec<DomainConfig> {
    vec![
        DomainConfig::new("alarms", r"^/(?:api/)?alarms(?:/|$)", "/api/alarms"),
        DomainConfig::new("settings", r"^/(?:api/)?settings(?:/|$)", "/api/settings"),
    ]
}

pub struct DomainTable {
    domains: Vec<(Regex, DomainConfig)>,
}

impl DomainTable {
    pub fn new(configs: &[DomainConfig]) -> Result<Self, OfflineError> {
        let domains = configs
            .iter()
            .map(|c| {
                Regex::new(&c.pattern)
                    .map(|re| (re, c.clone()))
                    .map_err(|e| OfflineError::Config(format!("domain {} pattern: {}", c.name, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { domains })
    }

    pub fn builtin() -> Result<Self, OfflineError> {
        Self::new(&builtin_domains())
    }

    /// Domain tag for a mutation URL. First match wins.
    #[must_use]
    pub fn classify(&self, url: &str) -> &str {
        let path = url_path(url);
        self.domains
            .iter()
            .find(|(re, _)| re.is_match(&path))
            .map(|(_, c)| c.name.as_str())
            .unwrap_or(GENERAL_DOMAIN)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DomainConfig> {
        self.domains.iter().map(|(_, c)| c).find(|c| c.name == name)
    }

    #[must_use]
    pub fn policy_for(&self, name: &str, default: ConflictPolicy) -> ConflictPolicy {
        self.get(name).and_then(|c| c.policy).unwrap_or(default)
    }

    /// Replay URL for a staged record.
    pub fn record_url(&self, domain: &str, record_id: &str) -> Result<String, OfflineError> {
        let config = self
            .get(domain)
            .ok_or_else(|| OfflineError::Config(format!("unknown sync domain {}", domain)))?;
        Ok(format!("{}/{}", config.endpoint.trim_end_matches('/'), record_id))
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.domains.iter().map(|(_, c)| c.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_builtin() {
        let table = DomainTable::builtin().unwrap();
        assert_eq!(table.classify("https://x.test/api/alarms/7"), "alarms");
        assert_eq!(table.classify("/alarms/7"), "alarms");
        assert_eq!(table.classify("/api/settings"), "settings");
        assert_eq!(table.classify("/api/alarmsx"), GENERAL_DOMAIN);
        assert_eq!(table.classify("/api/profile"), GENERAL_DOMAIN);
    }

    #[test]
    fn test_policy_override() {
        let table = DomainTable::new(&[
            DomainConfig::new("alarms", "^/alarms", "/alarms").with_policy(ConflictPolicy::Client),
        ])
        .unwrap();
        assert_eq!(table.policy_for("alarms", ConflictPolicy::Merge), ConflictPolicy::Client);
        assert_eq!(table.policy_for("general", ConflictPolicy::Merge), ConflictPolicy::Merge);
    }

    #[test]
    fn test_record_url() {
        let table = DomainTable::builtin().unwrap();
        assert_eq!(table.record_url("alarms", "7").unwrap(), "/api/alarms/7");
        assert!(matches!(table.record_url("nope", "1"), Err(OfflineError::Config(_))));
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        let result = DomainTable::new(&[DomainConfig::new("x", "(", "/x")]);
        assert!(matches!(result, Err(OfflineError::Config(_))));
    }
}
