// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Routing table: URL pattern → strategy + tier.
//!
//! Rules are tried in order against the request path and the first match
//! wins. Anything left over gets the implicit default rule, so every URL
//! routes to exactly one strategy.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cache::CacheTier;
use crate::error::OfflineError;
use crate::http::url_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
    NetworkWithFallback,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Self::CacheFirst,
        Self::NetworkFirst,
        Self::StaleWhileRevalidate,
        Self::NetworkWithFallback,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheFirst => "cache_first",
            Self::NetworkFirst => "network_first",
            Self::StaleWhileRevalidate => "stale_while_revalidate",
            Self::NetworkWithFallback => "network_with_fallback",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.as_str() == s)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized form of a rule, as found in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub pattern: String,
    pub strategy: Strategy,
    pub tier: CacheTier,
}

impl RouteSpec {
    pub fn new(pattern: &str, strategy: Strategy, tier: CacheTier) -> Self {
        Self {
            pattern: pattern.to_string(),
            strategy,
            tier,
        }
    }
}

/// Pattern used for authentication endpoints, also consulted by the
/// cacheability check.
pub const AUTH_PATTERN: &str = r"(?i)(?:^|/)(?:auth/|login(?:/|$)|logout(?:/|$)|oauth|token(?:/|$))";

/// Built-in rules in priority order.
#[must_use]
pub fn builtin_routes() -> Vec<RouteSpec> {
    use CacheTier::*;
    use Strategy::*;
    vec![
        RouteSpec::new(AUTH_PATTERN, NetworkFirst, Dynamic),
        RouteSpec::new(r"(?i)(?:\.(?:js|css|woff2?|ttf)$|/static/)", CacheFirst, Static),
        RouteSpec::new(r"(?i)\.(?:png|jpe?g|gif|svg|webp|ico|mp3|wav|ogg)$", CacheFirst, Assets),
        RouteSpec::new(r"(?i)^/(?:api/)?(?:analytics|telemetry|metrics)(?:/|$)", NetworkFirst, Telemetry),
        RouteSpec::new(r"^/api/(?:alarms|settings)(?:/|$)", StaleWhileRevalidate, Api),
        RouteSpec::new(r"^/api/", NetworkFirst, Api),
    ]
}

#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub pattern: Regex,
    pub strategy: Strategy,
    pub tier: CacheTier,
}

/// Outcome of classifying one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteMatch {
    pub strategy: Strategy,
    pub tier: CacheTier,
    /// Index of the matching rule; `None` for the default rule
    pub rule_index: Option<usize>,
}

impl RouteMatch {
    pub const DEFAULT: RouteMatch = RouteMatch {
        strategy: Strategy::NetworkWithFallback,
        tier: CacheTier::Dynamic,
        rule_index: None,
    };

    #[must_use]
    pub fn is_default(&self) -> bool {
        self.rule_index.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RoutingRule>,
}

impl RouteTable {
    /// Compile rules. An empty list yields the built-in table.
    pub fn from_specs(specs: &[RouteSpec]) -> Result<Self, OfflineError> {
        if specs.is_empty() {
            return Self::builtin();
        }
        let rules = specs
            .iter()
            .map(|spec| {
                let pattern = Regex::new(&spec.pattern)
                    .map_err(|e| OfflineError::Config(format!("route pattern {:?}: {}", spec.pattern, e)))?;
                Ok(RoutingRule {
                    pattern,
                    strategy: spec.strategy,
                    tier: spec.tier,
                })
            })
            .collect::<Result<Vec<_>, OfflineError>>()?;
        Ok(Self { rules })
    }

    pub fn builtin() -> Result<Self, OfflineError> {
        Self::from_specs(&builtin_routes())
    }

    #[must_use]
    pub fn classify(&self, url: &str) -> RouteMatch {
        let path = url_path(url);
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.pattern.is_match(&path))
            .map(|(idx, rule)| RouteMatch {
                strategy: rule.strategy,
                tier: rule.tier,
                rule_index: Some(idx),
            })
            .unwrap_or(RouteMatch::DEFAULT)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::builtin().unwrap()
    }

    #[test]
    fn test_builtin_priorities() {
        let t = table();
        let cases = [
            ("/auth/refresh", Strategy::NetworkFirst, CacheTier::Dynamic),
            ("https://app.test/api/token", Strategy::NetworkFirst, CacheTier::Dynamic),
            ("/app.js", Strategy::CacheFirst, CacheTier::Static),
            ("/static/img/logo.png", Strategy::CacheFirst, CacheTier::Static),
            ("/img/bell.PNG", Strategy::CacheFirst, CacheTier::Assets),
            ("/sounds/ring.mp3?v=2", Strategy::CacheFirst, CacheTier::Assets),
            ("/api/telemetry/events", Strategy::NetworkFirst, CacheTier::Telemetry),
            ("/api/alarms", Strategy::StaleWhileRevalidate, CacheTier::Api),
            ("/api/settings/theme", Strategy::StaleWhileRevalidate, CacheTier::Api),
            ("/api/profile", Strategy::NetworkFirst, CacheTier::Api),
        ];
        for (url, strategy, tier) in cases {
            let m = t.classify(url);
            assert_eq!((m.strategy, m.tier), (strategy, tier), "{}", url);
            assert!(!m.is_default());
        }
    }

    #[test]
    fn test_default_rule_for_unmatched() {
        let m = table().classify("/dashboard");
        assert_eq!(m, RouteMatch::DEFAULT);
        assert!(m.is_default());
    }

    #[test]
    fn test_first_match_wins() {
        let t = RouteTable::from_specs(&[
            RouteSpec::new("^/a", Strategy::CacheFirst, CacheTier::Static),
            RouteSpec::new("^/a/b", Strategy::NetworkFirst, CacheTier::Api),
        ])
        .unwrap();
        assert_eq!(t.classify("/a/b").rule_index, Some(0));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        let err = RouteTable::from_specs(&[RouteSpec::new("(", Strategy::CacheFirst, CacheTier::Static)]).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_strategy_serde_names() {
        let spec: RouteSpec =
            serde_json::from_str(r#"{"pattern":"^/x","strategy":"stale_while_revalidate","tier":"api"}"#).unwrap();
        assert_eq!(spec.strategy, Strategy::StaleWhileRevalidate);
        assert_eq!(Strategy::parse("cache_first"), Some(Strategy::CacheFirst));
    }
}
