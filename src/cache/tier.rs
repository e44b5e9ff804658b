// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical cache partition with its own byte budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Static,
    Dynamic,
    Api,
    Assets,
    Telemetry,
    Auxiliary,
}

impl CacheTier {
    /// Every tier, in declaration order.
    pub const ALL: [CacheTier; 6] = [
        Self::Static,
        Self::Dynamic,
        Self::Api,
        Self::Assets,
        Self::Telemetry,
        Self::Auxiliary,
    ];

    /// Order in which tiers are searched when the network is gone and a
    /// request may be answered from any tier.
    pub const FALLBACK_ORDER: [CacheTier; 6] = [
        Self::Dynamic,
        Self::Api,
        Self::Static,
        Self::Assets,
        Self::Auxiliary,
        Self::Telemetry,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::Api => "api",
            Self::Assets => "assets",
            Self::Telemetry => "telemetry",
            Self::Auxiliary => "auxiliary",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte budget per tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierBudgets {
    #[serde(default = "default_static_bytes")]
    pub static_bytes: usize,
    #[serde(default = "default_dynamic_bytes")]
    pub dynamic_bytes: usize,
    #[serde(default = "default_api_bytes")]
    pub api_bytes: usize,
    #[serde(default = "default_assets_bytes")]
    pub assets_bytes: usize,
    #[serde(default = "default_telemetry_bytes")]
    pub telemetry_bytes: usize,
    #[serde(default = "default_auxiliary_bytes")]
    pub auxiliary_bytes: usize,
}

fn default_static_bytes() -> usize { 10 * 1024 * 1024 }
fn default_dynamic_bytes() -> usize { 5 * 1024 * 1024 }
fn default_api_bytes() -> usize { 5 * 1024 * 1024 }
fn default_assets_bytes() -> usize { 20 * 1024 * 1024 }
fn default_telemetry_bytes() -> usize { 1024 * 1024 }
fn default_auxiliary_bytes() -> usize { 2 * 1024 * 1024 }

impl Default for TierBudgets {
    fn default() -> Self {
        Self {
            static_bytes: default_static_bytes(),
            dynamic_bytes: default_dynamic_bytes(),
            api_bytes: default_api_bytes(),
            assets_bytes: default_assets_bytes(),
            telemetry_bytes: default_telemetry_bytes(),
            auxiliary_bytes: default_auxiliary_bytes(),
        }
    }
}

impl TierBudgets {
    /// Same budget for every tier (handy in tests).
    #[must_use]
    pub fn uniform(bytes: usize) -> Self {
        Self {
            static_bytes: bytes,
            dynamic_bytes: bytes,
            api_bytes: bytes,
            assets_bytes: bytes,
            telemetry_bytes: bytes,
            auxiliary_bytes: bytes,
        }
    }

    #[must_use]
    pub fn get(&self, tier: CacheTier) -> usize {
        match tier {
            CacheTier::Static => self.static_bytes,
            CacheTier::Dynamic => self.dynamic_bytes,
            CacheTier::Api => self.api_bytes,
            CacheTier::Assets => self.assets_bytes,
            CacheTier::Telemetry => self.telemetry_bytes,
            CacheTier::Auxiliary => self.auxiliary_bytes,
        }
    }

    pub fn set(&mut self, tier: CacheTier, bytes: usize) {
        match tier {
            CacheTier::Static => self.static_bytes = bytes,
            CacheTier::Dynamic => self.dynamic_bytes = bytes,
            CacheTier::Api => self.api_bytes = bytes,
            CacheTier::Assets => self.assets_bytes = bytes,
            CacheTier::Telemetry => self.telemetry_bytes = bytes,
            CacheTier::Auxiliary => self.auxiliary_bytes = bytes,
        }
    }
}
