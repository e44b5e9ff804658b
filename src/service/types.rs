//! Public types for the offline service.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::queue::QueueStats;
use crate::tasks::TaskStats;

/// Service lifecycle state.
///
/// ```text
/// Created ──start()──▶ Running ──shutdown()──▶ Stopping ──▶ Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    /// Stores opened, run loop not started
    Created,
    /// Run loop active (periodic eviction and sync)
    Running,
    /// Graceful shutdown in progress
    Stopping,
    /// Loop stopped and stores closed
    Stopped,
}

impl ServiceState {
    /// Lowercase label used in metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Result of a force-optimize pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptimizeReport {
    /// Entries evicted across all tiers
    pub evicted_entries: usize,
    pub freed_bytes: usize,
    /// Warm URLs fetched and stored again
    pub warmed: usize,
    /// Warm URLs that could not be fetched or cached
    pub warm_failures: Vec<String>,
}

impl OptimizeReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.warm_failures.is_empty()
    }
}

/// Diagnostics snapshot for host-app status screens.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub online: bool,
    pub cache: CacheStats,
    pub queue: QueueStats,
    #[serde(skip)]
    pub tasks: TaskStats,
}
