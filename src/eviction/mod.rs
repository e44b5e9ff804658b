//! Budget-driven eviction for the tiered cache.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Eviction Module                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  policy.rs   - Retention scoring                             │
//! │  └─ score = access_count * weight + last_accessed_at         │
//! │  └─ select_victims: lowest first, down to 80% of budget      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  engine.rs   - Passes over the blob store                    │
//! │  └─ EvictionEngine: per-tier and all-tier passes             │
//! │  └─ WriteGuards: keys mid-write are never victims            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod policy;

pub use engine::{EvictionEngine, EvictionReport, EvictionStats, WriteGuard, WriteGuards};
pub use policy::RetentionPolicy;
