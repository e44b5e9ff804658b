// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tiered response cache.
//!
//! Six independently budgeted tiers share one [`BlobStore`](crate::storage::traits::BlobStore).
//! Entries carry first-class access metadata that drives eviction.

pub mod entry;
pub mod tier;
pub mod tiered;

pub use entry::{AccessMetadata, CacheEntry, CachedPayload, EntryInfo};
pub use tier::{CacheTier, TierBudgets};
pub use tiered::{CacheStats, TierStats, TieredCache};
