//! Access-tracked cache entries.
//!
//! Every stored response carries an [`AccessMetadata`] record next to the
//! payload. The eviction engine scores entries from this record alone.

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Stored response body plus the content metadata needed to replay it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPayload {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl CachedPayload {
    pub fn new(status: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            headers: Vec::new(),
            body,
        }
    }
}

/// Insertion and access bookkeeping for one entry.
///
/// `last_accessed_at == 0` means no access was ever recorded (e.g. rows
/// written by an older build); such entries score lowest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessMetadata {
    pub inserted_at: u64,
    pub last_accessed_at: u64,
    pub access_count: u64,
}

impl AccessMetadata {
    /// Metadata for an entry written at `now`. Insertion counts as a touch
    /// but not as an access.
    #[must_use]
    pub fn fresh(now: u64) -> Self {
        Self {
            inserted_at: now,
            last_accessed_at: now,
            access_count: 0,
        }
    }

    pub fn record_access(&mut self, now: u64) {
        self.last_accessed_at = self.last_accessed_at.max(now);
        self.access_count = self.access_count.saturating_add(1);
    }

    #[must_use]
    pub fn is_recorded(&self) -> bool {
        self.last_accessed_at > 0
    }
}

/// A cached response keyed by normalized request identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: CachedPayload,
    pub size_bytes: usize,
    pub meta: AccessMetadata,
}

impl CacheEntry {
    /// Wrap a payload with fresh metadata. Size is the body length.
    pub fn new(key: impl Into<String>, payload: CachedPayload) -> Self {
        Self::with_metadata(key, payload, AccessMetadata::fresh(now_millis()))
    }

    pub fn with_metadata(key: impl Into<String>, payload: CachedPayload, meta: AccessMetadata) -> Self {
        let size_bytes = payload.body.len();
        Self {
            key: key.into(),
            payload,
            size_bytes,
            meta,
        }
    }

    /// Metadata-only view used by eviction.
    #[must_use]
    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            key: self.key.clone(),
            size_bytes: self.size_bytes,
            meta: self.meta,
        }
    }
}

/// Entry metadata without the payload, returned by tier enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: String,
    pub size_bytes: usize,
    pub meta: AccessMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_sizes_by_body() {
        let entry = CacheEntry::new(
            "GET https://example.test/a",
            CachedPayload::new(200, Some("text/plain".into()), vec![0u8; 40]),
        );
        assert_eq!(entry.size_bytes, 40);
        assert_eq!(entry.meta.access_count, 0);
        assert!(entry.meta.is_recorded());
        assert_eq!(entry.meta.inserted_at, entry.meta.last_accessed_at);
    }

    #[test]
    fn test_record_access_is_monotonic() {
        let mut meta = AccessMetadata::fresh(1_000);
        meta.record_access(2_000);
        meta.record_access(1_500);
        assert_eq!(meta.access_count, 2);
        assert_eq!(meta.last_accessed_at, 2_000);
    }

    #[test]
    fn test_default_metadata_is_unrecorded() {
        assert!(!AccessMetadata::default().is_recorded());
    }
}
