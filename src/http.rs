// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request and response types exchanged with the application layer.
//!
//! # Example
//!
//! ```
//! use offline_core::http::{RequestDescriptor, HttpMethod};
//!
//! let req = RequestDescriptor::get("https://api.example.com/api/alarms#top");
//! assert_eq!(req.cache_key(), "GET https://api.example.com/api/alarms");
//! assert_eq!(req.path(), "/api/alarms");
//! assert!(!req.method.is_mutating());
//! assert!(HttpMethod::Put.is_mutating());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::cache::entry::{CacheEntry, CachedPayload};
use crate::cache::CacheTier;
use crate::error::OfflineError;

/// Header carrying the [`ResponseSource`] label.
pub const SOURCE_HEADER: &str = "x-offline-source";
/// Header naming the tier that served a cached response.
pub const TIER_HEADER: &str = "x-offline-tier";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "HEAD" => Some(Self::Head),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            "OPTIONS" => Some(Self::Options),
            _ => None,
        }
    }

    /// Create/update/delete methods. These never touch the cache.
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch | Self::Delete)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the application issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Top-level page navigation
    Navigate,
    #[default]
    Cors,
    NoCors,
    SameOrigin,
}

/// An application-issued network request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
    #[serde(default)]
    pub mode: RequestMode,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            mode: RequestMode::default(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    /// A navigation request (offline fallback is an HTML document).
    pub fn navigate(url: impl Into<String>) -> Self {
        Self::get(url).with_mode(RequestMode::Navigate)
    }

    #[must_use]
    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a JSON body and the matching content type.
    #[must_use]
    pub fn with_json(self, value: &Value) -> Self {
        self.with_header("content-type", "application/json")
            .with_body(value.to_string().into_bytes())
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    #[must_use]
    pub fn has_json_body(&self) -> bool {
        self.content_type().is_some_and(is_json_content_type)
    }

    /// Normalized request identity: method plus fragment-less URL.
    #[must_use]
    pub fn cache_key(&self) -> String {
        cache_key(self.method, &self.url)
    }

    #[must_use]
    pub fn path(&self) -> String {
        url_path(&self.url)
    }
}

/// Outcome label attached to every response the router returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseSource {
    /// Fresh from the network
    Network,
    /// Cache hit served without contacting the network
    Cache { tier: CacheTier },
    /// Network failed; cached copy from the request's own tier
    Stale { tier: CacheTier },
    /// Network failed; cached copy found by searching every tier
    Fallback { tier: CacheTier },
    /// Generated stand-in asset
    Placeholder,
    /// Structured offline response
    Offline,
    /// Mutation accepted into the offline queue
    Queued,
}

impl ResponseSource {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Cache { .. } => "cache",
            Self::Stale { .. } => "stale",
            Self::Fallback { .. } => "fallback",
            Self::Placeholder => "placeholder",
            Self::Offline => "offline",
            Self::Queued => "queued",
        }
    }

    #[must_use]
    pub fn tier(&self) -> Option<CacheTier> {
        match self {
            Self::Cache { tier } | Self::Stale { tier } | Self::Fallback { tier } => Some(*tier),
            _ => None,
        }
    }

    /// Whether the body reflects the server's current state.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Network | Self::Cache { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl Response {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
            source: ResponseSource::Network,
        }
    }

    pub fn json(status: u16, value: &Value) -> Self {
        Self::new(status, value.to_string().into_bytes()).with_header("content-type", "application/json")
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON.
    pub fn json_body(&self) -> Result<Value, OfflineError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Set the source and mirror it into the annotation headers.
    #[must_use]
    pub fn annotate(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self.headers
            .retain(|(n, _)| !n.eq_ignore_ascii_case(SOURCE_HEADER) && !n.eq_ignore_ascii_case(TIER_HEADER));
        self.headers.push((SOURCE_HEADER.to_string(), source.label().to_string()));
        if let Some(tier) = source.tier() {
            self.headers.push((TIER_HEADER.to_string(), tier.as_str().to_string()));
        }
        self
    }

    /// Rebuild a response from a cached entry.
    pub fn from_entry(entry: &CacheEntry, source: ResponseSource) -> Self {
        let mut response = Self::new(entry.payload.status, entry.payload.body.clone());
        response.headers = entry.payload.headers.clone();
        if let Some(ref ct) = entry.payload.content_type {
            response = response.with_header("content-type", ct.clone());
        }
        response.annotate(source)
    }

    /// Payload to store for this response. Annotation headers are stripped.
    #[must_use]
    pub fn to_payload(&self) -> CachedPayload {
        CachedPayload {
            status: self.status,
            content_type: self.content_type().map(str::to_string),
            headers: self
                .headers
                .iter()
                .filter(|(n, _)| {
                    !n.eq_ignore_ascii_case(SOURCE_HEADER)
                        && !n.eq_ignore_ascii_case(TIER_HEADER)
                        && !n.eq_ignore_ascii_case("content-type")
                })
                .cloned()
                .collect(),
            body: self.body.clone(),
        }
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub(crate) fn is_json_content_type(ct: &str) -> bool {
    let ct = ct.to_ascii_lowercase();
    ct.starts_with("application/json") || (ct.starts_with("application/") && ct.contains("+json"))
}

/// Strip the fragment; absolute URLs are also normalized by the `url` crate
/// (lowercase scheme/host, default port removed).
#[must_use]
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => trimmed.split('#').next().unwrap_or(trimmed).to_string(),
    }
}

#[must_use]
pub fn cache_key(method: HttpMethod, url: &str) -> String {
    format!("{} {}", method.as_str(), normalize_url(url))
}

/// Path component of an absolute or relative URL.
#[must_use]
pub fn url_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(url) = Url::parse(trimmed) {
        return url.path().to_string();
    }
    let end = trimmed.find(['?', '#']).unwrap_or(trimmed.len());
    let path = &trimmed[..end];
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// URL of the collection containing `raw` (`/api/alarms/7` → `/api/alarms`).
/// Query and fragment are dropped. Returns `None` at the root.
#[must_use]
pub fn parent_collection_url(raw: &str) -> Option<String> {
    let path = url_path(raw);
    let trimmed = path.trim_end_matches('/');
    let cut = trimmed.rfind('/')?;
    if cut == 0 && trimmed.len() <= 1 {
        return None;
    }
    let parent = if cut == 0 { "/" } else { &trimmed[..cut] };
    if parent == "/" && trimmed.is_empty() {
        return None;
    }

    match Url::parse(raw.trim()) {
        Ok(mut url) => {
            url.set_path(parent);
            url.set_query(None);
            url.set_fragment(None);
            Some(url.to_string())
        }
        Err(_) => Some(parent.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_strips_fragment_and_normalizes_host() {
        assert_eq!(
            cache_key(HttpMethod::Get, "HTTPS://Example.COM:443/a?b=1#frag"),
            "GET https://example.com/a?b=1"
        );
        assert_eq!(cache_key(HttpMethod::Get, "/api/alarms#x"), "GET /api/alarms");
    }

    #[test]
    fn test_url_path_for_relative_and_absolute() {
        assert_eq!(url_path("https://x.test/api/alarms?limit=5"), "/api/alarms");
        assert_eq!(url_path("/api/alarms?limit=5"), "/api/alarms");
        assert_eq!(url_path("img/logo.png"), "/img/logo.png");
    }

    #[test]
    fn test_parent_collection() {
        assert_eq!(
            parent_collection_url("https://x.test/api/alarms/7?x=1").as_deref(),
            Some("https://x.test/api/alarms")
        );
        assert_eq!(parent_collection_url("/api/alarms/7").as_deref(), Some("/api/alarms"));
        assert_eq!(parent_collection_url("/api").as_deref(), Some("/"));
        assert_eq!(parent_collection_url("/"), None);
    }

    #[test]
    fn test_method_parse_and_mutating() {
        assert_eq!(HttpMethod::parse("patch"), Some(HttpMethod::Patch));
        assert_eq!(HttpMethod::parse("TRACE"), None);
        assert!(HttpMethod::Delete.is_mutating());
        assert!(!HttpMethod::Head.is_mutating());
    }

    #[test]
    fn test_annotate_replaces_previous_source() {
        let response = Response::new(200, b"ok".to_vec())
            .annotate(ResponseSource::Cache { tier: CacheTier::Api })
            .annotate(ResponseSource::Stale { tier: CacheTier::Dynamic });

        assert_eq!(response.header(SOURCE_HEADER), Some("stale"));
        assert_eq!(response.header(TIER_HEADER), Some("dynamic"));
        assert_eq!(
            response.headers.iter().filter(|(n, _)| n == SOURCE_HEADER).count(),
            1
        );
        assert!(!response.source.is_fresh());
    }

    #[test]
    fn test_payload_strips_annotation_headers() {
        let response = Response::json(200, &json!({"a": 1}))
            .with_header("etag", "\"1\"")
            .annotate(ResponseSource::Network);
        let payload = response.to_payload();

        assert_eq!(payload.content_type.as_deref(), Some("application/json"));
        assert_eq!(payload.headers, vec![("etag".to_string(), "\"1\"".to_string())]);
    }

    #[test]
    fn test_json_content_type_detection() {
        let req = RequestDescriptor::new(HttpMethod::Post, "/api/alarms").with_json(&json!({"a": 1}));
        assert!(req.has_json_body());
        assert!(is_json_content_type("application/problem+json"));
        assert!(!is_json_content_type("text/html"));
    }
}
