// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Responses synthesized when neither network nor cache can answer.

use serde_json::json;

use crate::http::{Response, ResponseSource};
use crate::queue::QueuedMutation;

const OFFLINE_HTML: &str = "<!doctype html><html><head><meta charset=\"utf-8\">\
<title>Offline</title></head><body><h1>You are offline</h1>\
<p>Your alarms still ring. Changes will sync when you reconnect.</p></body></html>";

const PLACEHOLDER_SVG: &str = "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"64\" height=\"64\" \
viewBox=\"0 0 64 64\"><rect width=\"64\" height=\"64\" fill=\"#e0e0e0\"/>\
<path d=\"M16 44l10-12 8 9 6-7 8 10z\" fill=\"#9e9e9e\"/></svg>";

/// `503` JSON body for API callers.
#[must_use]
pub fn offline_json(url: &str, upstream_status: Option<u16>) -> Response {
    let body = json!({
        "error": "offline",
        "offline": true,
        "url": url,
        "upstreamStatus": upstream_status,
    });
    Response::json(503, &body).annotate(ResponseSource::Offline)
}

/// Minimal page for navigations when no offline document is cached.
#[must_use]
pub fn offline_html() -> Response {
    Response::new(503, OFFLINE_HTML.as_bytes().to_vec())
        .with_header("content-type", "text/html; charset=utf-8")
        .annotate(ResponseSource::Offline)
}

#[must_use]
pub fn offline_text() -> Response {
    Response::new(503, b"offline".to_vec())
        .with_header("content-type", "text/plain; charset=utf-8")
        .annotate(ResponseSource::Offline)
}

/// Stand-in image served with `200` so the UI renders something.
#[must_use]
pub fn placeholder_image() -> Response {
    Response::new(200, PLACEHOLDER_SVG.as_bytes().to_vec())
        .with_header("content-type", "image/svg+xml")
        .annotate(ResponseSource::Placeholder)
}

/// `202` acknowledgment for a mutation parked in the queue.
#[must_use]
pub fn queued(mutation: &QueuedMutation) -> Response {
    let body = json!({
        "queued": true,
        "id": mutation.id,
        "domain": mutation.domain,
    });
    Response::json(202, &body).annotate(ResponseSource::Queued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpMethod, RequestDescriptor, SOURCE_HEADER};

    #[test]
    fn test_offline_json_shape() {
        let r = offline_json("/api/alarms", Some(502));
        assert_eq!(r.status, 503);
        assert_eq!(r.header(SOURCE_HEADER), Some("offline"));
        let body = r.json_body().unwrap();
        assert_eq!(body["offline"], true);
        assert_eq!(body["upstreamStatus"], 502);

        let none = offline_json("/api/alarms", None).json_body().unwrap();
        assert!(none["upstreamStatus"].is_null());
    }

    #[test]
    fn test_placeholder_is_renderable() {
        let r = placeholder_image();
        assert_eq!(r.status, 200);
        assert_eq!(r.source, ResponseSource::Placeholder);
        assert_eq!(r.content_type(), Some("image/svg+xml"));
    }

    #[test]
    fn test_queued_ack() {
        let req = RequestDescriptor::new(HttpMethod::Post, "/api/alarms").with_json(&json!({"hour": 7}));
        let m = QueuedMutation::from_request("alarms", &req).unwrap();
        let body = queued(&m).json_body().unwrap();
        assert_eq!(body["queued"], true);
        assert_eq!(body["id"], m.id.as_str());
        assert_eq!(body["domain"], "alarms");
    }
}
