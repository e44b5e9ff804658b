// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Conflict detection and field-level merge.
//!
//! Version markers are either numbers (epoch millis) or RFC 3339 strings.
//! Both are compared as instants; any other string compares lexically.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::queue::ConflictKind;

/// Field holding a payload's schema revision.
pub const SCHEMA_VERSION_FIELD: &str = "schemaVersion";

/// Manual answer to a deferred conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "value", rename_all = "snake_case")]
pub enum ManualResolution {
    /// Resend the local payload, overriding the remote
    KeepLocal,
    /// Drop the local change and adopt the remote state
    AcceptRemote,
    /// Send this payload instead
    Replace(Value),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    pub version_field: String,
    pub merge_key_field: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            version_field: "lastModified".to_string(),
            merge_key_field: "id".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Marker {
    Instant(i64),
    Text(String),
}

fn marker(value: &Value, field: &str) -> Option<Marker> {
    match value.get(field)? {
        Value::Number(n) => n.as_f64().map(|f| Marker::Instant(f as i64)),
        Value::String(s) => Some(
            DateTime::parse_from_rfc3339(s)
                .map(|t| Marker::Instant(t.timestamp_millis()))
                .unwrap_or_else(|_| Marker::Text(s.clone())),
        ),
        _ => None,
    }
}

fn compare_markers(a: &Marker, b: &Marker) -> Option<Ordering> {
    match (a, b) {
        (Marker::Instant(x), Marker::Instant(y)) => Some(x.cmp(y)),
        (Marker::Text(x), Marker::Text(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Whether `remote` carries a strictly newer marker than `local`.
/// A remote marker against a local payload without one counts as newer.
#[must_use]
pub fn remote_is_newer(local: &Value, remote: &Value, version_field: &str) -> bool {
    match (marker(local, version_field), marker(remote, version_field)) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(l), Some(r)) => compare_markers(&r, &l) == Some(Ordering::Greater),
    }
}

/// Whether `remote` changed any field `local` carries, the version marker
/// aside. Fields only the remote has (server-assigned ids, audit stamps)
/// do not count.
#[must_use]
pub fn differs_ignoring_version(local: &Value, remote: &Value, version_field: &str) -> bool {
    match (local.as_object(), remote.as_object()) {
        (Some(l), Some(r)) => l
            .iter()
            .filter(|(k, _)| k.as_str() != version_field)
            .any(|(k, v)| r.get(k) != Some(v)),
        _ => local != remote,
    }
}

/// Payloads that cannot be compared field by field.
#[must_use]
pub fn is_schema_mismatch(local: &Value, remote: &Value) -> bool {
    if local.is_object() != remote.is_object() {
        return true;
    }
    match (local.get(SCHEMA_VERSION_FIELD), remote.get(SCHEMA_VERSION_FIELD)) {
        (Some(l), Some(r)) => l != r,
        _ => false,
    }
}

/// Kind of conflict for a `409` answer.
#[must_use]
pub fn classify_rejection(local: Option<&Value>, remote: Option<&Value>) -> ConflictKind {
    match (local, remote) {
        (Some(l), Some(r)) if is_schema_mismatch(l, r) => ConflictKind::SchemaMismatch,
        _ => ConflictKind::ConcurrentlyModified,
    }
}

/// Conflict hidden in a `2xx` answer: the server echoed a newer copy with
/// different content.
///
/// Both sides must carry a marker. A local payload without one never
/// conflicts here, since the echo of an accepted write always looks newer.
#[must_use]
pub fn detect_in_success(local: &Value, remote: &Value, version_field: &str) -> Option<ConflictKind> {
    let (Some(l), Some(r)) = (marker(local, version_field), marker(remote, version_field)) else {
        return None;
    };
    if compare_markers(&r, &l) != Some(Ordering::Greater) {
        return None;
    }
    if is_schema_mismatch(local, remote) {
        return Some(ConflictKind::SchemaMismatch);
    }
    differs_ignoring_version(local, remote, version_field).then_some(ConflictKind::ConcurrentlyModified)
}

fn fresh_marker(existing: Option<&Value>, now: DateTime<Utc>) -> Value {
    match existing {
        Some(Value::String(_)) => Value::String(now.to_rfc3339()),
        _ => Value::from(now.timestamp_millis()),
    }
}

fn element_key<'a>(element: &'a Value, key_field: &str) -> Option<&'a Value> {
    element.as_object().and_then(|o| o.get(key_field))
}

/// Union two arrays. Keyed elements collide on `key_field` and the newer
/// side's copy wins in place; unkeyed elements collide on serialized form.
fn union_arrays(local: &[Value], remote: &[Value], key_field: &str, remote_newer: bool) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(local.len() + remote.len());
    let mut seen_unkeyed: HashSet<String> = HashSet::new();

    let mut push = |out: &mut Vec<Value>, element: &Value, from_newer: bool| {
        match element_key(element, key_field) {
            Some(key) => {
                let existing = out
                    .iter()
                    .position(|e| element_key(e, key_field) == Some(key));
                match existing {
                    Some(idx) if from_newer => out[idx] = element.clone(),
                    Some(_) => {}
                    None => out.push(element.clone()),
                }
            }
            None => {
                if seen_unkeyed.insert(element.to_string()) {
                    out.push(element.clone());
                }
            }
        }
    };

    for element in local {
        push(&mut out, element, !remote_newer);
    }
    for element in remote {
        push(&mut out, element, remote_newer);
    }
    out
}

/// Field-level merge of two object payloads.
///
/// Scalars (and nested objects) come from the newer side; arrays are unioned;
/// keys present on one side only are kept. The result gets a fresh version
/// marker. Returns `None` when either side is not an object.
#[must_use]
pub fn merge(local: &Value, remote: &Value, opts: &MergeOptions, now: DateTime<Utc>) -> Option<Value> {
    let l = local.as_object()?;
    let r = remote.as_object()?;
    let remote_newer = remote_is_newer(local, remote, &opts.version_field);

    let mut merged = Map::new();
    for (key, lv) in l {
        if key == &opts.version_field {
            continue;
        }
        let value = match r.get(key) {
            None => lv.clone(),
            Some(rv) => match (lv, rv) {
                (Value::Array(la), Value::Array(ra)) => {
                    Value::Array(union_arrays(la, ra, &opts.merge_key_field, remote_newer))
                }
                _ if remote_newer => rv.clone(),
                _ => lv.clone(),
            },
        };
        merged.insert(key.clone(), value);
    }
    for (key, rv) in r {
        if key != &opts.version_field && !l.contains_key(key) {
            merged.insert(key.clone(), rv.clone());
        }
    }

    let existing = l.get(&opts.version_field).or_else(|| r.get(&opts.version_field));
    merged.insert(opts.version_field.clone(), fresh_marker(existing, now));
    Some(Value::Object(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn opts() -> MergeOptions {
        MergeOptions::default()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap()
    }

    #[test]
    fn test_marker_comparison() {
        let older = json!({"lastModified": 100});
        let newer = json!({"lastModified": 200});
        assert!(remote_is_newer(&older, &newer, "lastModified"));
        assert!(!remote_is_newer(&newer, &older, "lastModified"));
        assert!(!remote_is_newer(&newer, &newer, "lastModified"));

        let iso_old = json!({"lastModified": "2026-01-01T00:00:00Z"});
        let iso_new = json!({"lastModified": "2026-01-01T00:00:01+00:00"});
        assert!(remote_is_newer(&iso_old, &iso_new, "lastModified"));

        assert!(remote_is_newer(&json!({}), &newer, "lastModified"));
        assert!(!remote_is_newer(&newer, &json!({}), "lastModified"));
    }

    #[test]
    fn test_detect_in_success() {
        let local = json!({"hour": 7, "lastModified": 100});
        let echo = json!({"hour": 7, "lastModified": 150});
        let changed = json!({"hour": 9, "lastModified": 150});
        let stale = json!({"hour": 9, "lastModified": 50});

        assert_eq!(detect_in_success(&local, &echo, "lastModified"), None);
        assert_eq!(
            detect_in_success(&local, &changed, "lastModified"),
            Some(ConflictKind::ConcurrentlyModified)
        );
        assert_eq!(detect_in_success(&local, &stale, "lastModified"), None);
    }

    #[test]
    fn test_accepted_write_echo_is_not_a_conflict() {
        // Server bumped the marker and stamped extra fields
        let local = json!({"hour": 7, "lastModified": 100});
        let stamped = json!({"hour": 7, "updatedBy": "server", "lastModified": 200});
        assert_eq!(detect_in_success(&local, &stamped, "lastModified"), None);
        assert!(!differs_ignoring_version(&local, &stamped, "lastModified"));

        // No local marker: nothing to compare against
        let created = json!({"id": 42, "hour": 7, "lastModified": 1000});
        assert_eq!(detect_in_success(&json!({"hour": 7}), &created, "lastModified"), None);
        assert_eq!(detect_in_success(&json!({"hour": 8}), &created, "lastModified"), None);

        // A local field the server dropped still counts
        let dropped = json!({"lastModified": 200});
        assert!(differs_ignoring_version(&local, &dropped, "lastModified"));
    }

    #[test]
    fn test_schema_mismatch() {
        assert!(is_schema_mismatch(&json!({"a": 1}), &json!([1])));
        assert!(is_schema_mismatch(
            &json!({"schemaVersion": 1}),
            &json!({"schemaVersion": 2})
        ));
        assert!(!is_schema_mismatch(&json!({"schemaVersion": 2}), &json!({"a": 1})));
        assert_eq!(
            classify_rejection(Some(&json!({"a": 1})), Some(&json!("gone"))),
            ConflictKind::SchemaMismatch
        );
        assert_eq!(classify_rejection(Some(&json!({"a": 1})), None), ConflictKind::ConcurrentlyModified);
    }

    #[test]
    fn test_merge_newer_scalars_and_keyed_union() {
        let local = json!({
            "label": "local label",
            "enabled": true,
            "days": [{"id": 1, "on": true}, {"id": 2, "on": true}],
            "tags": ["a", "b"],
            "lastModified": 100
        });
        let remote = json!({
            "label": "remote label",
            "days": [{"id": 2, "on": false}, {"id": 3, "on": true}],
            "tags": ["b", "c"],
            "snooze": 5,
            "lastModified": 200
        });

        let merged = merge(&local, &remote, &opts(), at(999)).unwrap();
        assert_eq!(merged["label"], "remote label");
        assert_eq!(merged["enabled"], true);
        assert_eq!(merged["snooze"], 5);
        assert_eq!(
            merged["days"],
            json!([{"id": 1, "on": true}, {"id": 2, "on": false}, {"id": 3, "on": true}])
        );
        assert_eq!(merged["tags"], json!(["a", "b", "c"]));
        assert_eq!(merged["lastModified"], 999);
    }

    #[test]
    fn test_merge_keeps_local_when_local_newer() {
        let local = json!({"label": "mine", "lastModified": "2026-03-01T00:00:00Z"});
        let remote = json!({"label": "theirs", "lastModified": "2026-02-01T00:00:00Z"});
        let merged = merge(&local, &remote, &opts(), at(0)).unwrap();
        assert_eq!(merged["label"], "mine");
        assert!(merged["lastModified"].is_string());
    }

    #[test]
    fn test_keyed_union_does_not_drop_volatile_variants() {
        // Same id, different volatile field: one element, newer copy
        let local = json!({"items": [{"id": "x", "seen": 1}], "lastModified": 1});
        let remote = json!({"items": [{"id": "x", "seen": 2}], "lastModified": 2});
        let merged = merge(&local, &remote, &opts(), at(5)).unwrap();
        assert_eq!(merged["items"], json!([{"id": "x", "seen": 2}]));
    }

    #[test]
    fn test_merge_requires_objects() {
        assert!(merge(&json!([1]), &json!({"a": 1}), &opts(), at(0)).is_none());
    }

    #[test]
    fn test_merge_is_idempotent_modulo_marker() {
        let local = json!({"a": 1, "xs": [{"id": 1}, 3], "lastModified": 10});
        let remote = json!({"a": 2, "xs": [3, {"id": 2}], "lastModified": 20});
        let first = merge(&local, &remote, &opts(), at(100)).unwrap();
        let second = merge(&local, &remote, &opts(), at(200)).unwrap();

        let strip = |v: &Value| {
            let mut v = v.clone();
            v.as_object_mut().unwrap().remove("lastModified");
            v
        };
        assert_eq!(strip(&first), strip(&second));
    }

    #[test]
    fn test_manual_resolution_serde() {
        let json = serde_json::to_value(ManualResolution::Replace(json!({"a": 1}))).unwrap();
        assert_eq!(json, json!({"action": "replace", "value": {"a": 1}}));
        let keep: ManualResolution = serde_json::from_value(json!({"action": "keep_local"})).unwrap();
        assert_eq!(keep, ManualResolution::KeepLocal);
    }
}
