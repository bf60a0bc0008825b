//! JSON diff and patch operations
//!
//! Differences between artefact states travel as RFC 6902 JSON Patches
//! (<https://datatracker.ietf.org/doc/html/rfc6902>). The `json-patch` crate
//! does the heavy lifting; these wrappers keep the rest of the code
//! independent of its types.

use crate::error::BusError;
use serde_json::Value;

/// Compute the difference between two JSON documents as an RFC 6902 patch.
/// An empty operations array means the documents are equal.
pub fn diff(source: &Value, target: &Value) -> Result<Value, BusError> {
    let patch = json_patch::diff(source, target);
    Ok(serde_json::to_value(patch)?)
}

/// Apply an RFC 6902 patch to a JSON document, returning the patched
/// document. The source document is never left half-patched: failures
/// return [`BusError::Patch`] and the caller keeps its original.
pub fn apply_patch(source: &Value, operations: &Value) -> Result<Value, BusError> {
    let patch: json_patch::Patch = serde_json::from_value(operations.clone())
        .map_err(|err| BusError::Patch(format!("malformed patch: {err}")))?;

    let mut document = source.clone();
    json_patch::patch(&mut document, &patch)
        .map_err(|err| BusError::Patch(err.to_string()))?;

    Ok(document)
}

/// Whether the bytes parse as JSON. Any JSON value counts, including
/// `null`, scalars, arrays, and objects.
pub fn is_json(bytes: &[u8]) -> bool {
    serde_json::from_slice::<Value>(bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_patch_round_trip() {
        let cases = [
            (json!({"n": 1}), json!({"n": 2})),
            (json!({"a": [1, 2]}), json!({"a": [1, 2, 3]})),
            (json!(null), json!({"fresh": true})),
            (json!({"keep": 1, "drop": 2}), json!({"keep": 1})),
            (json!([1, 2, 3]), json!("scalar")),
        ];

        for (old, new) in cases {
            let patch = diff(&old, &new).unwrap();
            let patched = apply_patch(&old, &patch).unwrap();
            assert_eq!(patched, new);
        }
    }

    #[test]
    fn test_empty_diff_is_noop() {
        let doc = json!({"same": [1, {"x": true}]});
        let patch = diff(&doc, &doc).unwrap();
        assert_eq!(patch, json!([]));
        assert_eq!(apply_patch(&doc, &patch).unwrap(), doc);
    }

    #[test]
    fn test_failed_patch_reports_error() {
        let doc = json!({"n": 1});
        // Removing a path that does not exist must fail.
        let patch = json!([{"op": "remove", "path": "/missing"}]);
        assert!(matches!(apply_patch(&doc, &patch), Err(BusError::Patch(_))));
    }

    #[test]
    fn test_malformed_patch_rejected() {
        let doc = json!({});
        let patch = json!([{"op": "teleport", "path": "/x"}]);
        assert!(matches!(apply_patch(&doc, &patch), Err(BusError::Patch(_))));
    }

    #[test]
    fn test_is_json_accepts_any_value() {
        assert!(is_json(b"null"));
        assert!(is_json(b"42"));
        assert!(is_json(b"\"text\""));
        assert!(is_json(b"[1,2]"));
        assert!(is_json(b"{\"k\":\"v\"}"));
        assert!(!is_json(b""));
        assert!(!is_json(b"{not json"));
    }
}
