//! Delta protocol integration tests
//!
//! Exercises the wire-level contract of the artefact protocol: RFC 6902
//! round-trips, delta framing and anchoring, envelope shapes, and the
//! inline-vs-linked size routing. Everything runs offline against the
//! codecs and the patch engine.

use modelling_bus::{
    event_payload_allowed, json_ops, JsonDelta, RepositoryEvent, StreamedEvent,
    MAX_EVENT_PAYLOAD_SIZE,
};
use serde_json::{json, Value};

/// Minimal receiver for the delta protocol: the anchor check and patch
/// application exactly as a subscriber performs them.
struct Receiver {
    current: Value,
    updated: Value,
    considered: Value,
    anchor: String,
}

impl Receiver {
    fn new() -> Self {
        Self {
            current: Value::Null,
            updated: Value::Null,
            considered: Value::Null,
            anchor: "fresh".into(),
        }
    }

    fn on_state(&mut self, state: Value, anchor: &str) {
        self.current = state.clone();
        self.updated = state.clone();
        self.considered = state;
        self.anchor = anchor.to_string();
    }

    fn on_update(&mut self, delta: &JsonDelta) -> bool {
        if delta.current_timestamp != self.anchor {
            return false;
        }
        match json_ops::apply_patch(&self.current, &delta.operations) {
            Ok(patched) => {
                self.updated = patched.clone();
                self.considered = patched;
                true
            }
            Err(_) => false,
        }
    }

    fn on_considering(&mut self, delta: &JsonDelta) -> bool {
        if delta.current_timestamp != self.anchor {
            return false;
        }
        match json_ops::apply_patch(&self.updated, &delta.operations) {
            Ok(patched) => {
                self.considered = patched;
                true
            }
            Err(_) => false,
        }
    }
}

fn frame(old: &Value, new: &Value, timestamp: &str, anchor: &str) -> JsonDelta {
    JsonDelta {
        operations: json_ops::diff(old, new).unwrap(),
        timestamp: timestamp.into(),
        current_timestamp: anchor.into(),
    }
}

/// A framed delta survives the wire byte-for-byte semantically.
fn over_the_wire(delta: &JsonDelta) -> JsonDelta {
    let encoded = serde_json::to_vec(delta).unwrap();
    serde_json::from_slice(&encoded).unwrap()
}

// =========================================================================
// End-to-end scenarios
// =========================================================================

#[test]
fn state_posting_resets_all_views() {
    let mut receiver = Receiver::new();
    receiver.on_state(json!({"n": 1}), "t1");

    assert_eq!(receiver.current, json!({"n": 1}));
    assert_eq!(receiver.updated, json!({"n": 1}));
    assert_eq!(receiver.considered, json!({"n": 1}));
    assert_eq!(receiver.anchor, "t1");
}

#[test]
fn update_after_state_moves_updated_and_considered() {
    let mut receiver = Receiver::new();
    receiver.on_state(json!({"n": 1}), "t1");

    let delta = over_the_wire(&frame(&json!({"n": 1}), &json!({"n": 2}), "t1-d", "t1"));
    assert!(receiver.on_update(&delta));

    assert_eq!(receiver.current, json!({"n": 1}));
    assert_eq!(receiver.updated, json!({"n": 2}));
    assert_eq!(receiver.considered, json!({"n": 2}));
}

#[test]
fn considering_only_moves_considered() {
    let mut receiver = Receiver::new();
    receiver.on_state(json!({"a": [1, 2]}), "t1");

    let delta = over_the_wire(&frame(
        &json!({"a": [1, 2]}),
        &json!({"a": [1, 2, 3]}),
        "t1-d",
        "t1",
    ));
    assert!(receiver.on_considering(&delta));

    assert_eq!(receiver.current, json!({"a": [1, 2]}));
    assert_eq!(receiver.updated, json!({"a": [1, 2]}));
    assert_eq!(receiver.considered, json!({"a": [1, 2, 3]}));
}

#[test]
fn redelivered_stale_update_is_rejected() {
    // B adopts S1@t1, then S2@t2; the old update anchored at t1 comes in
    // again via the retained topic and must be dropped without mutation.
    let mut receiver = Receiver::new();
    receiver.on_state(json!({"s": 1}), "t1");
    let stale = frame(&json!({"s": 1}), &json!({"s": 10}), "t1-d", "t1");

    receiver.on_state(json!({"s": 2}), "t2");
    assert!(!receiver.on_update(&stale));

    assert_eq!(receiver.current, json!({"s": 2}));
    assert_eq!(receiver.updated, json!({"s": 2}));
    assert_eq!(receiver.considered, json!({"s": 2}));
}

// =========================================================================
// Diff/patch properties
// =========================================================================

#[test]
fn diff_patch_round_trip_holds() {
    let pairs = [
        (json!(null), json!({"model": {"nodes": []}})),
        (json!({"model": {"nodes": []}}), json!({"model": {"nodes": [1]}})),
        (json!({"deep": {"a": {"b": [1, 2, {"c": 3}]}}}), json!({"deep": {"a": {"b": [1]}}})),
        (json!([1, 2, 3]), json!([3, 2, 1])),
        (json!("scalar"), json!(42)),
    ];

    for (a, b) in pairs {
        let patch = json_ops::diff(&a, &b).unwrap();
        assert_eq!(json_ops::apply_patch(&a, &patch).unwrap(), b, "{a} -> {b}");
    }
}

#[test]
fn anchor_discipline_never_mutates_on_mismatch() {
    let mut receiver = Receiver::new();
    receiver.on_state(json!({"n": 1}), "t7");

    for wrong_anchor in ["t1", "t6", "t8", ""] {
        let delta = frame(&json!({"n": 1}), &json!({"n": 99}), "d", wrong_anchor);
        assert!(!receiver.on_update(&delta));
        assert!(!receiver.on_considering(&delta));
        assert_eq!(receiver.updated, json!({"n": 1}));
        assert_eq!(receiver.considered, json!({"n": 1}));
    }
}

// =========================================================================
// Envelope shapes
// =========================================================================

#[test]
fn delta_envelope_uses_wire_field_names() {
    let delta = frame(&json!({"n": 1}), &json!({"n": 2}), "2026-01-01-10-00-00-01", "2026-01-01-10-00-00-00");
    let encoded = serde_json::to_value(&delta).unwrap();
    let object = encoded.as_object().unwrap();

    assert!(object.contains_key("operations"));
    assert!(object.contains_key("timestamp"));
    assert!(object.contains_key("current timestamp"));
    assert_eq!(object.len(), 3);
}

#[test]
fn link_and_streamed_envelopes_are_distinct() {
    let link = RepositoryEvent {
        server: None,
        port: None,
        file_path: "bus/bus-version-1.0/exp/agent/observations/json/o1/payload".into(),
        timestamp: "t".into(),
    };
    let encoded = serde_json::to_vec(&link).unwrap();

    // Single-server mode: no endpoint in the envelope.
    let as_value: Value = serde_json::from_slice(&encoded).unwrap();
    assert!(as_value.get("server").is_none());
    assert!(as_value.get("port").is_none());

    // The link envelope never parses as a streamed envelope.
    assert!(serde_json::from_slice::<StreamedEvent>(&encoded).is_err());
}

// =========================================================================
// Size routing
// =========================================================================

#[test]
fn payloads_route_by_size_bound() {
    let small = vec![b'x'; MAX_EVENT_PAYLOAD_SIZE];
    let large = vec![b'x'; MAX_EVENT_PAYLOAD_SIZE + 1];

    assert!(event_payload_allowed(&small));
    assert!(!event_payload_allowed(&large));
}

#[test]
fn streamed_envelope_round_trips_inline_payload() {
    let event = StreamedEvent {
        timestamp: "2026-01-01-10-00-00-00".into(),
        payload: json!({"reading": [1, 2, 3]}),
    };
    let encoded = serde_json::to_vec(&event).unwrap();
    assert!(event_payload_allowed(&encoded));

    let decoded: StreamedEvent = serde_json::from_slice(&encoded).unwrap();
    assert_eq!(decoded, event);
}
