//! Event payload shaping and byte accounting.

use serde_json::{Map, Value};

/// An opaque key/value event record handed in by the tracker.
///
/// `serde_json::Map` preserves insertion order, so the wire encoding is
/// stable across the persistence round-trip.
pub type EventPayload = Map<String, Value>;

/// Field carrying the shared delivery timestamp, attached just before
/// transmission.
pub const SENT_TIMESTAMP_KEY: &str = "stm";

/// Keys always serialized last in a GET query string: the plain context
/// payload and the encoded context indicator. Keeping them at the tail
/// keeps the high-value fields inside any downstream truncation.
const LOW_PRIORITY_KEYS: [&str; 2] = ["co", "cx"];

/// Coerce every payload value to its string form.
///
/// Numeric and boolean values become their literal text so the wire
/// encoding is identical whether a record is sent immediately or read
/// back from the persisted queue.
pub fn stringify_payload(payload: &EventPayload) -> EventPayload {
    let mut out = Map::new();
    for (key, value) in payload {
        out.insert(key.clone(), Value::String(value_text(value)));
    }
    out
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Exact encoded byte length of a record's JSON serialization.
pub fn post_record_bytes(payload: &EventPayload) -> usize {
    serde_json::to_vec(payload).map(|body| body.len()).unwrap_or(0)
}

/// Render a payload as a query string with a leading `?`.
///
/// Fields keep their insertion order except the low-priority context keys,
/// which always land last.
pub fn to_query_string(payload: &EventPayload) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in payload {
        if LOW_PRIORITY_KEYS.contains(&key.as_str()) {
            continue;
        }
        serializer.append_pair(key, &value_text(value));
    }
    for key in LOW_PRIORITY_KEYS {
        if let Some(value) = payload.get(key) {
            serializer.append_pair(key, &value_text(value));
        }
    }
    format!("?{}", serializer.finish())
}

/// Interpolate the shared send-time value immediately after the leading `?`.
pub fn with_sent_timestamp(query: &str, stm: &str) -> String {
    let rest = query.strip_prefix('?').unwrap_or(query);
    format!("?{}={}&{}", SENT_TIMESTAMP_KEY, stm, rest)
}
