//! The `Record` type and JSON projection derivation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single record stored in a Collection.
///
/// `payload` is the authoritative opaque form; `json_projection` is derived
/// from it on every create/update and is what structured filters and FTS
/// index against. `labels` never affect `json_projection`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Caller-assigned unique id within the owning Collection.
    pub id: String,
    /// Opaque bytes; the authoritative form of the record's content.
    pub payload: Vec<u8>,
    /// Textual JSON derived from `payload`, used for structured queries
    /// and FTS. See [`derive_json_projection`].
    pub json_projection: Value,
    /// Optional relative path into the owning Collection's FileSystem.
    pub data_uri: Option<String>,
    /// Arbitrary key/value labels, independent of `payload`.
    pub labels: BTreeMap<String, String>,
    /// Unix seconds, set once on `Create` and never modified thereafter.
    pub created_at: i64,
    /// Unix seconds, bumped on every successful `Update`.
    pub updated_at: i64,
}

impl Record {
    /// Construct a record ready for `Store::create`. `json_projection` is
    /// derived from `payload` here so callers never hand-author it.
    /// `created_at`/`updated_at` are stamped by the Collection, not here.
    pub fn new(
        id: impl Into<String>,
        payload: Vec<u8>,
        data_uri: Option<String>,
        labels: BTreeMap<String, String>,
    ) -> Self {
        let json_projection = derive_json_projection(&payload);
        Self {
            id: id.into(),
            payload,
            json_projection,
            data_uri,
            labels,
            created_at: 0,
            updated_at: 0,
        }
    }
}

/// Derive a record's JSON projection from its opaque payload.
///
/// If `payload` already parses as JSON, that parsed value is the
/// projection verbatim. Otherwise the payload is wrapped so it still has a
/// queryable string leaf: `{"raw": "<utf8-lossy or base64>"}`.
pub fn derive_json_projection(payload: &[u8]) -> Value {
    if let Ok(v) = serde_json::from_slice::<Value>(payload) {
        return v;
    }
    match std::str::from_utf8(payload) {
        Ok(s) => serde_json::json!({ "raw": s }),
        Err(_) => {
            use base64::Engine;
            serde_json::json!({ "raw": base64::engine::general_purpose::STANDARD.encode(payload) })
        }
    }
}

/// Flatten a JSON projection into a space-joined token string for FTS
/// indexing: leaf strings concatenated, numbers/booleans
/// stringified, objects recursed, arrays iterated).
pub fn flatten_for_fts(value: &Value) -> String {
    let mut out = String::new();
    flatten_into(value, &mut out);
    out
}

fn flatten_into(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(s);
            out.push(' ');
        }
        Value::Number(n) => {
            out.push_str(&n.to_string());
            out.push(' ');
        }
        Value::Bool(b) => {
            out.push_str(if *b { "true" } else { "false" });
            out.push(' ');
        }
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                flatten_into(v, out);
            }
        }
        Value::Null => {}
    }
}
