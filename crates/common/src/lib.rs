//! gateway_common
//!
//! Shared primitives for the security core:
//! - canonical JSON serialization + SHA-256 hashing, used to derive stable
//!   identifiers for redaction pattern tables and sandbox deny-path tables
//! - the dynamic `Value` shape that Identity Guard and the Redaction Engine
//!   recurse over (serde_json's `Value` already is the tagged variant the
//!   design calls for: Null | Bool | Number | String | Array | Object)
//! - an immutable environment-snapshot type shared by the bind guard and
//!   the redaction engine's env-masking helper
//!
//! IMPORTANT: canonical JSON is for hashing only. Do not "pretty print" it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonError {
    #[error("failed to serialize json: {0}")]
    Json(#[from] serde_json::Error),
}

/// The dynamic payload shape Identity Guard and the Redaction Engine walk.
/// serde_json's `Value` already matches `Null | Bool | Number | Text |
/// Sequence(Value) | Mapping(Text -> Value)` so we reuse it rather than
/// reinventing an isomorphic enum.
pub type Value = serde_json::Value;

/// Default recursion bound for `deep_strip` / `redact_payload_deep`.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// An immutable environment snapshot: name -> value. `BTreeMap` gives
/// deterministic iteration order, which matters for reproducible audit output.
pub type Env = BTreeMap<String, String>;

/// Serialize to canonical JSON bytes:
/// - stable key ordering (we enforce sorting via Value roundtrip)
/// - no whitespace
/// - UTF-8
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonError> {
    let v = serde_json::to_value(value)?;
    let sorted = sort_json_value(v);
    Ok(serde_json::to_vec(&sorted)?)
}

/// Return "sha256:<hex>" of canonical JSON bytes.
pub fn sha256_canonical_json<T: Serialize>(value: &T) -> Result<String, CanonError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(sha256_bytes(&bytes))
}

/// Return "sha256:<hex>" of raw bytes.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    format!("sha256:{}", hex::encode(digest))
}

fn sort_json_value(v: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, sort_json_value(v));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json_value).collect()),
        other => other,
    }
}

/// Read environment variables into an immutable snapshot. Invalid UTF-8 is
/// skipped rather than erroring (unknown/unreadable values are absent, §7).
pub fn capture_env() -> Env {
    std::env::vars().collect()
}

/// Logger-level severity, the scale every `AuditEvent` is dispatched at
/// (§4.H: "severity maps to logger level"). Distinct from the Anomaly
/// Detector's own business-severity scale (low/medium/high/critical), which
/// travels inside an event's `details` rather than as this dispatch level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// A structured security decision or observation, ready to be handed to the
/// audit sink. Components build these as plain data; only the audit sink
/// (§4.H) knows how to emit them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event: String,
    pub severity: Severity,
    pub details: Value,
}

impl AuditEvent {
    pub fn new(event: impl Into<String>, severity: Severity, details: Value) -> Self {
        Self { event: event.into(), severity, details }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Obj {
        b: u32,
        a: u32,
    }

    #[test]
    fn canonical_hash_is_stable_under_key_order() {
        let x = Obj { b: 2, a: 1 };
        let y = serde_json::json!({"a": 1, "b": 2});
        let hx = sha256_canonical_json(&x).unwrap();
        let hy = sha256_canonical_json(&y).unwrap();
        assert_eq!(hx, hy);
    }
}
