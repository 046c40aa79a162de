//! gateway_identity
//!
//! Component D: strips impersonation fields from inbound request payloads
//! and resolves which identity a request is trusted to act as. Runs first
//! in the per-request pipeline (§5: "Identity Guard -> Anomaly Detector ->
//! Audit Sink"); the events it produces are plain data, left for the caller
//! to hand to the audit sink in that order.

use gateway_common::{AuditEvent, Severity, Value};
use serde::{Deserialize, Serialize};

/// Exact field names stripped from every payload, never forwarded downstream.
pub const FORBIDDEN_FIELDS: &[&str] = &[
    "impersonate",
    "impersonate_as",
    "impersonateAs",
    "post_as",
    "postAs",
    "send_as",
    "sendAs",
    "as_user",
    "asUser",
    "from_user",
    "fromUser",
    "from_id",
    "fromId",
    "actor_id",
    "actorId",
    "override_identity",
    "overrideIdentity",
    "spoof",
    "spoof_as",
];

/// Logged but never removed.
pub const MONITORED_FIELDS: &[&str] =
    &["agent_id", "agentId", "display_name", "displayName", "actor"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripResult {
    /// True iff any forbidden field was present and removed.
    pub sanitized: bool,
    pub stripped_fields: Vec<String>,
    pub original_field_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainsForbidden {
    pub has_forbidden: bool,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Session,
    Bot,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityResolution {
    pub valid: bool,
    pub resolved_identity: Option<String>,
    pub source: IdentitySource,
}

fn object_field_count(payload: &Value) -> usize {
    match payload {
        Value::Object(map) => map.len(),
        _ => 0,
    }
}

/// Top-level forbidden-field removal. Returns the sanitized copy and a
/// result record; when `silent` is false, also returns the audit events the
/// caller should forward (§4.D: warn on strip, debug on monitored presence).
pub fn strip(payload: &Value, silent: bool) -> (Value, StripResult, Vec<AuditEvent>) {
    let Value::Object(map) = payload else {
        return (payload.clone(), StripResult { sanitized: false, stripped_fields: vec![], original_field_count: 0 }, vec![]);
    };

    let original_field_count = map.len();
    let mut out = serde_json::Map::new();
    let mut stripped_fields = Vec::new();
    let mut monitored_present = Vec::new();

    for (k, v) in map {
        if FORBIDDEN_FIELDS.contains(&k.as_str()) {
            stripped_fields.push(k.clone());
            continue;
        }
        if MONITORED_FIELDS.contains(&k.as_str()) {
            monitored_present.push(k.clone());
        }
        out.insert(k.clone(), v.clone());
    }

    let mut events = Vec::new();
    if !silent {
        for field in &stripped_fields {
            events.push(AuditEvent::new(
                "identity_manipulation",
                Severity::Warn,
                serde_json::json!({"field": field, "action": "stripped"}),
            ));
        }
        for field in &monitored_present {
            events.push(AuditEvent::new(
                "identity_field_observed",
                Severity::Debug,
                serde_json::json!({"field": field}),
            ));
        }
    }

    let sanitized = !stripped_fields.is_empty();
    (Value::Object(out), StripResult { sanitized, stripped_fields, original_field_count }, events)
}

/// Top-level forbidden-field check without mutating the payload.
pub fn contains_forbidden(payload: &Value) -> ContainsForbidden {
    let Value::Object(map) = payload else {
        return ContainsForbidden { has_forbidden: false, fields: vec![] };
    };
    let fields: Vec<String> = map.keys().filter(|k| FORBIDDEN_FIELDS.contains(&k.as_str())).cloned().collect();
    ContainsForbidden { has_forbidden: !fields.is_empty(), fields }
}

/// Recursive `strip`, depth-bounded, applied at every mapping level and
/// recursing through sequences and nested mappings. Atomic values pass
/// through unchanged.
pub fn deep_strip(payload: &Value, max_depth: usize, silent: bool) -> (Value, StripResult, Vec<AuditEvent>) {
    let mut stripped_fields = Vec::new();
    let mut events = Vec::new();
    let original_field_count = object_field_count(payload);
    let out = deep_strip_at(payload, 0, max_depth, silent, &mut stripped_fields, &mut events);
    let sanitized = !stripped_fields.is_empty();
    (out, StripResult { sanitized, stripped_fields, original_field_count }, events)
}

fn deep_strip_at(
    v: &Value,
    depth: usize,
    max_depth: usize,
    silent: bool,
    stripped_fields: &mut Vec<String>,
    events: &mut Vec<AuditEvent>,
) -> Value {
    if depth > max_depth {
        return v.clone();
    }
    match v {
        Value::Object(_) => {
            let (sanitized_here, result, mut here_events) = strip(v, silent);
            stripped_fields.extend(result.stripped_fields);
            events.append(&mut here_events);
            let Value::Object(map) = sanitized_here else { unreachable!() };
            let mut out = serde_json::Map::new();
            for (k, val) in map {
                out.insert(k, deep_strip_at(&val, depth + 1, max_depth, silent, stripped_fields, events));
            }
            Value::Object(out)
        }
        Value::Array(arr) => {
            Value::Array(arr.iter().map(|item| deep_strip_at(item, depth + 1, max_depth, silent, stripped_fields, events)).collect())
        }
        other => other.clone(),
    }
}

/// Priority order: session, then bot, then none. A request-supplied
/// `user_id` that disagrees with the session is overridden by the session
/// (and reported as a mismatch event); bare request-supplied identity with
/// no session/bot backing it is rejected.
pub fn validate_source(
    session_user_id: Option<&str>,
    request_user_id: Option<&str>,
    bot_identity: Option<&str>,
) -> (IdentityResolution, Vec<AuditEvent>) {
    let mut events = Vec::new();

    if let Some(session) = session_user_id {
        if let Some(request) = request_user_id {
            if request != session {
                events.push(AuditEvent::new(
                    "identity_manipulation",
                    Severity::Warn,
                    serde_json::json!({"reason": "session_request_mismatch", "session": session, "request": request}),
                ));
            }
        }
        return (
            IdentityResolution { valid: true, resolved_identity: Some(session.to_string()), source: IdentitySource::Session },
            events,
        );
    }

    if let Some(bot) = bot_identity {
        return (
            IdentityResolution { valid: true, resolved_identity: Some(bot.to_string()), source: IdentitySource::Bot },
            events,
        );
    }

    if request_user_id.is_some() {
        events.push(AuditEvent::new(
            "identity_manipulation",
            Severity::Warn,
            serde_json::json!({"reason": "untrusted_request_identity_without_session_or_bot"}),
        ));
    }
    (IdentityResolution { valid: false, resolved_identity: None, source: IdentitySource::None }, events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_removes_forbidden_keeps_others() {
        let payload = serde_json::json!({"message": "hi", "impersonate": "admin", "user_id": "u1"});
        let (out, result, events) = strip(&payload, false);
        assert_eq!(out, serde_json::json!({"message": "hi", "user_id": "u1"}));
        assert_eq!(result.stripped_fields, vec!["impersonate"]);
        assert!(result.sanitized);
        assert_eq!(result.original_field_count, 3);
        assert!(events.iter().any(|e| e.severity == Severity::Warn));
    }

    #[test]
    fn strip_is_idempotent() {
        let payload = serde_json::json!({"impersonate": "admin", "ok": true});
        let (once, _, _) = strip(&payload, true);
        let (twice, result2, _) = strip(&once, true);
        assert_eq!(once, twice);
        assert!(result2.stripped_fields.is_empty());
    }

    #[test]
    fn monitored_fields_are_kept_but_observed() {
        let payload = serde_json::json!({"agent_id": "a1", "ok": true});
        let (out, result, events) = strip(&payload, false);
        assert_eq!(out["agent_id"], "a1");
        assert!(result.stripped_fields.is_empty());
        assert!(events.iter().any(|e| e.event == "identity_field_observed" && e.severity == Severity::Debug));
    }

    #[test]
    fn silent_suppresses_events() {
        let payload = serde_json::json!({"impersonate": "x"});
        let (_, _, events) = strip(&payload, true);
        assert!(events.is_empty());
    }

    #[test]
    fn contains_forbidden_does_not_mutate() {
        let payload = serde_json::json!({"spoof": "x", "ok": true});
        let check = contains_forbidden(&payload);
        assert!(check.has_forbidden);
        assert_eq!(check.fields, vec!["spoof"]);
    }

    #[test]
    fn deep_strip_reaches_nested_objects_and_arrays() {
        let payload = serde_json::json!({
            "ok": true,
            "nested": {"impersonate": "x", "list": [{"spoof_as": "y"}]}
        });
        let (out, result, _) = deep_strip(&payload, 10, true);
        assert!(!out["nested"].as_object().unwrap().contains_key("impersonate"));
        assert!(!out["nested"]["list"][0].as_object().unwrap().contains_key("spoof_as"));
        assert_eq!(result.stripped_fields.len(), 2);
    }

    #[test]
    fn validate_source_session_wins_over_mismatched_request() {
        let (res, events) = validate_source(Some("s1"), Some("r1"), None);
        assert!(res.valid);
        assert_eq!(res.resolved_identity.as_deref(), Some("s1"));
        assert_eq!(res.source, IdentitySource::Session);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn validate_source_falls_back_to_bot() {
        let (res, _) = validate_source(None, None, Some("bot1"));
        assert_eq!(res.source, IdentitySource::Bot);
        assert!(res.valid);
    }

    #[test]
    fn validate_source_rejects_untrusted_request_only() {
        let (res, events) = validate_source(None, Some("r1"), None);
        assert!(!res.valid);
        assert_eq!(res.source, IdentitySource::None);
        assert_eq!(events.len(), 1);
    }
}
