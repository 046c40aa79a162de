//! gateway_audit
//!
//! Component H: a thin adapter between a structured `AuditEvent` and the
//! host's logging subsystem. Runs `details` through the redaction engine's
//! deep payload redaction before emission and never throws — emission is
//! best-effort per §7.

use gateway_common::{AuditEvent, Severity};
use gateway_redaction::RedactionEngine;

pub struct AuditSink {
    redaction: RedactionEngine,
}

impl AuditSink {
    pub fn new(redaction: RedactionEngine) -> Self {
        Self { redaction }
    }

    /// Formats `event` as `SECURITY_EVENT:` followed by a JSON object (§6:
    /// "log line shape"), and writes it at the logger level matching
    /// `event.severity`. Never panics or returns an error — a malformed
    /// payload still gets logged, just with whatever redaction managed to do.
    pub fn emit(&self, event: &AuditEvent) {
        let redacted = self.redaction.redact_payload_deep(&event.details, gateway_common::DEFAULT_MAX_DEPTH);
        let line = serde_json::json!({
            "event": event.event,
            "severity": event.severity,
            "details": redacted,
        });
        let rendered = serde_json::to_string(&line).unwrap_or_else(|_| "{}".to_string());

        match event.severity {
            Severity::Debug => tracing::debug!("SECURITY_EVENT: {rendered}"),
            Severity::Info => tracing::info!("SECURITY_EVENT: {rendered}"),
            Severity::Warn => tracing::warn!("SECURITY_EVENT: {rendered}"),
            Severity::Error => tracing::error!("SECURITY_EVENT: {rendered}"),
        }
    }

    pub fn emit_all(&self, events: &[AuditEvent]) {
        for event in events {
            self.emit(event);
        }
    }
}
