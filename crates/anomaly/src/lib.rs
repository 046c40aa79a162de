//! gateway_anomaly
//!
//! Component G: the process-wide sliding-window anomaly detector. A single
//! mutex-guarded singleton holds all mutable state (§5: "the anomaly-state
//! singleton is the only shared mutable resource"); every sliding window is
//! read with a monotonic clock so the detector stays correct under NTP jumps.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: String,
    #[serde(rename = "sourceIp")]
    pub source_ip: Option<String>,
    pub severity: AnomalySeverity,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    pub auth_failure_threshold: usize,
    pub auth_failure_window: Duration,
    pub request_rate_threshold: usize,
    pub request_rate_window: Duration,
    pub write_volume_threshold: usize,
    pub write_volume_window: Duration,
    pub ip_block_duration: Duration,
    pub enable_ip_blocking: bool,
    pub webhook_url: Option<String>,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            auth_failure_threshold: 10,
            auth_failure_window: Duration::from_secs(60),
            request_rate_threshold: 100,
            request_rate_window: Duration::from_secs(1),
            write_volume_threshold: 1000,
            write_volume_window: Duration::from_secs(60),
            ip_block_duration: Duration::from_secs(300),
            enable_ip_blocking: false,
            webhook_url: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AnomalyError {
    #[error("webhook request failed: {0}")]
    Webhook(String),
}

struct AnomalyState {
    config: AnomalyConfig,
    auth_failures: HashMap<String, Vec<Instant>>,
    requests: HashMap<String, Vec<Instant>>,
    writes: Vec<Instant>,
    blocked: HashMap<String, Instant>,
}

impl AnomalyState {
    fn new(config: AnomalyConfig) -> Self {
        Self { config, auth_failures: HashMap::new(), requests: HashMap::new(), writes: Vec::new(), blocked: HashMap::new() }
    }
}

static STATE: OnceLock<Mutex<AnomalyState>> = OnceLock::new();

fn state() -> &'static Mutex<AnomalyState> {
    STATE.get_or_init(|| Mutex::new(AnomalyState::new(AnomalyConfig::default())))
}

/// Resets the singleton with a fresh configuration.
pub fn init(config: AnomalyConfig) {
    let mut guard = state().lock().expect("anomaly state mutex poisoned");
    *guard = AnomalyState::new(config);
}

/// Resets all state while keeping the current configuration. For tests.
pub fn clear() {
    let mut guard = state().lock().expect("anomaly state mutex poisoned");
    let config = std::mem::take(&mut guard.config);
    *guard = AnomalyState::new(config);
}

fn evict_expired(timestamps: &mut Vec<Instant>, window: Duration, now: Instant) {
    timestamps.retain(|t| now.duration_since(*t) < window);
}

fn redact_ip(ip: &str) -> String {
    if ip.contains('.') {
        let mut parts = ip.split('.');
        let first = parts.next().unwrap_or("xxx");
        format!("{first}.xxx.xxx.xxx")
    } else if ip.contains(':') {
        let first = ip.split(':').next().unwrap_or("xxx");
        format!("{first}:xxx")
    } else {
        ip.to_string()
    }
}

/// ISO-8601 UTC timestamp for the `AnomalyEvent`/webhook payload.
fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn make_event(event_type: &str, source_ip: Option<&str>, severity: AnomalySeverity, details: serde_json::Value) -> AnomalyEvent {
    AnomalyEvent {
        event_type: event_type.to_string(),
        timestamp: timestamp_now(),
        source_ip: source_ip.map(|s| s.to_string()),
        severity,
        details,
    }
}

/// (a) log at warn with the IP redacted, (b) block the IP if enabled and
/// severity >= high, (c) fire-and-forget a webhook POST if configured.
/// Never propagates a failure into the caller's security decision.
fn dispatch(guard: &mut AnomalyState, event: &AnomalyEvent) {
    let redacted_ip = event.source_ip.as_deref().map(redact_ip);
    tracing::warn!(
        event = "SECURITY_EVENT",
        r#type = %event.event_type,
        severity = ?event.severity,
        source_ip = redacted_ip.as_deref().unwrap_or(""),
        details = %event.details,
    );

    if guard.config.enable_ip_blocking && event.severity >= AnomalySeverity::High {
        if let Some(ip) = &event.source_ip {
            let unblock_at = Instant::now() + guard.config.ip_block_duration;
            guard.blocked.insert(ip.clone(), unblock_at);
        }
    }

    if let Some(url) = guard.config.webhook_url.clone() {
        let payload = serde_json::json!({
            "event": "SECURITY_EVENT",
            "type": event.event_type,
            "timestamp": event.timestamp,
            "sourceIp": redacted_ip,
            "severity": event.severity,
            "details": event.details,
        });
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = post_webhook(&url, payload).await;
            });
        }
    }
}

async fn post_webhook(url: &str, payload: serde_json::Value) -> Result<(), AnomalyError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| AnomalyError::Webhook(e.to_string()))?;
    client.post(url).json(&payload).send().await.map_err(|e| AnomalyError::Webhook(e.to_string()))?;
    Ok(())
}

pub fn record_auth_failure(ip: &str) -> Option<AnomalyEvent> {
    let mut guard = state().lock().expect("anomaly state mutex poisoned");
    let now = Instant::now();
    let window = guard.config.auth_failure_window;
    let threshold = guard.config.auth_failure_threshold;
    let list = guard.auth_failures.entry(ip.to_string()).or_default();
    evict_expired(list, window, now);
    list.push(now);

    if list.len() >= threshold {
        guard.auth_failures.insert(ip.to_string(), Vec::new());
        let event = make_event(
            "auth_failure_burst",
            Some(ip),
            AnomalySeverity::High,
            serde_json::json!({"count": threshold, "window_secs": window.as_secs()}),
        );
        dispatch(&mut guard, &event);
        return Some(event);
    }
    None
}

pub fn record_request(ip: &str) -> Option<AnomalyEvent> {
    let mut guard = state().lock().expect("anomaly state mutex poisoned");
    let now = Instant::now();
    let window = guard.config.request_rate_window;
    let threshold = guard.config.request_rate_threshold;
    let list = guard.requests.entry(ip.to_string()).or_default();
    evict_expired(list, window, now);
    list.push(now);

    if list.len() >= threshold {
        let event = make_event(
            "request_rate_spike",
            Some(ip),
            AnomalySeverity::Medium,
            serde_json::json!({"count": list.len(), "window_secs": window.as_secs()}),
        );
        dispatch(&mut guard, &event);
        return Some(event);
    }
    None
}

pub fn record_write() -> Option<AnomalyEvent> {
    let mut guard = state().lock().expect("anomaly state mutex poisoned");
    let now = Instant::now();
    let window = guard.config.write_volume_window;
    let threshold = guard.config.write_volume_threshold;
    evict_expired(&mut guard.writes, window, now);
    guard.writes.push(now);

    if guard.writes.len() >= threshold {
        let event = make_event(
            "abnormal_write_volume",
            None,
            AnomalySeverity::High,
            serde_json::json!({"count": guard.writes.len(), "window_secs": window.as_secs()}),
        );
        dispatch(&mut guard, &event);
        return Some(event);
    }
    None
}

/// Caller-supplied custom event, stamped and dispatched the same way as the
/// built-in detectors.
pub fn record_anomaly(event_type: &str, source_ip: Option<&str>, severity: AnomalySeverity, details: serde_json::Value) -> AnomalyEvent {
    let mut guard = state().lock().expect("anomaly state mutex poisoned");
    let event = make_event(event_type, source_ip, severity, details);
    dispatch(&mut guard, &event);
    event
}

/// True if `ip` has an unblock time still in the future. Expired entries are
/// deleted lazily on access.
pub fn is_ip_blocked(ip: &str) -> bool {
    let mut guard = state().lock().expect("anomaly state mutex poisoned");
    let now = Instant::now();
    match guard.blocked.get(ip) {
        Some(until) if *until > now => true,
        Some(_) => {
            guard.blocked.remove(ip);
            false
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(config: AnomalyConfig) {
        init(config);
    }

    #[test]
    fn no_event_below_threshold_fires_exactly_at_threshold() {
        fresh(AnomalyConfig { auth_failure_threshold: 3, enable_ip_blocking: false, ..Default::default() });
        assert!(record_auth_failure("10.0.0.1").is_none());
        assert!(record_auth_failure("10.0.0.1").is_none());
        let event = record_auth_failure("10.0.0.1");
        assert!(event.is_some());
        assert_eq!(event.unwrap().event_type, "auth_failure_burst");
    }

    #[test]
    fn auth_failure_clears_list_on_fire() {
        fresh(AnomalyConfig { auth_failure_threshold: 2, ..Default::default() });
        record_auth_failure("10.0.0.2");
        assert!(record_auth_failure("10.0.0.2").is_some());
        assert!(record_auth_failure("10.0.0.2").is_none());
    }

    #[test]
    fn request_rate_does_not_clear_on_fire() {
        fresh(AnomalyConfig { request_rate_threshold: 2, ..Default::default() });
        record_request("10.0.0.3");
        assert!(record_request("10.0.0.3").is_some());
        assert!(record_request("10.0.0.3").is_some());
    }

    #[test]
    fn ip_blocking_only_when_enabled_and_high_severity() {
        fresh(AnomalyConfig { auth_failure_threshold: 1, enable_ip_blocking: true, ..Default::default() });
        record_auth_failure("10.0.0.4");
        assert!(is_ip_blocked("10.0.0.4"));
    }

    #[test]
    fn ip_blocking_disabled_does_not_block() {
        fresh(AnomalyConfig { auth_failure_threshold: 1, enable_ip_blocking: false, ..Default::default() });
        record_auth_failure("10.0.0.5");
        assert!(!is_ip_blocked("10.0.0.5"));
    }

    #[test]
    fn redact_ip_keeps_only_first_segment() {
        assert_eq!(redact_ip("10.1.2.3"), "10.xxx.xxx.xxx");
        assert_eq!(redact_ip("fe80::1"), "fe80:xxx");
    }

    #[test]
    fn clear_resets_state_but_keeps_config() {
        fresh(AnomalyConfig { auth_failure_threshold: 2, ..Default::default() });
        record_auth_failure("10.0.0.6");
        clear();
        assert!(record_auth_failure("10.0.0.6").is_none());
    }
}
