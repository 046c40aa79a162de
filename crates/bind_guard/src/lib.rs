//! gateway_bind_guard
//!
//! Component E: pre-listen admission check. A public bind must clear four
//! gates in order (G1-G4); non-public hosts are admitted unconditionally
//! (G0). Each denial carries a self-teaching remediation bundle so the
//! caller's error message explains how to fix it without consulting docs.

use gateway_common::{AuditEvent, Env, Severity};
use gateway_ip_allowlist as allowlist;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone)]
pub struct BindContext {
    pub host: String,
    pub tls_enabled: bool,
    pub has_token: bool,
    pub has_password: bool,
    pub has_tailscale_auth: bool,
    pub env: Env,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub remediations: Vec<String>,
}

#[derive(Debug)]
pub struct BindGuardError {
    pub reason: String,
    pub remediations: Vec<String>,
}

impl fmt::Display for BindGuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== PUBLIC BIND REFUSED ===")?;
        writeln!(f, "{}", self.reason)?;
        for r in &self.remediations {
            writeln!(f, "  - {r}")?;
        }
        write!(f, "============================")
    }
}

impl std::error::Error for BindGuardError {}

/// `0.0.0.0`, `::`, `[::]` -> public. Loopback forms and the Tailscale CGNAT
/// range are not public. Everything else is public. Purely textual and
/// case-insensitive; no DNS resolution is performed.
pub fn is_public(host: &str) -> bool {
    let h = host.trim().trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();

    if h == "0.0.0.0" || h == "::" {
        return true;
    }
    if h == "127.0.0.1" || h == "::1" || h == "localhost" {
        return false;
    }
    if h.starts_with("127.") {
        return false;
    }
    if h.starts_with("::ffff:127.") {
        return false;
    }
    if is_tailscale_cgnat(&h) {
        return false;
    }
    true
}

fn is_tailscale_cgnat(h: &str) -> bool {
    let Ok(addr) = h.parse::<std::net::Ipv4Addr>() else { return false };
    let octets = addr.octets();
    octets[0] == 100 && (octets[1] & 0xC0) == 64
}

fn env_true(env: &Env, key: &str) -> bool {
    env.get(key).map(|v| v == "true").unwrap_or(false)
}

/// Applies gates G0-G4 against `ctx`. Environment variable names are
/// expected to already carry the host's prefix (§6); the keys below are the
/// effect names from that table.
pub fn check(ctx: &BindContext) -> BindDecision {
    if !is_public(&ctx.host) {
        return BindDecision { allowed: true, reason: None, remediations: vec![] };
    }

    if !env_true(&ctx.env, "ALLOW_PUBLIC_BIND") {
        return BindDecision {
            allowed: false,
            reason: Some(format!("binding to public host \"{}\" requires explicit opt-in", ctx.host)),
            remediations: vec![
                "set ALLOW_PUBLIC_BIND=true to opt into a public bind".to_string(),
                "bind to 127.0.0.1 or ::1 instead".to_string(),
            ],
        };
    }

    let allowlist_raw = ctx.env.get("PUBLIC_BIND_IP_ALLOWLIST").map(String::as_str).unwrap_or("");
    let allowlist_ok = match allowlist::parse(allowlist_raw) {
        Ok(entries) => !entries.is_empty(),
        Err(_) => false,
    };
    if !allowlist_ok {
        return BindDecision {
            allowed: false,
            reason: Some("PUBLIC_BIND_IP_ALLOWLIST must parse and contain at least one entry".to_string()),
            remediations: vec![
                "set PUBLIC_BIND_IP_ALLOWLIST to a comma-separated list of IPs or CIDR ranges".to_string(),
                "restrict access with an SSH tunnel instead of a public bind".to_string(),
            ],
        };
    }

    if !ctx.tls_enabled {
        return BindDecision {
            allowed: false,
            reason: Some("public bind requires TLS".to_string()),
            remediations: vec![
                "enable TLS termination in front of this listener".to_string(),
                "use a private-network overlay (e.g. Tailscale) instead of a public bind".to_string(),
            ],
        };
    }

    if !(ctx.has_token || ctx.has_password || ctx.has_tailscale_auth) {
        return BindDecision {
            allowed: false,
            reason: Some("public bind requires at least one strong-auth mechanism".to_string()),
            remediations: vec![
                "configure a gateway token or password".to_string(),
                "enable mTLS or OIDC, or bind through an authenticated Tailscale overlay".to_string(),
            ],
        };
    }

    BindDecision { allowed: true, reason: None, remediations: vec![] }
}

/// Raises `BindGuardError` when `check` denies. Never called for hosts that
/// clear G0 since `check` already admits those unconditionally.
pub fn enforce(ctx: &BindContext) -> Result<(), BindGuardError> {
    let decision = check(ctx);
    if decision.allowed {
        return Ok(());
    }
    Err(BindGuardError {
        reason: decision.reason.unwrap_or_else(|| "public bind denied".to_string()),
        remediations: decision.remediations,
    })
}

/// Always emits, regardless of the decision's outcome.
pub fn log_attempt(ctx: &BindContext, decision: &BindDecision) -> AuditEvent {
    AuditEvent::new(
        "public_bind_attempt",
        Severity::Warn,
        serde_json::json!({
            "host": ctx.host,
            "allowed": decision.allowed,
            "reason": decision.reason,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(host: &str, env: Env) -> BindContext {
        BindContext {
            host: host.to_string(),
            tls_enabled: false,
            has_token: false,
            has_password: false,
            has_tailscale_auth: false,
            env,
        }
    }

    #[test]
    fn loopback_always_admitted() {
        let decision = check(&ctx("127.0.0.1", Env::new()));
        assert!(decision.allowed);
        let decision = check(&ctx("localhost", Env::new()));
        assert!(decision.allowed);
        let decision = check(&ctx("::1", Env::new()));
        assert!(decision.allowed);
    }

    #[test]
    fn tailscale_cgnat_is_not_public() {
        assert!(!is_public("100.64.1.2"));
        assert!(is_public("100.128.1.2"));
    }

    #[test]
    fn public_bind_denied_without_opt_in() {
        let decision = check(&ctx("0.0.0.0", Env::new()));
        assert!(!decision.allowed);
        assert!(!decision.remediations.is_empty());
    }

    #[test]
    fn public_bind_requires_all_four_gates() {
        let mut env = Env::new();
        env.insert("ALLOW_PUBLIC_BIND".to_string(), "true".to_string());
        env.insert("PUBLIC_BIND_IP_ALLOWLIST".to_string(), "203.0.113.10".to_string());
        let mut c = ctx("0.0.0.0", env);
        c.tls_enabled = true;
        c.has_token = true;
        let decision = check(&c);
        assert!(decision.allowed);
    }

    #[test]
    fn missing_allowlist_denies_even_with_opt_in() {
        let mut env = Env::new();
        env.insert("ALLOW_PUBLIC_BIND".to_string(), "true".to_string());
        let mut c = ctx("0.0.0.0", env);
        c.tls_enabled = true;
        c.has_token = true;
        let decision = check(&c);
        assert!(!decision.allowed);
    }

    #[test]
    fn enforce_raises_with_reason_and_remediations() {
        let err = enforce(&ctx("0.0.0.0", Env::new())).unwrap_err();
        assert!(err.reason.contains("opt-in"));
        assert!(!err.remediations.is_empty());
    }

    #[test]
    fn v4_mapped_loopback_is_not_public() {
        assert!(!is_public("::ffff:127.0.0.1"));
    }
}
