//! gateway_ip_allowlist
//!
//! Component B: parser and longest-prefix matcher for mixed IPv4/IPv6 CIDR
//! allowlists, consumed by the Public-Bind Guard (gate G2) and by any caller
//! that needs to test a peer address against a configured allowlist.
//!
//! Parsing is all-or-nothing: one malformed token rejects the whole list,
//! with every offending token reported back to the configuration caller (§7).

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpVersion {
    V4,
    V6,
}

/// A single parsed and masked allowlist entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub raw: String,
    pub version: IpVersion,
    /// 4 bytes for v4, 16 bytes for v6. Host bits beyond `prefix` are zero.
    pub network: Vec<u8>,
    pub prefix: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidToken {
    pub token: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum IpAllowlistError {
    #[error("invalid allowlist entries: {0:?}")]
    InvalidTokens(Vec<InvalidToken>),
}

/// Parse a comma-separated list of IPv4/IPv6 literals or CIDR ranges.
///
/// Whitespace around tokens is ignored, empty tokens are skipped, and an
/// empty list after trimming yields an empty `Vec` rather than an error.
/// Any single malformed token rejects the entire list.
pub fn parse(raw: &str) -> Result<Vec<AllowlistEntry>, IpAllowlistError> {
    let mut entries = Vec::new();
    let mut invalid = Vec::new();

    for token in raw.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match parse_token(token) {
            Ok(entry) => entries.push(entry),
            Err(reason) => invalid.push(InvalidToken { token: token.to_string(), reason }),
        }
    }

    if !invalid.is_empty() {
        return Err(IpAllowlistError::InvalidTokens(invalid));
    }
    Ok(entries)
}

/// Does `ip` match any entry in `entries`? Entries of a different address
/// family than `ip` (after normalization) never match. A malformed `ip`
/// never matches anything.
pub fn matches(ip: &str, entries: &[AllowlistEntry]) -> bool {
    let candidate = match parse_token(ip.trim()) {
        Ok(e) => e,
        Err(_) => return false,
    };
    entries
        .iter()
        .any(|e| e.version == candidate.version && prefix_match(&candidate.network, &e.network, e.prefix))
}

fn strip_brackets(s: &str) -> &str {
    if let Some(inner) = s.strip_prefix('[') {
        if let Some(inner) = inner.strip_suffix(']') {
            return inner;
        }
    }
    s
}

fn strip_zone(s: &str) -> &str {
    s.split('%').next().unwrap_or(s)
}

fn parse_token(token: &str) -> Result<AllowlistEntry, String> {
    let t = token.trim();

    if t.matches('/').count() > 1 {
        return Err("expected at most one '/'".to_string());
    }
    let mut parts = t.splitn(2, '/');
    let addr_part = strip_zone(strip_brackets(parts.next().unwrap_or("")));
    let prefix_part = parts.next();

    if let Ok(v4) = addr_part.parse::<Ipv4Addr>() {
        let prefix = parse_prefix(prefix_part, 32)?;
        let network = mask_network(&v4.octets(), prefix);
        return Ok(AllowlistEntry { raw: token.to_string(), version: IpVersion::V4, network, prefix });
    }

    if let Ok(v6) = addr_part.parse::<Ipv6Addr>() {
        if let Some(v4_mapped) = v6.to_ipv4_mapped() {
            // ::ffff:a.b.c.d normalizes to the embedded v4 address. A prefix
            // written against the 128-bit v6 literal is reinterpreted against
            // the 32-bit v4 space by subtracting the 96-bit ::ffff: prefix
            // (see SPEC_FULL.md §9 open question on this conversion).
            let prefix = match prefix_part {
                None => 32,
                Some(p) => {
                    let v6_prefix = p.parse::<u8>().map_err(|_| "prefix must be an integer".to_string())?;
                    if v6_prefix > 128 {
                        return Err("prefix out of range for IPv6".to_string());
                    }
                    if v6_prefix < 96 {
                        return Err("prefix too short for a v4-mapped address".to_string());
                    }
                    v6_prefix - 96
                }
            };
            let network = mask_network(&v4_mapped.octets(), prefix);
            return Ok(AllowlistEntry { raw: token.to_string(), version: IpVersion::V4, network, prefix });
        }

        let prefix = parse_prefix(prefix_part, 128)?;
        let network = mask_network(&v6.octets(), prefix);
        return Ok(AllowlistEntry { raw: token.to_string(), version: IpVersion::V6, network, prefix });
    }

    Err("not a valid IPv4/IPv6 literal".to_string())
}

fn parse_prefix(prefix_part: Option<&str>, max: u8) -> Result<u8, String> {
    match prefix_part {
        None => Ok(max),
        Some(p) => {
            let prefix = p.parse::<u8>().map_err(|_| "prefix must be an integer".to_string())?;
            if prefix > max {
                return Err(format!("prefix out of range (max {max})"));
            }
            Ok(prefix)
        }
    }
}

/// Zero every bit beyond `prefix`.
fn mask_network(bytes: &[u8], prefix: u8) -> Vec<u8> {
    let mut out = bytes.to_vec();
    let full_bytes = (prefix / 8) as usize;
    let rem = prefix % 8;
    if rem > 0 && full_bytes < out.len() {
        let mask = !(0xFFu8 >> rem);
        out[full_bytes] &= mask;
    }
    let zero_from = if rem > 0 { full_bytes + 1 } else { full_bytes };
    for b in out.iter_mut().skip(zero_from) {
        *b = 0;
    }
    out
}

/// Does masking `candidate` to `prefix` bits reproduce `network`?
fn prefix_match(candidate: &[u8], network: &[u8], prefix: u8) -> bool {
    if candidate.len() != network.len() {
        return false;
    }
    mask_network(candidate, prefix) == network
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_is_not_an_error() {
        assert_eq!(parse("").unwrap(), vec![]);
        assert_eq!(parse("   ,  ,").unwrap(), vec![]);
    }

    #[test]
    fn rejects_out_of_range_prefix() {
        let err = parse("1.2.3.4/33").unwrap_err();
        match err {
            IpAllowlistError::InvalidTokens(tokens) => {
                assert_eq!(tokens.len(), 1);
                assert_eq!(tokens[0].token, "1.2.3.4/33");
            }
        }
    }

    #[test]
    fn whole_list_rejected_on_one_bad_token() {
        let err = parse("203.0.113.10, not-an-ip, 198.51.100.0/24").unwrap_err();
        match err {
            IpAllowlistError::InvalidTokens(tokens) => {
                assert_eq!(tokens.len(), 1);
                assert_eq!(tokens[0].token, "not-an-ip");
            }
        }
    }

    #[test]
    fn v4_mapped_v6_normalizes_and_matches() {
        let entries = parse("::ffff:127.0.0.1/104").unwrap();
        assert_eq!(entries[0].version, IpVersion::V4);
        assert_eq!(entries[0].prefix, 8);
        assert!(matches("127.0.0.1", &entries));
        assert!(matches("127.9.9.9", &entries));
        assert!(!matches("128.0.0.1", &entries));
    }

    #[test]
    fn longest_prefix_cidr_matches() {
        let entries = parse("198.51.100.0/24").unwrap();
        assert!(matches("198.51.100.42", &entries));
        assert!(!matches("198.51.101.1", &entries));
    }

    #[test]
    fn exact_match_and_miss() {
        let entries = parse("203.0.113.10,198.51.100.0/24").unwrap();
        assert!(matches("203.0.113.10", &entries));
        assert!(!matches("203.0.113.11", &entries));
    }

    #[test]
    fn bracketed_zone_index_is_stripped() {
        let entries = parse("[fe80::1%eth0]/64").unwrap();
        assert_eq!(entries[0].version, IpVersion::V6);
        assert!(matches("fe80::1", &entries));
        assert!(matches("fe80::dead:beef", &entries));
    }

    #[test]
    fn version_mismatch_never_matches() {
        let entries = parse("203.0.113.10").unwrap();
        assert!(!matches("::1", &entries));
    }

    #[test]
    fn malformed_candidate_never_matches() {
        let entries = parse("203.0.113.10").unwrap();
        assert!(!matches("not-an-ip", &entries));
    }
}
