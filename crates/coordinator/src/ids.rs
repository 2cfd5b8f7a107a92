//! Agent id and message fingerprint grammars (spec.md §3).

use rand::RngCore;

/// `[A-Za-z0-9][A-Za-z0-9_./-]*`, 1–64 chars.
pub fn is_valid_agent_id(id: &str) -> bool {
    if id.is_empty() || id.len() > 64 {
        return false;
    }
    let mut chars = id.chars();
    let Some(first) = chars.next() else { return false };
    if !first.is_ascii_alphanumeric() {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-'))
}

/// Build the canonical id `<machine>[/<project>]`.
pub fn canonical_id(machine: &str, project: Option<&str>) -> String {
    match project {
        Some(p) if !p.is_empty() => format!("{machine}/{p}"),
        _ => machine.to_owned(),
    }
}

/// Generate a fresh 8-hex-digit nonce.
pub fn nonce8hex() -> String {
    let mut bytes = [0u8; 4];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Build a message fingerprint `<from>::<to>::<nonce8hex>`.
pub fn message_fingerprint(from: &str, to: &str) -> String {
    format!("{from}::{to}::{}", nonce8hex())
}

/// Parsed components of a message fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFingerprint {
    pub from: String,
    pub to: String,
    pub nonce: String,
}

/// Parse and validate a fingerprint of the shape `<from>::<to>::<8-hex>`,
/// with `from` and `to` each matching the agent-id grammar.
pub fn parse_fingerprint(id: &str) -> Option<ParsedFingerprint> {
    let parts: Vec<&str> = id.split("::").collect();
    let [from, to, nonce] = parts[..] else { return None };
    if nonce.len() != 8 || !nonce.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    if !is_valid_agent_id(from) || !is_valid_agent_id(to) {
        return None;
    }
    Some(ParsedFingerprint { from: from.to_owned(), to: to.to_owned(), nonce: nonce.to_owned() })
}

pub fn is_valid_fingerprint(id: &str) -> bool {
    parse_fingerprint(id).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_grammar() {
        assert!(is_valid_agent_id("alice"));
        assert!(is_valid_agent_id("alice/web"));
        assert!(is_valid_agent_id("a.b_c-d"));
        assert!(!is_valid_agent_id(""));
        assert!(!is_valid_agent_id("/alice"));
        assert!(!is_valid_agent_id("-alice"));
        assert!(!is_valid_agent_id(&"a".repeat(65)));
    }

    #[test]
    fn fingerprint_roundtrip() {
        let fp = message_fingerprint("alice/web", "bob");
        let parsed = parse_fingerprint(&fp).expect("valid fingerprint");
        assert_eq!(parsed.from, "alice/web");
        assert_eq!(parsed.to, "bob");
        assert_eq!(parsed.nonce.len(), 8);
    }

    #[test]
    fn fingerprint_rejects_bad_shape() {
        assert!(parse_fingerprint("alice::bob").is_none());
        assert!(parse_fingerprint("alice::bob::zz").is_none());
        assert!(parse_fingerprint("alice::bob::1234").is_none());
        assert!(parse_fingerprint("/alice::bob::1234abcd").is_none());
        assert!(parse_fingerprint("alice::bob::1234abcd::extra").is_none());
    }
}
