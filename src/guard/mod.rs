//! Request admission checks.
//!
//! Every inbound request is authorized before it reaches a handler:
//! mode check (local-only vs public), API-key match, source-IP
//! allow-list, payload-size cap. Checks short-circuit on the first
//! failure, in that order. A denial carries no side effects and the
//! response must never echo the configured key or server-side paths.

use sha2::{Digest, Sha256};
use std::net::IpAddr;
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Local-only mode and the request did not originate from loopback.
    #[error("service is local-only; remote requests are not accepted")]
    NotLocal,

    /// Public mode and the key or source address did not check out.
    #[error("invalid API key or source address not allowed")]
    Unauthorized,

    /// Request body exceeds the configured cap.
    #[error("payload exceeds the configured size limit")]
    PayloadTooLarge,
}

impl AuthError {
    /// Wire-level reason string, stable across releases.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::NotLocal => "NotLocal",
            AuthError::Unauthorized => "Unauthorized",
            AuthError::PayloadTooLarge => "PayloadTooLarge",
        }
    }
}

/// Decide whether a request may proceed.
///
/// In local-only mode, only loopback origins are admitted — the
/// allow-list and key are not consulted at all. In public mode the
/// presented key must match the configured key AND the origin must be
/// on the allow-list; an empty configured key locks public mode shut
/// rather than matching an empty presentation. The payload cap applies
/// in both modes.
pub fn authorize(
    origin: IpAddr,
    presented_key: Option<&str>,
    payload_bytes: u64,
    config: &Config,
) -> Result<(), AuthError> {
    if !config.public_mode {
        if !origin.is_loopback() {
            return Err(AuthError::NotLocal);
        }
    } else {
        let key_ok = match presented_key {
            Some(presented) => !config.api_key.is_empty() && keys_match(presented, &config.api_key),
            None => false,
        };
        if !key_ok || !config.allowed_ips.contains(&origin.to_string()) {
            return Err(AuthError::Unauthorized);
        }
    }

    if payload_bytes > config.max_payload_bytes() {
        return Err(AuthError::PayloadTooLarge);
    }

    Ok(())
}

/// Compare two keys without leaking where they diverge.
///
/// Comparing SHA-256 digests makes the comparison independent of both
/// key length and first-mismatch position.
fn keys_match(a: &str, b: &str) -> bool {
    Sha256::digest(a.as_bytes()) == Sha256::digest(b.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = crate::config::BYTES_PER_MB;

    fn local_config() -> Config {
        Config::default()
    }

    fn public_config() -> Config {
        let mut config = Config::default();
        config.public_mode = true;
        config.api_key = "s3cret".to_string();
        config.allowed_ips.insert("203.0.113.7".to_string());
        config
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn local_mode_admits_loopback_only() {
        let config = local_config();

        assert_eq!(authorize(ip("127.0.0.1"), None, 0, &config), Ok(()));
        assert_eq!(authorize(ip("::1"), None, 0, &config), Ok(()));
        assert_eq!(
            authorize(ip("192.168.1.20"), None, 0, &config),
            Err(AuthError::NotLocal)
        );
    }

    #[test]
    fn local_mode_ignores_key_and_allow_list() {
        let mut config = local_config();
        config.api_key = "s3cret".to_string();
        config.allowed_ips.insert("192.168.1.20".to_string());

        // Allow-list contents are irrelevant when public_mode is off
        assert_eq!(
            authorize(ip("192.168.1.20"), Some("s3cret"), 0, &config),
            Err(AuthError::NotLocal)
        );
        // Loopback needs no key
        assert_eq!(authorize(ip("127.0.0.1"), None, 0, &config), Ok(()));
    }

    #[test]
    fn public_mode_requires_key_and_allowed_ip() {
        let config = public_config();

        assert_eq!(
            authorize(ip("203.0.113.7"), Some("s3cret"), 0, &config),
            Ok(())
        );
        assert_eq!(
            authorize(ip("203.0.113.7"), Some("wrong"), 0, &config),
            Err(AuthError::Unauthorized)
        );
        assert_eq!(
            authorize(ip("203.0.113.7"), None, 0, &config),
            Err(AuthError::Unauthorized)
        );
        // Correct key from an address not on the allow-list
        assert_eq!(
            authorize(ip("198.51.100.9"), Some("s3cret"), 0, &config),
            Err(AuthError::Unauthorized)
        );
    }

    #[test]
    fn public_mode_does_not_exempt_loopback() {
        // Loopback goes through the same key + allow-list checks as
        // any other origin once public_mode is on.
        let config = public_config();
        assert_eq!(
            authorize(ip("127.0.0.1"), Some("wrong"), 0, &config),
            Err(AuthError::Unauthorized)
        );
    }

    #[test]
    fn empty_configured_key_denies_everything_public() {
        let mut config = public_config();
        config.api_key = String::new();

        assert_eq!(
            authorize(ip("203.0.113.7"), Some(""), 0, &config),
            Err(AuthError::Unauthorized)
        );
    }

    #[test]
    fn payload_cap_applies_after_auth() {
        let config = local_config(); // 50 MB default

        assert_eq!(authorize(ip("127.0.0.1"), None, 50 * MB, &config), Ok(()));
        assert_eq!(
            authorize(ip("127.0.0.1"), None, 60 * MB, &config),
            Err(AuthError::PayloadTooLarge)
        );

        // Auth failure wins over size failure: remote + oversized reports NotLocal
        assert_eq!(
            authorize(ip("192.168.1.20"), None, 60 * MB, &config),
            Err(AuthError::NotLocal)
        );
    }

    #[test]
    fn digest_comparison_matches_exact_keys_only() {
        assert!(keys_match("abc", "abc"));
        assert!(!keys_match("abc", "abd"));
        assert!(!keys_match("abc", "abcd"));
        assert!(!keys_match("", "abc"));
    }
}
