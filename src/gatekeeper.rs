//! Request authorization
//!
//! Two independent gates, both optional: an exact-match client IP allowlist
//! and a shared token carried in `X-Collector-Token`. Every configured gate
//! must pass. With neither configured the service is open, which assumes a
//! trusted management network.
//!
//! The token is never compared as-is: the supplied value is hashed and the
//! digests are compared, so the comparison time does not depend on how much
//! of a guess was right.

use crate::config::SecurityConfig;
use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Header carrying the shared token
pub const TOKEN_HEADER: &str = "x-collector-token";

/// Gatekeeper rejection; deliberately carries no reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unauthorized;

#[derive(Clone, PartialEq, Eq)]
enum TokenGate {
    Open,
    /// SHA-256 of the expected token. Built from either a cleartext token
    /// or a stored `token_sha256`, so both modes share one comparison path.
    Digest([u8; 32]),
}

/// Immutable authorization settings built once at startup
#[derive(Clone)]
pub struct Gatekeeper {
    allowed_ips: HashSet<String>,
    token: TokenGate,
}

impl std::fmt::Debug for Gatekeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gatekeeper")
            .field("allowed_ips", &self.allowed_ips)
            .field("token_gate", &self.token_configured())
            .finish()
    }
}

/// Lower-case hex SHA-256 of a token, the form stored in `token_sha256`
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

impl Gatekeeper {
    /// Build the gatekeeper from configuration
    ///
    /// A malformed `token_sha256` is an error rather than an open gate.
    pub fn from_config(cfg: &SecurityConfig) -> Result<Self> {
        let stored_hash = cfg.token_sha256.trim().to_ascii_lowercase();
        let cleartext = cfg.token.trim();

        let token = if !stored_hash.is_empty() {
            let bytes = hex::decode(&stored_hash)
                .ok()
                .and_then(|b| <[u8; 32]>::try_from(b).ok());
            match bytes {
                Some(digest) => TokenGate::Digest(digest),
                None => bail!("token_sha256 must be 64 hex characters"),
            }
        } else if !cleartext.is_empty() {
            TokenGate::Digest(Sha256::digest(cleartext.as_bytes()).into())
        } else {
            TokenGate::Open
        };

        Ok(Self {
            allowed_ips: cfg.allowed_ips.to_vec().into_iter().collect(),
            token,
        })
    }

    /// A gatekeeper with no gates configured
    #[cfg(test)]
    pub fn open() -> Self {
        Self {
            allowed_ips: HashSet::new(),
            token: TokenGate::Open,
        }
    }

    pub fn ip_gate_configured(&self) -> bool {
        !self.allowed_ips.is_empty()
    }

    pub fn token_configured(&self) -> bool {
        self.token != TokenGate::Open
    }

    pub fn is_open(&self) -> bool {
        !self.ip_gate_configured() && !self.token_configured()
    }

    /// Decide whether a request may proceed
    ///
    /// `client_ip` is the observed peer address as a string; it is matched
    /// exactly, so `::ffff:10.0.0.1` does not match `10.0.0.1`. A missing
    /// peer address fails the IP gate.
    pub fn authorize(
        &self,
        client_ip: Option<&str>,
        token: Option<&str>,
    ) -> Result<(), Unauthorized> {
        let ip_ok = !self.ip_gate_configured()
            || client_ip.is_some_and(|ip| self.allowed_ips.contains(ip));

        let token_ok = match &self.token {
            TokenGate::Open => true,
            TokenGate::Digest(expected) => token
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .is_some_and(|t| Sha256::digest(t.as_bytes()).as_slice() == expected),
        };

        if ip_ok && token_ok {
            Ok(())
        } else {
            Err(Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IpList;

    fn security(ips: &[&str], token: &str, token_sha256: &str) -> SecurityConfig {
        SecurityConfig {
            allowed_ips: IpList::List(ips.iter().map(|s| s.to_string()).collect()),
            token: token.to_string(),
            token_sha256: token_sha256.to_string(),
        }
    }

    #[test]
    fn test_open_when_nothing_configured() {
        let gate = Gatekeeper::from_config(&security(&[], "", "")).unwrap();
        assert!(gate.is_open());
        assert_eq!(gate.authorize(None, None), Ok(()));
        assert_eq!(gate.authorize(Some("203.0.113.9"), Some("anything")), Ok(()));
    }

    #[test]
    fn test_ip_gate_rejects_regardless_of_token() {
        let gate = Gatekeeper::from_config(&security(&["10.10.10.21"], "s3cret", "")).unwrap();
        assert_eq!(
            gate.authorize(Some("10.10.10.22"), Some("s3cret")),
            Err(Unauthorized)
        );
        assert_eq!(gate.authorize(None, Some("s3cret")), Err(Unauthorized));
        assert_eq!(gate.authorize(Some("10.10.10.21"), Some("s3cret")), Ok(()));
    }

    #[test]
    fn test_ip_gate_is_exact_match() {
        let gate = Gatekeeper::from_config(&security(&["10.0.0.1"], "", "")).unwrap();
        assert_eq!(gate.authorize(Some("::ffff:10.0.0.1"), None), Err(Unauthorized));
        assert_eq!(gate.authorize(Some("10.0.0.10"), None), Err(Unauthorized));
        assert_eq!(gate.authorize(Some("10.0.0.1"), None), Ok(()));
    }

    #[test]
    fn test_wrong_token_rejected_regardless_of_ip() {
        let gate = Gatekeeper::from_config(&security(&["10.10.10.21"], "s3cret", "")).unwrap();
        assert_eq!(
            gate.authorize(Some("10.10.10.21"), Some("wrong")),
            Err(Unauthorized)
        );
        assert_eq!(gate.authorize(Some("10.10.10.21"), None), Err(Unauthorized));
        assert_eq!(gate.authorize(Some("10.10.10.21"), Some("  ")), Err(Unauthorized));
    }

    #[test]
    fn test_cleartext_token_trims_header() {
        let gate = Gatekeeper::from_config(&security(&[], "s3cret", "")).unwrap();
        assert!(!gate.ip_gate_configured());
        assert_eq!(gate.authorize(Some("1.2.3.4"), Some(" s3cret ")), Ok(()));
    }

    #[test]
    fn test_hash_mode() {
        let stored = hash_token("s3cret").to_uppercase();
        let gate = Gatekeeper::from_config(&security(&[], "ignored", &stored)).unwrap();
        assert_eq!(gate.authorize(None, Some("s3cret")), Ok(()));
        assert_eq!(gate.authorize(None, Some("ignored")), Err(Unauthorized));
    }

    #[test]
    fn test_malformed_hash_fails_closed() {
        assert!(Gatekeeper::from_config(&security(&[], "", "not-hex")).is_err());
        assert!(Gatekeeper::from_config(&security(&[], "", "abcd")).is_err());
    }

    #[test]
    fn test_hash_token_known_value() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
