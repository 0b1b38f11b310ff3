//! Certificate chain / hostname verification with a TOFU fallback (§4.8).

use sha2::{Digest, Sha512};

use crate::error::{Error, ErrorKind, Fallible};
use crate::tls::tofu_registry::{CheckOutcome, Decision, TofuRegistry, UnverifiedHostCallback};

/// The outcome of verifying a peer's certificate chain against configured
/// CA trust anchors, before TOFU is ever consulted.
pub enum ChainVerification {
    /// Chain verified and the certificate's DNS names/CN match the host.
    Verified,
    /// Chain verified but no name in the certificate matches the host.
    HostnameMismatch,
    /// Chain could not be verified against any trust anchor (self-signed,
    /// missing issuer, expired, etc.).
    Unverifiable,
}

/// SHA-512 of a certificate's DER encoding, rendered as 128 lowercase hex
/// characters.
pub fn fingerprint(der: &[u8]) -> String {
    let digest = Sha512::digest(der);
    let mut out = String::with_capacity(128);
    for byte in digest.iter() {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Applies §4.8's decision table: a verified chain with a matching
/// hostname always succeeds; otherwise TOFU is consulted if enabled.
pub fn verify(
    chain_result: ChainVerification,
    der: &[u8],
    host: &str,
    port: u16,
    trust_known_hosts: bool,
    registry: &TofuRegistry,
    callback: &dyn UnverifiedHostCallback,
) -> Fallible<()> {
    match chain_result {
        ChainVerification::Verified => Ok(()),
        ChainVerification::HostnameMismatch | ChainVerification::Unverifiable => {
            if !trust_known_hosts {
                return Err(Error::from(ErrorKind::TlsVerificationFailed));
            }
            let fp = fingerprint(der);
            match registry.check(host, port, &fp)? {
                CheckOutcome::Trusted => Ok(()),
                CheckOutcome::NeedsDecision(reason) => match callback.decide(host, port, &fp, reason) {
                    Decision::Reject => Err(Error::from(ErrorKind::TlsVerificationFailed)),
                    Decision::AcceptOnce => Ok(()),
                    Decision::Trust => registry.update(host, port, &fp),
                },
            }
        }
    }
}

/// Parses a subject string's printable fields, rejecting embedded NUL
/// bytes the way a strict DER string decoder would (§4.8).
pub fn decode_der_string(raw: &[u8]) -> Fallible<String> {
    if raw.contains(&0u8) {
        return Err(Error::from(ErrorKind::TlsMalformedCertificate));
    }
    String::from_utf8(raw.to_vec())
        .map_err(|_| Error::from(ErrorKind::TlsMalformedCertificate))
}

/// Matches a hostname against a certificate's DNS subjectAltNames (or, if
/// none are present, its CN), honoring a single leftmost wildcard label.
pub fn hostname_matches(host: &str, candidates: &[String]) -> bool {
    let host = host.to_ascii_lowercase();
    candidates.iter().any(|candidate| {
        let candidate = candidate.to_ascii_lowercase();
        if let Some(rest) = candidate.strip_prefix("*.") {
            match host.split_once('.') {
                Some((_, host_rest)) => host_rest == rest,
                None => false,
            }
        } else {
            candidate == host
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fingerprint_is_128_lowercase_hex_chars() {
        let fp = fingerprint(b"certificate bytes");
        assert_eq!(fp.len(), 128);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn wildcard_matches_single_label() {
        assert!(hostname_matches("db.example.com", &["*.example.com".to_string()]));
        assert!(!hostname_matches("a.db.example.com", &["*.example.com".to_string()]));
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        assert!(hostname_matches("Example.COM", &["example.com".to_string()]));
    }

    #[test]
    fn embedded_nul_is_malformed() {
        let err = decode_der_string(b"Example\0Corp").unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::TlsMalformedCertificate);
    }

    struct FixedDecision(Decision);

    impl UnverifiedHostCallback for FixedDecision {
        fn decide(&self, _host: &str, _port: u16, _fingerprint: &str, _reason: crate::tls::tofu_registry::Reason) -> Decision {
            self.0
        }
    }

    #[test]
    fn verified_chain_never_consults_tofu() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TofuRegistry::new(dir.path().join("known_hosts"));
        let callback = FixedDecision(Decision::Reject);
        let result = verify(ChainVerification::Verified, b"der", "h", 7687, true, &registry, &callback);
        assert!(result.is_ok());
    }

    #[test]
    fn unverifiable_without_trust_known_hosts_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TofuRegistry::new(dir.path().join("known_hosts"));
        let callback = FixedDecision(Decision::Trust);
        let err = verify(ChainVerification::Unverifiable, b"der", "h", 7687, false, &registry, &callback).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::TlsVerificationFailed);
    }

    #[test]
    fn unrecognized_host_trusted_by_callback_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TofuRegistry::new(dir.path().join("known_hosts"));
        let callback = FixedDecision(Decision::Trust);
        verify(ChainVerification::Unverifiable, b"der", "h", 7687, true, &registry, &callback).unwrap();

        // A second verification of the same peer now finds a pinned match
        // and succeeds without the callback needing to accept again.
        let callback_would_reject = FixedDecision(Decision::Reject);
        let result = verify(ChainVerification::Unverifiable, b"der", "h", 7687, true, &registry, &callback_would_reject);
        assert!(result.is_ok());
    }

    #[test]
    fn callback_reject_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TofuRegistry::new(dir.path().join("known_hosts"));
        let callback = FixedDecision(Decision::Reject);
        let err = verify(ChainVerification::HostnameMismatch, b"der", "h", 7687, true, &registry, &callback).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::TlsVerificationFailed);
    }
}
