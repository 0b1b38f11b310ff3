//! TOFU mismatch with a user Trust decision: the registry rewrites the
//! known_hosts file in place, leaving every other record untouched.

use std::fs;

use bolt_core::tls::tofu_registry::{CheckOutcome, Decision, Reason, TofuRegistry, UnverifiedHostCallback};

struct AlwaysTrust;

impl UnverifiedHostCallback for AlwaysTrust {
    fn decide(&self, _host: &str, _port: u16, _fingerprint: &str, reason: Reason) -> Decision {
        assert_eq!(reason, Reason::Mismatch);
        Decision::Trust
    }
}

#[test]
fn mismatch_with_trust_rewrites_only_the_offending_host_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("known_hosts");
    let other_host = format!("other:7687 {}\n", "c".repeat(128));
    let stale = "a".repeat(128);
    fs::write(&path, format!("h:7687 {}\n{}", stale, other_host)).unwrap();

    let registry = TofuRegistry::new(&path);
    let presented = "b".repeat(128);
    let outcome = registry.check("h", 7687, &presented).unwrap();

    let reason = match outcome {
        CheckOutcome::NeedsDecision(reason) => reason,
        CheckOutcome::Trusted => panic!("expected a mismatch, not a silent match"),
    };
    assert_eq!(reason, Reason::Mismatch);

    let callback = AlwaysTrust;
    match callback.decide("h", 7687, &presented, reason) {
        Decision::Trust => registry.update("h", 7687, &presented).unwrap(),
        other => panic!("expected Trust, got {:?}", other),
    }

    let contents = fs::read_to_string(&path).unwrap();
    assert!(contents.contains(&format!("h:7687 {}", presented)));
    assert!(!contents.contains(&stale));
    assert!(contents.contains(&other_host.trim_end()));
}
