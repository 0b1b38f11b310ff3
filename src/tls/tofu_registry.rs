//! The on-disk Trust-On-First-Use host fingerprint store (§4.7).
//!
//! ```text
//! <host>:<port> <hex-fingerprint>\n
//! ```
//!
//! Blank lines and `#`-prefixed lines are ignored; leading whitespace on a
//! record line is tolerated.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{Error, ErrorKind, Fallible};

/// Why the registry is asking the caller for a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// No record exists for this host:port yet.
    Unrecognized,
    /// A record exists but its fingerprint differs from the one presented.
    Mismatch,
}

/// The caller's verdict on an unverified or mismatched peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Reject,
    AcceptOnce,
    Trust,
}

pub trait UnverifiedHostCallback: Send + Sync {
    fn decide(&self, host: &str, port: u16, fingerprint: &str, reason: Reason) -> Decision;
}

/// The result of consulting the registry for a presented fingerprint.
pub enum CheckOutcome {
    /// A matching record was already on file; no callback is invoked.
    Trusted,
    NeedsDecision(Reason),
}

pub struct TofuRegistry {
    path: PathBuf,
}

impl TofuRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self { TofuRegistry { path: path.into() } }

    fn key(host: &str, port: u16) -> String { format!("{}:{}", host, port) }

    /// Returns the stored fingerprint for `host:port`, if any.
    fn lookup(&self, host: &str, port: u16) -> Fallible<Option<String>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::from(e)),
        };
        let key = Self::key(host, port);
        for line in BufReader::new(file).lines() {
            let line = line.map_err(Error::from)?;
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut parts = trimmed.splitn(2, char::is_whitespace);
            let token = parts.next().unwrap_or("");
            if token == key {
                let fp = parts.next().unwrap_or("").trim();
                return Ok(Some(fp.to_string()));
            }
        }
        Ok(None)
    }

    /// Compares a presented fingerprint against any stored record.
    pub fn check(&self, host: &str, port: u16, presented: &str) -> Fallible<CheckOutcome> {
        match self.lookup(host, port)? {
            None => {
                debug!("tofu: no prior record for {}:{}", host, port);
                Ok(CheckOutcome::NeedsDecision(Reason::Unrecognized))
            }
            Some(stored) if stored == presented => {
                debug!("tofu: {}:{} matches pinned fingerprint", host, port);
                Ok(CheckOutcome::Trusted)
            }
            Some(stored) if is_legacy_127_char_match(&stored, presented) => {
                info!(
                    "tofu: {}:{} matches a legacy 127-char fingerprint; upgrading to full form",
                    host, port
                );
                self.update(host, port, presented)?;
                Ok(CheckOutcome::Trusted)
            }
            Some(_) => {
                warn!("tofu: {}:{} fingerprint mismatch", host, port);
                Ok(CheckOutcome::NeedsDecision(Reason::Mismatch))
            }
        }
    }

    /// Persists `fingerprint` for `host:port`, replacing any existing
    /// record for the same host. Atomic: writes to a temp file in the same
    /// directory, then renames over the original; the temp file is removed
    /// on any error.
    pub fn update(&self, host: &str, port: u16, fingerprint: &str) -> Fallible<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(Error::from)?;
        }

        let key = Self::key(host, port);
        let mut retained = Vec::new();
        if let Ok(file) = File::open(&self.path) {
            for line in BufReader::new(file).lines() {
                let line = line.map_err(Error::from)?;
                let trimmed = line.trim_start();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    retained.push(line);
                    continue;
                }
                let token = trimmed.splitn(2, char::is_whitespace).next().unwrap_or("");
                if token != key {
                    retained.push(line);
                }
            }
        }

        let temp_path = self.temp_path();
        let write_result = (|| -> Fallible<()> {
            let mut temp = File::create(&temp_path).map_err(Error::from)?;
            for line in &retained {
                writeln!(temp, "{}", line).map_err(Error::from)?;
            }
            writeln!(temp, "{} {}", key, fingerprint).map_err(Error::from)?;
            temp.sync_all().map_err(Error::from)?;
            Ok(())
        })();

        if let Err(e) = write_result {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(Error::from(e));
        }

        info!("tofu: pinned {} as {}", key, fingerprint);
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "known_hosts".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Historic-bug accommodation: a stored fingerprint truncated to 127 hex
/// characters is accepted if it agrees with the first 127 characters of
/// the full 128-character presented one.
fn is_legacy_127_char_match(stored: &str, presented: &str) -> bool {
    stored.len() == 127 && presented.len() == 128 && stored == &presented[..127]
}

/// Default path for the known-hosts file: `$HOME/.neo4j/known_hosts`.
pub fn default_path() -> Fallible<PathBuf> {
    let home = std::env::var_os("HOME")
        .ok_or_else(|| Error::with_context(ErrorKind::UnexpectedError, "HOME is not set"))?;
    Ok(Path::new(&home).join(".neo4j").join("known_hosts"))
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unrecognized_host_needs_a_decision() {
        let dir = tempdir().unwrap();
        let registry = TofuRegistry::new(dir.path().join("known_hosts"));
        let outcome = registry.check("db.example.com", 7687, &"a".repeat(128)).unwrap();
        assert!(matches!(outcome, CheckOutcome::NeedsDecision(Reason::Unrecognized)));
    }

    #[test]
    fn trust_then_recheck_is_silently_trusted() {
        let dir = tempdir().unwrap();
        let registry = TofuRegistry::new(dir.path().join("known_hosts"));
        let fp = "a".repeat(128);
        registry.update("db.example.com", 7687, &fp).unwrap();
        let outcome = registry.check("db.example.com", 7687, &fp).unwrap();
        assert!(matches!(outcome, CheckOutcome::Trusted));
    }

    #[test]
    fn mismatched_fingerprint_needs_a_decision() {
        let dir = tempdir().unwrap();
        let registry = TofuRegistry::new(dir.path().join("known_hosts"));
        registry.update("db.example.com", 7687, &"a".repeat(128)).unwrap();
        let outcome = registry.check("db.example.com", 7687, &"b".repeat(128)).unwrap();
        assert!(matches!(outcome, CheckOutcome::NeedsDecision(Reason::Mismatch)));
    }

    #[test]
    fn legacy_127_char_fingerprint_is_upgraded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        let registry = TofuRegistry::new(&path);
        let legacy = "a".repeat(127);
        fs::write(&path, format!("db.example.com:7687 {}\n", legacy)).unwrap();

        let full = format!("{}b", legacy);
        let outcome = registry.check("db.example.com", 7687, &full).unwrap();
        assert!(matches!(outcome, CheckOutcome::Trusted));

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains(&full));
    }

    #[test]
    fn update_replaces_existing_record_for_same_host() {
        let dir = tempdir().unwrap();
        let registry = TofuRegistry::new(dir.path().join("known_hosts"));
        registry.update("db.example.com", 7687, &"a".repeat(128)).unwrap();
        registry.update("db.example.com", 7687, &"c".repeat(128)).unwrap();
        let stored = registry.lookup("db.example.com", 7687).unwrap();
        assert_eq!(stored, Some("c".repeat(128)));
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        fs::write(&path, "# a comment\n\ndb.example.com:7687 deadbeef\n").unwrap();
        let registry = TofuRegistry::new(&path);
        let stored = registry.lookup("db.example.com", 7687).unwrap();
        assert_eq!(stored, Some("deadbeef".to_string()));
    }
}
