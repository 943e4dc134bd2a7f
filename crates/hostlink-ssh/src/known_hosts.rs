//! Known-hosts verification

use crate::{HostKeyPolicy, TransportError};
use ssh2::{CheckResult, KnownHostFileKind, Session};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Result of looking a host key up in the known-hosts database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyCheck {
    /// Key is known and matches
    Match,
    /// Host is known under a different key
    Mismatch,
    /// Host is not known
    NotFound,
    /// Lookup could not be performed
    Failure,
}

impl From<CheckResult> for HostKeyCheck {
    fn from(result: CheckResult) -> Self {
        match result {
            CheckResult::Match => Self::Match,
            CheckResult::Mismatch => Self::Mismatch,
            CheckResult::NotFound => Self::NotFound,
            CheckResult::Failure => Self::Failure,
        }
    }
}

/// Apply `policy` to a lookup result.
///
/// A mismatch is always fatal; the policy only governs hosts we have never seen.
pub fn decide(check: HostKeyCheck, policy: HostKeyPolicy, host: &str) -> Result<(), TransportError> {
    match (check, policy) {
        (HostKeyCheck::Match, _) => Ok(()),
        (HostKeyCheck::Mismatch, _) => Err(TransportError::HostKey(format!(
            "host key for {} does not match the known-hosts entry",
            host
        ))),
        (_, HostKeyPolicy::AutoAdd) => {
            debug!("Trusting unknown host key for {}", host);
            Ok(())
        }
        (_, HostKeyPolicy::Warn) => {
            warn!("Unknown host key for {}, trusting it anyway", host);
            Ok(())
        }
        (_, HostKeyPolicy::Reject) => Err(TransportError::HostKey(format!(
            "host {} is not in the known-hosts file",
            host
        ))),
    }
}

/// The user's OpenSSH known-hosts file
pub fn user_known_hosts_file() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".ssh").join("known_hosts"))
}

/// Check the server key of a handshaken session against the known-hosts file
pub fn verify(session: &Session, host: &str, port: u16, policy: HostKeyPolicy) -> Result<(), TransportError> {
    let (key, _key_type) = session
        .host_key()
        .ok_or_else(|| TransportError::HostKey("server presented no host key".to_string()))?;

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| TransportError::HostKey(e.to_string()))?;
    if let Some(path) = user_known_hosts_file().filter(|p| p.exists()) {
        if let Err(e) = known_hosts.read_file(&path, KnownHostFileKind::OpenSSH) {
            warn!("Failed to read {}: {}", path.display(), e);
        }
    }

    decide(known_hosts.check_port(host, port, key).into(), policy, host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_always_accepted() {
        for policy in [HostKeyPolicy::AutoAdd, HostKeyPolicy::Warn, HostKeyPolicy::Reject] {
            assert!(decide(HostKeyCheck::Match, policy, "h").is_ok());
        }
    }

    #[test]
    fn test_mismatch_always_rejected() {
        for policy in [HostKeyPolicy::AutoAdd, HostKeyPolicy::Warn, HostKeyPolicy::Reject] {
            let err = decide(HostKeyCheck::Mismatch, policy, "h").unwrap_err();
            assert!(matches!(err, TransportError::HostKey(_)));
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_unknown_host_follows_policy() {
        assert!(decide(HostKeyCheck::NotFound, HostKeyPolicy::AutoAdd, "h").is_ok());
        assert!(decide(HostKeyCheck::NotFound, HostKeyPolicy::Warn, "h").is_ok());
        assert!(decide(HostKeyCheck::NotFound, HostKeyPolicy::Reject, "h").is_err());
        assert!(decide(HostKeyCheck::Failure, HostKeyPolicy::AutoAdd, "h").is_ok());
        assert!(decide(HostKeyCheck::Failure, HostKeyPolicy::Reject, "h").is_err());
    }
}
