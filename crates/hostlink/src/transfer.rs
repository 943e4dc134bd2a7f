//! File upload and download over the session's file transfer subchannel
//!
//! The subchannel is opened on the first transfer and reused afterwards. A
//! failed transfer may leave a partial file at the destination.

use crate::error::LinkError;
use crate::session::LinkSession;
use crate::Outcome;
use std::path::Path;
use tracing::debug;

/// Copy `local` to `remote` on the session's host
pub fn upload(session: &mut LinkSession, local: impl AsRef<Path>, remote: impl AsRef<Path>) -> Outcome<()> {
    let (local, remote) = (local.as_ref(), remote.as_ref());
    debug!("Uploading {} to {}:{}", local.display(), session.options().hostname, remote.display());

    Outcome::from(session.file_subchannel().and_then(|sftp| sftp.put(local, remote)))
        .map(|bytes| debug!("Uploaded {} bytes to {}", bytes, remote.display()))
        .map_error(|err| LinkError::transfer(local, remote, err))
}

/// Copy `remote` on the session's host to `local`
pub fn download(session: &mut LinkSession, remote: impl AsRef<Path>, local: impl AsRef<Path>) -> Outcome<()> {
    let (remote, local) = (remote.as_ref(), local.as_ref());
    debug!("Downloading {}:{} to {}", session.options().hostname, remote.display(), local.display());

    Outcome::from(session.file_subchannel().and_then(|sftp| sftp.get(remote, local)))
        .map(|bytes| debug!("Downloaded {} bytes to {}", bytes, local.display()))
        .map_error(|err| LinkError::transfer(remote, local, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::{session_on, MockRemote};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_upload_download_round_trip() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("engine.conf");
        let payload: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        fs::write(&local, &payload).unwrap();

        let remote = MockRemote::default();
        let mut session = session_on(&remote);

        assert!(session.upload(&local, "/etc/engine/engine.conf").is_success());
        let back = dir.path().join("engine.conf.back");
        assert!(session.download("/etc/engine/engine.conf", &back).is_success());

        assert_eq!(fs::read(&back).unwrap(), payload);
    }

    #[test]
    fn test_subchannel_opened_once() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("a.txt");
        fs::write(&local, b"a").unwrap();

        let remote = MockRemote::default();
        let mut session = session_on(&remote);
        assert_eq!(remote.state().subchannels_opened, 0);

        for i in 0..3 {
            assert!(upload(&mut session, &local, format!("/tmp/a{}.txt", i)).is_success());
        }
        assert!(download(&mut session, "/tmp/a0.txt", dir.path().join("b.txt")).is_success());

        assert_eq!(remote.state().subchannels_opened, 1);
    }

    #[test]
    fn test_missing_local_file() {
        let remote = MockRemote::default();
        let mut session = session_on(&remote);

        let outcome = session.upload("/nonexistent/hostlink/setup.sh", "/tmp/setup.sh");

        assert_eq!(outcome.error().map(LinkError::kind), Some(ErrorKind::FileTransfer));
        assert!(remote.state().files.is_empty());
    }

    #[test]
    fn test_missing_remote_file() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::default();
        let mut session = session_on(&remote);

        let outcome = session.download("/var/log/missing.log", dir.path().join("missing.log"));

        match outcome.error() {
            Some(LinkError::FileTransfer { from, to, reason }) => {
                assert_eq!(from, Path::new("/var/log/missing.log"));
                assert_eq!(to, &dir.path().join("missing.log"));
                assert!(reason.contains("no such file"));
            }
            other => panic!("expected transfer failure, got {:?}", other),
        }
    }

    #[test]
    fn test_remote_permission_denied() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("id.pub");
        fs::write(&local, b"ssh-ed25519 AAAA").unwrap();

        let remote = MockRemote::default();
        let mut session = session_on(&remote);

        let outcome = session.upload(&local, "/denied/authorized_keys");

        assert_eq!(outcome.error().map(LinkError::kind), Some(ErrorKind::FileTransfer));
    }
}
