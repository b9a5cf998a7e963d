use anyhow::{Context, Result};
use tokio::net::UnixStream;

/// Credentials of the process on the other end of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerIdentity {
    pub pid: Option<i32>,
    pub uid: u32,
}

pub fn peer_identity(stream: &UnixStream) -> Result<PeerIdentity> {
    let cred = stream
        .peer_cred()
        .context("Failed to get client credentials")?;
    Ok(PeerIdentity {
        pid: cred.pid(),
        uid: cred.uid(),
    })
}

/// Whether a launcher running as `peer` may talk to this admin service.
///
/// Same user is always allowed; an admin service running as root serves
/// every local user.
pub fn is_peer_allowed(peer: &PeerIdentity) -> bool {
    // SAFETY: getuid() is always safe to call - returns the real user ID
    let current_uid = unsafe { libc::getuid() };
    is_uid_allowed(peer.uid, current_uid)
}

fn is_uid_allowed(peer_uid: u32, current_uid: u32) -> bool {
    if peer_uid == current_uid {
        tracing::debug!("✓ Client UID {} matches server UID", peer_uid);
        return true;
    }
    if current_uid == 0 {
        tracing::debug!("Server running as root, accepting client UID {}", peer_uid);
        return true;
    }
    tracing::warn!(
        "✗ User verification failed: client UID {} != server UID {}",
        peer_uid,
        current_uid
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_rules() {
        assert!(is_uid_allowed(1000, 1000));
        assert!(is_uid_allowed(1000, 0));
        assert!(!is_uid_allowed(1001, 1000));
    }

    #[tokio::test]
    async fn socket_pair_peers_are_this_process() {
        let (a, _b) = UnixStream::pair().unwrap();
        let peer = peer_identity(&a).unwrap();
        assert!(is_peer_allowed(&peer));
        if let Some(pid) = peer.pid {
            assert_eq!(pid as u32, std::process::id());
        }
    }
}
