//! Identity of the process on the other end of a socket connection.
//!
//! With SSH forwarding the peer is usually the local `sshd`/`ssh` process,
//! which still tells the user which session a request came through.

use std::fmt;

use tokio::net::UnixStream;
use tracing::debug;

/// Peer credentials as reported by the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerInfo {
    pub pid: Option<i32>,
    pub uid: Option<u32>,
    pub process_name: Option<String>,
}

impl PeerInfo {
    pub const fn unknown() -> Self {
        Self {
            pid: None,
            uid: None,
            process_name: None,
        }
    }

    /// Read `SO_PEERCRED` / `LOCAL_PEERPID` from a connected stream.
    pub fn from_stream(stream: &UnixStream) -> Self {
        match stream.peer_cred() {
            Ok(cred) => {
                let pid = cred.pid();
                Self {
                    pid,
                    uid: Some(cred.uid()),
                    process_name: pid.and_then(process_name),
                }
            }
            Err(e) => {
                debug!(error = %e, "Peer credentials unavailable");
                Self::unknown()
            }
        }
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.pid, self.process_name.as_deref()) {
            (Some(pid), Some(name)) => write!(f, "{name} (pid {pid})"),
            (Some(pid), None) => write!(f, "? (pid {pid})"),
            (None, _) => f.write_str("?"),
        }
    }
}

#[cfg(target_os = "linux")]
fn process_name(pid: i32) -> Option<String> {
    std::fs::read_to_string(format!("/proc/{pid}/comm"))
        .ok()
        .map(|name| name.trim_end().to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(not(target_os = "linux"))]
const fn process_name(_pid: i32) -> Option<String> {
    None
}
