//! Policy engine types.

use std::fmt;

use crate::peer::PeerInfo;

/// Which side of the transport a connection came from.
///
/// A forwarded UNIX socket is indistinguishable from a local one at the OS
/// level, so this is never inferred: the listener marks every socket
/// connection as [`Origin::Remote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Trusted local invocation; allowed without prompting.
    Local,
    /// Arrived over the relay socket.
    Remote,
}

/// Per-connection context handed to the policy engine.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Monotonic connection number, for log correlation.
    pub id: u64,
    pub origin: Origin,
    pub peer: PeerInfo,
}

impl ConnectionContext {
    pub const fn remote(id: u64, peer: PeerInfo) -> Self {
        Self {
            id,
            origin: Origin::Remote,
            peer,
        }
    }

    pub const fn local(id: u64) -> Self {
        Self {
            id,
            origin: Origin::Local,
            peer: PeerInfo::unknown(),
        }
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Erase is never relayed.
    EraseOverRelay,
    /// The local user answered no.
    UserDeclined,
    /// The prompt could not be shown or answered.
    PromptFailed,
    /// Nobody answered within the consent timeout.
    ConsentTimedOut,
    /// The daemon began shutting down while the prompt was pending.
    ShuttingDown,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EraseOverRelay => "erase not permitted over relay",
            Self::UserDeclined => "user declined",
            Self::PromptFailed => "consent prompt failed",
            Self::ConsentTimedOut => "consent timed out",
            Self::ShuttingDown => "shutting down",
        })
    }
}

/// Static decision for an operation and origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny(DenyReason),
    RequireConsent,
}

/// Final outcome of authorizing one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// The helper may run. `prompted` records whether the user was asked.
    Allowed { prompted: bool },
    Denied(DenyReason),
}
