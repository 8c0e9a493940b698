//! Server configuration.
//!
//! Request read timeouts belong to [`super::ConnectionHandler`].

use std::path::PathBuf;
use std::time::Duration;

use credrelay_core::Config;

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Unix socket path.
    pub socket_path: PathBuf,

    /// Maximum connections handled concurrently.
    pub max_connections: usize,

    /// Time in-flight connections get to finish after shutdown.
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    /// Create a config for `socket_path` with default limits.
    pub fn unix(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            max_connections: 16,
            shutdown_grace: Duration::from_secs(5),
        }
    }

    /// Build from the loaded relay configuration.
    pub fn from_config(config: &Config) -> credrelay_core::Result<Self> {
        Ok(Self {
            socket_path: config.socket_path()?,
            max_connections: config.daemon.max_connections,
            shutdown_grace: config.shutdown_grace(),
        })
    }

    /// Set max connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}
