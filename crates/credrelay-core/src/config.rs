//! Configuration resolution for git-credential-relay.
//!
//! Resolution order (lowest to highest):
//! 1. Built-in defaults
//! 2. Config file (`<config dir>/git-credential-relay/config.toml`)
//! 3. Environment variables and CLI arguments (applied by the binaries)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Directory name used under the per-user config and cache directories.
pub const APP_DIR: &str = "git-credential-relay";

/// How long the remote client waits for the relay to answer.
///
/// The daemon's default consent timeout stays below this so an approval can
/// never run the helper for a client that already gave up.
pub const CLIENT_TIMEOUT_SECS: u64 = 60;

/// Complete relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub consent: ConsentConfig,
    pub helper: HelperConfig,
}

/// Listener and connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Socket path; `None` means [`default_socket_path`].
    pub socket_path: Option<PathBuf>,
    /// Bound on reading one request from a client.
    pub read_timeout_secs: u64,
    /// Maximum connections handled at once.
    pub max_connections: usize,
    /// How long in-flight connections may run after shutdown starts.
    pub shutdown_grace_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            read_timeout_secs: 60,
            max_connections: 16,
            shutdown_grace_secs: 5,
        }
    }
}

/// Consent prompt settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentConfig {
    /// Unanswered prompts resolve as denied after this long. Keep it below
    /// [`CLIENT_TIMEOUT_SECS`] unless remote clients run with a longer
    /// `--timeout`.
    pub timeout_secs: u64,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self { timeout_secs: 45 }
    }
}

/// How the local credential helper is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HelperStyle {
    /// `git credential <fill|approve|reject>`: consults every helper the user
    /// configured in Git.
    #[default]
    GitCredential,
    /// A raw helper program taking `get`, `store` or `erase` as its argument.
    Helper,
}

/// Local credential helper settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    /// Program and leading arguments; the operation verb is appended.
    pub command: Vec<String>,
    pub style: HelperStyle,
    /// The helper is killed if it runs longer than this.
    pub timeout_secs: u64,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            command: vec!["git".to_string(), "credential".to_string()],
            style: HelperStyle::GitCredential,
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// Check invariants the rest of the system relies on.
    pub fn validate(&self) -> Result<()> {
        if self.daemon.read_timeout_secs == 0 {
            return Err(Error::Config("daemon.read_timeout_secs must be > 0".into()));
        }
        if self.daemon.max_connections == 0 {
            return Err(Error::Config("daemon.max_connections must be >= 1".into()));
        }
        if self.consent.timeout_secs == 0 {
            return Err(Error::Config("consent.timeout_secs must be > 0".into()));
        }
        if self.helper.timeout_secs == 0 {
            return Err(Error::Config("helper.timeout_secs must be > 0".into()));
        }
        if self.helper.command.first().is_none_or(String::is_empty) {
            return Err(Error::Config("helper.command must name a program".into()));
        }
        Ok(())
    }

    /// Resolved socket path.
    pub fn socket_path(&self) -> Result<PathBuf> {
        match &self.daemon.socket_path {
            Some(path) => Ok(path.clone()),
            None => default_socket_path()
                .ok_or_else(|| Error::Config("Cannot determine cache directory".into())),
        }
    }

    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon.read_timeout_secs)
    }

    pub const fn consent_timeout(&self) -> Duration {
        Duration::from_secs(self.consent.timeout_secs)
    }

    pub const fn helper_timeout(&self) -> Duration {
        Duration::from_secs(self.helper.timeout_secs)
    }

    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.daemon.shutdown_grace_secs)
    }
}

/// Load configuration.
///
/// An explicitly given path must exist. Without one, the global config file
/// is used if present, otherwise built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(p) => load_config_file(p)?,
        None => match global_config_path() {
            Some(p) if p.exists() => load_config_file(&p)?,
            _ => {
                tracing::debug!("No config file found, using defaults");
                Config::default()
            }
        },
    };
    config.validate()?;
    Ok(config)
}

/// Default config file: `<config dir>/git-credential-relay/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// Default socket: `<cache dir>/git-credential-relay/local.sock`.
pub fn default_socket_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join(APP_DIR).join("local.sock"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let config = toml::from_str(&content).map_err(|source| Error::ConfigParse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "Loaded config file");
    Ok(config)
}
