//! Unix socket listener for the credential relay.
//!
//! Binds the socket with owner-only permissions, accepts connections and
//! runs each on its own task through a [`ConnectionHandler`].

mod config;
mod handler;

pub use config::ServerConfig;
pub use handler::{ConnectionHandler, SessionOutcome};

use std::os::unix::fs::{DirBuilderExt, FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::stat::{Mode, umask};
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::peer::PeerInfo;
use crate::policy::ConnectionContext;
use crate::shutdown::shutdown_signalled;

/// Pause after a failed accept, so fd exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Socket {0} is in use by a running relay")]
    AddressInUse(PathBuf),

    #[error("Refusing to replace {0}: not a socket")]
    NotASocket(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Bound relay listener.
pub struct RelayServer {
    listener: UnixListener,
    config: ServerConfig,
    handler: Arc<ConnectionHandler>,
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("listener", &self.listener)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RelayServer {
    /// Bind the socket. Must be called inside a tokio runtime.
    ///
    /// A leftover socket file is removed only when nothing accepts
    /// connections on it; a live relay yields [`ServerError::AddressInUse`].
    pub fn bind(config: ServerConfig, handler: ConnectionHandler) -> Result<Self, ServerError> {
        if config.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be >= 1".into()));
        }
        let path = &config.socket_path;
        create_private_parent(path)?;
        remove_stale_socket(path)?;

        // Owner-only from the moment the socket exists.
        let previous = umask(Mode::from_bits_truncate(0o177));
        let bound = UnixListener::bind(path);
        umask(previous);
        let listener = bound?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;

        info!(path = %path.display(), "Listening for credential requests");
        Ok(Self {
            listener,
            config,
            handler: Arc::new(handler),
        })
    }

    /// Path of the bound socket.
    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Accept connections until `shutdown` flips to `true`.
    ///
    /// On shutdown the socket is closed and removed, in-flight connections
    /// get the configured grace period, and the rest are aborted.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let Self {
            listener,
            config,
            handler,
        } = self;
        let permits = Arc::new(Semaphore::new(config.max_connections));
        let mut tasks = JoinSet::new();
        let mut next_id: u64 = 0;

        loop {
            let permit = tokio::select! {
                () = shutdown_signalled(&mut shutdown) => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let stream = tokio::select! {
                () = shutdown_signalled(&mut shutdown) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            while let Some(result) = tasks.try_join_next() {
                log_task_result(result);
            }

            next_id += 1;
            let ctx = ConnectionContext::remote(next_id, PeerInfo::from_stream(&stream));
            debug!(conn = ctx.id, peer = %ctx.peer, "Connection accepted");

            let handler = Arc::clone(&handler);
            let rx = shutdown.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let id = ctx.id;
                let outcome = handler.handle(stream, ctx, rx).await;
                debug!(conn = id, ?outcome, "Connection closed");
            });
        }

        drop(listener);
        if let Err(e) = std::fs::remove_file(&config.socket_path) {
            debug!(error = %e, "Socket file already gone");
        }
        info!(in_flight = tasks.len(), "Listener closed, draining connections");

        let drained = tokio::time::timeout(config.shutdown_grace, drain(&mut tasks))
            .await
            .is_ok();
        if !drained {
            warn!(
                remaining = tasks.len(),
                "Grace period elapsed, aborting connections"
            );
            tasks.abort_all();
            drain(&mut tasks).await;
        }
        info!("Relay stopped");
        Ok(())
    }
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.join_next().await {
        log_task_result(result);
    }
}

fn log_task_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result
        && e.is_panic()
    {
        error!(error = %e, "Connection task panicked");
    }
}

fn create_private_parent(path: &Path) -> Result<(), ServerError> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    if !parent.exists() {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(parent)?;
    }
    Ok(())
}

/// Remove `path` if it is a socket nobody is listening on.
fn remove_stale_socket(path: &Path) -> Result<(), ServerError> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if !meta.file_type().is_socket() {
        return Err(ServerError::NotASocket(path.to_path_buf()));
    }
    match std::os::unix::net::UnixStream::connect(path) {
        Ok(_) => Err(ServerError::AddressInUse(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            info!(path = %path.display(), "Removing stale socket");
            std::fs::remove_file(path)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
