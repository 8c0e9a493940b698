//! Git credential relay daemon
//!
//! Listens on a local Unix socket that is forwarded to remote hosts with
//! `ssh -R`, asks the local user before any credential leaves the machine,
//! and answers with the local Git credential helper.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use credrelay_core::config::{Config, HelperStyle, load_config};
use credrelay_daemon::helper::ProcessHelper;
use credrelay_daemon::policy::{ConsentPrompt, PolicyEngine, StaticPrompt, TerminalPrompt};
use credrelay_daemon::server::{ConnectionHandler, RelayServer, ServerConfig};

/// Socket path remote hosts use by default.
const REMOTE_SOCKET_HINT: &str = "/tmp/git-credential-relay.sock";

#[derive(Parser, Debug)]
#[command(name = "git-credential-relayd")]
#[command(version, about = "Relay Git credential requests from remote hosts to the local helper")]
struct Args {
    /// Configuration file (defaults to the per-user config path)
    #[arg(long, env = "GIT_CREDENTIAL_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Unix socket to listen on
    #[arg(long, env = "GIT_CREDENTIAL_RELAY_SOCKET")]
    socket: Option<PathBuf>,

    /// Seconds a client gets to send its request
    #[arg(long, env = "GIT_CREDENTIAL_RELAY_READ_TIMEOUT")]
    read_timeout: Option<u64>,

    /// Seconds to wait for the user to answer a consent prompt
    #[arg(long, env = "GIT_CREDENTIAL_RELAY_CONSENT_TIMEOUT")]
    consent_timeout: Option<u64>,

    /// Seconds the credential helper may run
    #[arg(long, env = "GIT_CREDENTIAL_RELAY_HELPER_TIMEOUT")]
    helper_timeout: Option<u64>,

    /// Maximum connections served concurrently
    #[arg(long, env = "GIT_CREDENTIAL_RELAY_MAX_CONNECTIONS")]
    max_connections: Option<usize>,

    /// Helper command, e.g. "git credential" or "git-credential-store --file /path"
    #[arg(long, env = "GIT_CREDENTIAL_RELAY_HELPER")]
    helper_command: Option<String>,

    /// How the operation is passed to the helper command.
    #[arg(
        long,
        env = "GIT_CREDENTIAL_RELAY_HELPER_STYLE",
        value_parser = ["git-credential", "helper"]
    )]
    helper_style: Option<String>,

    /// How consent is obtained: an interactive terminal prompt, or refuse everything.
    #[arg(
        long,
        default_value = "terminal",
        env = "GIT_CREDENTIAL_RELAY_CONSENT",
        value_parser = ["terminal", "deny-all"]
    )]
    consent: String,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "GIT_CREDENTIAL_RELAY_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "GIT_CREDENTIAL_RELAY_LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// Apply command-line and environment overrides on top of the file config.
    fn apply(&self, config: &mut Config) {
        if let Some(socket) = &self.socket {
            config.daemon.socket_path = Some(socket.clone());
        }
        if let Some(secs) = self.read_timeout {
            config.daemon.read_timeout_secs = secs;
        }
        if let Some(max) = self.max_connections {
            config.daemon.max_connections = max;
        }
        if let Some(secs) = self.consent_timeout {
            config.consent.timeout_secs = secs;
        }
        if let Some(secs) = self.helper_timeout {
            config.helper.timeout_secs = secs;
        }
        if let Some(command) = &self.helper_command {
            config.helper.command = command.split_whitespace().map(str::to_owned).collect();
        }
        match self.helper_style.as_deref() {
            Some("helper") => config.helper.style = HelperStyle::Helper,
            Some("git-credential") => config.helper.style = HelperStyle::GitCredential,
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = format!("git_credential_relayd={0},credrelay_daemon={0}", args.log_level);
    credrelay_core::tracing_init::init_tracing(&log_filter, args.log_json);

    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let server_config = ServerConfig::from_config(&config)?;
    let helper = ProcessHelper::from_config(&config.helper)
        .context("helper.command must name a program")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        socket = %server_config.socket_path.display(),
        helper = ?config.helper.command,
        consent = %args.consent,
        "Starting git-credential-relayd"
    );

    let prompt: Arc<dyn ConsentPrompt> = match args.consent.as_str() {
        "deny-all" => Arc::new(StaticPrompt(false)),
        _ => Arc::new(TerminalPrompt::new()),
    };
    let policy = Arc::new(PolicyEngine::new(prompt, config.consent_timeout()));
    let handler = ConnectionHandler::new(policy, Arc::new(helper), config.read_timeout());

    let server = RelayServer::bind(server_config, handler)?;
    print_forwarding_hint(server.socket_path());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut serve_handle = tokio::spawn(server.serve(shutdown_rx));

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // `true` unsets $NOTIFY_SOCKET so helper subprocesses don't notify systemd.
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        result = &mut serve_handle => {
            error!("Listener stopped unexpectedly");
            return result?.map_err(Into::into);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    // Grace period plus abort are bounded inside serve(); this is a backstop.
    let stop_deadline = config.shutdown_grace() + Duration::from_secs(5);
    match tokio::time::timeout(stop_deadline, serve_handle).await {
        Ok(result) => result??,
        Err(_) => error!("Listener did not stop in time"),
    }

    info!("Daemon stopped");
    Ok(())
}

#[allow(clippy::print_stderr)]
fn print_forwarding_hint(local: &std::path::Path) {
    eprintln!("Forward the relay to a remote host with:");
    eprintln!(
        "  ssh -o StreamLocalBindUnlink=yes -R {REMOTE_SOCKET_HINT}:{} <host>",
        local.display()
    );
    eprintln!("and on the remote host:");
    eprintln!("  git config --global credential.helper relay");
}
