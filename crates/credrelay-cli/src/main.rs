//! Git credential relay client
//!
//! Configure on the remote host with `git config credential.helper relay`.
//! Git runs `git-credential-relay <get|store|erase>` and this forwards the
//! request to the relay daemon over the socket forwarded by `ssh -R`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use credrelay_cli::client::{self, DEFAULT_SOCKET, DEFAULT_TIMEOUT};
use credrelay_core::codec::MAX_REQUEST_BYTES;

#[derive(Parser, Debug)]
#[command(name = "git-credential-relay")]
#[command(version, about = "Git credential helper that asks a relayed credential daemon", long_about = None)]
struct Cli {
    /// Operation requested by Git (get, store or erase)
    operation: String,

    /// Forwarded relay socket
    #[arg(long, default_value = DEFAULT_SOCKET, env = "GIT_CREDENTIAL_RELAY_SOCK")]
    socket: PathBuf,

    /// Seconds to wait for the relay, including the user's consent
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs(), env = "GIT_CREDENTIAL_RELAY_TIMEOUT")]
    timeout: u64,

    /// Log level filter (e.g. "warn", "debug").
    #[arg(long, default_value = "warn", env = "GIT_CREDENTIAL_RELAY_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Stdout carries the credential protocol; logs go to stderr.
    let log_filter = format!("git_credential_relay={0},credrelay_cli={0}", cli.log_level);
    credrelay_core::tracing_init::init_tracing(&log_filter, false);

    let mut input = Vec::new();
    tokio::io::stdin()
        .take(MAX_REQUEST_BYTES as u64)
        .read_to_end(&mut input)
        .await?;
    debug!(operation = %cli.operation, socket = %cli.socket.display(), "Relaying credential request");

    let output = client::run(
        &cli.operation,
        &input,
        &cli.socket,
        Duration::from_secs(cli.timeout),
    )
    .await;

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&output).await?;
    stdout.flush().await?;
    Ok(())
}
