#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Integration tests for the relay over a real Unix socket.
//!
//! Tests the full flow: client → listener → policy → helper subprocess →
//! response, with a fixed consent answer and a shell script as the helper.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use credrelay_core::config::HelperStyle;
use credrelay_daemon::helper::ProcessHelper;
use credrelay_daemon::policy::{PolicyEngine, StaticPrompt};
use credrelay_daemon::server::{ConnectionHandler, RelayServer, ServerConfig, ServerError};

/// Answers `get` from the request's host; records every run in `runs`.
const ECHO_HELPER: &str = r#"echo "$1" >> "$RUNS"
host=
while IFS= read -r line; do
  [ -z "$line" ] && break
  case "$line" in host=*) host="${line#host=}" ;; esac
done
[ "$1" = get ] || exit 0
printf 'protocol=https\nhost=%s\nusername=alice\npassword=pw-%s\n' "$host" "$host"
"#;

struct Relay {
    socket: PathBuf,
    runs: PathBuf,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), ServerError>>,
    _dir: tempfile::TempDir,
}

impl Relay {
    fn runs(&self) -> Vec<String> {
        std::fs::read_to_string(&self.runs)
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    async fn stop(self) -> PathBuf {
        self.shutdown.send(true).unwrap();
        self.task.await.unwrap().unwrap();
        self.socket
    }
}

fn handler(dir: &Path, consent: bool) -> (ConnectionHandler, PathBuf) {
    let runs = dir.join("runs");
    let script = dir.join("helper.sh");
    std::fs::write(
        &script,
        ECHO_HELPER.replace("$RUNS", &format!("'{}'", runs.display())),
    )
    .unwrap();
    let command = vec!["/bin/sh".to_string(), script.to_string_lossy().into_owned()];
    let helper = ProcessHelper::new(&command, HelperStyle::Helper, Duration::from_secs(10)).unwrap();
    let policy = Arc::new(PolicyEngine::new(
        Arc::new(StaticPrompt(consent)),
        Duration::from_secs(5),
    ));
    (
        ConnectionHandler::new(policy, Arc::new(helper), Duration::from_secs(5)),
        runs,
    )
}

fn start(consent: bool) -> Relay {
    start_with(consent, |config| config)
}

fn start_with(consent: bool, configure: impl FnOnce(ServerConfig) -> ServerConfig) -> Relay {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("relay.sock");
    let (handler, runs) = handler(dir.path(), consent);
    let config =
        configure(ServerConfig::unix(socket.clone()).with_shutdown_grace(Duration::from_secs(1)));
    let server = RelayServer::bind(config, handler).unwrap();
    let (shutdown, rx) = watch::channel(false);
    let task = tokio::spawn(server.serve(rx));
    Relay {
        socket,
        runs,
        shutdown,
        task,
        _dir: dir,
    }
}

async fn send(socket: &Path, request: &[u8]) -> Vec<u8> {
    let mut stream = UnixStream::connect(socket).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    out
}

// =========================================================================
// Request flow
// =========================================================================

#[tokio::test]
async fn get_round_trips_exact_bytes() {
    let relay = start(true);
    let out = send(&relay.socket, b"op=get\nprotocol=https\nhost=example.com\n\n").await;
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "protocol=https\nhost=example.com\nusername=alice\npassword=pw-example.com\n\n"
    );
    assert_eq!(relay.runs(), vec!["get"]);
    relay.stop().await;
}

#[tokio::test]
async fn store_reaches_helper_after_consent() {
    let relay = start(true);
    let out = send(
        &relay.socket,
        b"op=store\nprotocol=https\nhost=h\nusername=u\npassword=p\n\n",
    )
    .await;
    assert_eq!(out, b"\n");
    assert_eq!(relay.runs(), vec!["store"]);
    relay.stop().await;
}

#[tokio::test]
async fn declined_consent_never_runs_helper() {
    let relay = start(false);
    let out = send(&relay.socket, b"op=get\nprotocol=https\nhost=h\n\n").await;
    assert_eq!(out, b"\n");
    assert!(relay.runs().is_empty());
    relay.stop().await;
}

#[tokio::test]
async fn erase_is_refused_without_running_helper() {
    let relay = start(true);
    let out = send(&relay.socket, b"op=erase\nprotocol=https\nhost=h\n\n").await;
    assert_eq!(out, b"\n");
    assert!(relay.runs().is_empty());
    relay.stop().await;
}

#[tokio::test]
async fn truncated_request_gets_empty_response() {
    let relay = start(true);
    let out = send(&relay.socket, b"op=get\nprotocol=https\nhost=h").await;
    assert_eq!(out, b"\n");
    let out = send(&relay.socket, b"").await;
    assert_eq!(out, b"\n");
    assert!(relay.runs().is_empty());
    relay.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_get_their_own_answers() {
    let relay = start(true);
    let socket = relay.socket.clone();
    let clients: Vec<_> = (0..50)
        .map(|i| {
            let socket = socket.clone();
            tokio::spawn(async move {
                let request = format!("op=get\nprotocol=https\nhost=host{i}\n\n");
                let out = send(&socket, request.as_bytes()).await;
                (i, String::from_utf8(out).unwrap())
            })
        })
        .collect();

    for client in clients {
        let (i, out) = client.await.unwrap();
        assert_eq!(
            out,
            format!("protocol=https\nhost=host{i}\nusername=alice\npassword=pw-host{i}\n\n")
        );
    }
    assert_eq!(relay.runs().len(), 50);
    relay.stop().await;
}

#[tokio::test]
async fn connection_limit_holds_back_extra_clients() {
    let relay = start_with(true, |config| config.with_max_connections(1));

    let mut first = UnixStream::connect(&relay.socket).await.unwrap();
    first.write_all(b"op=get\nprotocol=https\n").await.unwrap();
    // Let the listener hand the only permit to the first connection.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let socket = relay.socket.clone();
    let mut second = tokio::spawn(async move {
        send(&socket, b"op=get\nprotocol=https\nhost=second\n\n").await
    });
    let early = tokio::time::timeout(Duration::from_millis(300), &mut second).await;
    assert!(early.is_err(), "second client served while first held the slot");
    assert!(relay.runs().is_empty());

    first.write_all(b"host=first\n\n").await.unwrap();
    let mut out = Vec::new();
    first.read_to_end(&mut out).await.unwrap();
    assert!(String::from_utf8(out).unwrap().contains("password=pw-first"));

    let out = second.await.unwrap();
    assert!(String::from_utf8(out).unwrap().contains("password=pw-second"));
    assert_eq!(relay.runs().len(), 2);
    relay.stop().await;
}

// =========================================================================
// Socket lifecycle
// =========================================================================

#[tokio::test]
async fn socket_is_owner_only() {
    let relay = start(true);
    let mode = std::fs::metadata(&relay.socket).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    relay.stop().await;
}

#[tokio::test]
async fn live_socket_is_not_taken_over() {
    let relay = start(true);
    let dir = tempfile::tempdir().unwrap();
    let (handler, _) = handler(dir.path(), true);
    let err = RelayServer::bind(ServerConfig::unix(relay.socket.clone()), handler).unwrap_err();
    assert!(matches!(err, ServerError::AddressInUse(_)));
    assert!(relay.socket.exists());
    relay.stop().await;
}

#[tokio::test]
async fn stale_socket_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("relay.sock");
    drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());
    assert!(socket.exists());

    let (handler, _) = handler(dir.path(), true);
    let server = RelayServer::bind(ServerConfig::unix(socket.clone()), handler).unwrap();
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(server.serve(rx));
    let out = send(&socket, b"op=get\nhost=h\n\n").await;
    assert!(out.ends_with(b"\n\n"));
    tx.send(true).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn regular_file_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.sock");
    std::fs::write(&path, b"keep me").unwrap();
    let (handler, _) = handler(dir.path(), true);
    let err = RelayServer::bind(ServerConfig::unix(path.clone()), handler).unwrap_err();
    assert!(matches!(err, ServerError::NotASocket(_)));
    assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
}

#[tokio::test]
async fn shutdown_removes_socket() {
    let relay = start(true);
    let socket = relay.stop().await;
    assert!(!socket.exists());
    assert!(UnixStream::connect(&socket).await.is_err());
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_session() {
    let relay = start(true);
    let mut stream = UnixStream::connect(&relay.socket).await.unwrap();
    stream.write_all(b"op=get\nprotocol=https\n").await.unwrap();

    // Give the listener a moment to accept before shutting down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    relay.shutdown.send(true).unwrap();
    stream.write_all(b"host=late\n\n").await.unwrap();

    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    // Consent during shutdown is refused; the client still gets an answer.
    assert_eq!(out, b"\n");
    relay.task.await.unwrap().unwrap();
}
