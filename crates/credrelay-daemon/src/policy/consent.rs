//! Consent prompt capability.
//!
//! The policy engine asks a [`ConsentPrompt`] before relaying `get` or
//! `store`. The daemon uses [`TerminalPrompt`]; tests substitute stubs.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use dialoguer::Confirm;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use credrelay_core::{CredentialRequest, Operation};

use crate::peer::PeerInfo;

/// What the local user is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentRequest {
    pub operation: Operation,
    /// `protocol://[user@]host[/path]`, never secrets.
    pub target: String,
    /// Description of the connecting process, `?` when unknown.
    pub peer: String,
}

impl ConsentRequest {
    pub fn new(request: &CredentialRequest, peer: &PeerInfo) -> Self {
        Self {
            operation: request.operation,
            target: request.target(),
            peer: peer.to_string(),
        }
    }

    /// One-line question shown to the user.
    pub fn summary(&self) -> String {
        let action = match self.operation {
            Operation::Get => "requested Git credentials for",
            Operation::Store => "wants to store Git credentials for",
            Operation::Erase => "wants to erase Git credentials for",
        };
        format!("[{}] {action}: {}. Allow?", self.peer, self.target)
    }
}

/// Error from a prompt implementation.
#[derive(Debug, thiserror::Error)]
#[error("Consent prompt failed: {0}")]
pub struct ConsentError(pub String);

/// Injected capability that asks the local user for approval.
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    /// Returns `Ok(true)` only on explicit approval.
    async fn confirm(&self, request: &ConsentRequest) -> Result<bool, ConsentError>;
}

/// Prompt with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticPrompt(pub bool);

#[async_trait]
impl ConsentPrompt for StaticPrompt {
    async fn confirm(&self, request: &ConsentRequest) -> Result<bool, ConsentError> {
        debug!(target_url = %request.target, answer = self.0, "Static consent answer");
        Ok(self.0)
    }
}

/// Interactive y/N prompt on the daemon's terminal.
///
/// Questions are serialised: only one is on screen at a time. A question
/// that outlives its request (timeout, shutdown) stays on screen until
/// answered; the late answer is discarded.
#[derive(Debug, Clone, Default)]
pub struct TerminalPrompt {
    terminal: Arc<Mutex<()>>,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsentPrompt for TerminalPrompt {
    async fn confirm(&self, request: &ConsentRequest) -> Result<bool, ConsentError> {
        let summary = request.summary();
        ask_detached(Arc::clone(&self.terminal), move || {
            Confirm::new()
                .with_prompt(summary)
                .default(false)
                .interact()
                .map_err(|e| ConsentError(e.to_string()))
        })
        .await
    }
}

/// Run a blocking question on its own OS thread and await the answer.
///
/// Must not be a tokio blocking task: runtime drop waits for those, so an
/// unanswered question would keep the daemon from exiting.
async fn ask_detached<F>(terminal: Arc<Mutex<()>>, ask: F) -> Result<bool, ConsentError>
where
    F: FnOnce() -> Result<bool, ConsentError> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("consent-prompt".into())
        .spawn(move || {
            let _guard = terminal.lock().unwrap_or_else(PoisonError::into_inner);
            if tx.is_closed() {
                return;
            }
            if tx.send(ask()).is_err() {
                warn!("Consent answered after the request expired; answer ignored");
            }
        })
        .map_err(|e| ConsentError(format!("cannot start prompt thread: {e}")))?;

    rx.await
        .map_err(|_| ConsentError("prompt thread ended without an answer".into()))?
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use credrelay_core::Fields;

    fn request(op: Operation) -> CredentialRequest {
        CredentialRequest::new(
            op,
            [("protocol", "https"), ("host", "github.com"), ("password", "pw")]
                .into_iter()
                .collect::<Fields>(),
        )
    }

    #[test]
    fn summary_names_peer_and_target() {
        let peer = PeerInfo {
            pid: Some(42),
            uid: Some(1000),
            process_name: Some("sshd".into()),
        };
        let consent = ConsentRequest::new(&request(Operation::Get), &peer);
        assert_eq!(
            consent.summary(),
            "[sshd (pid 42)] requested Git credentials for: https://github.com. Allow?"
        );
    }

    #[test]
    fn summary_never_contains_secret() {
        let consent = ConsentRequest::new(&request(Operation::Store), &PeerInfo::unknown());
        assert!(!consent.summary().contains("pw"));
        assert!(consent.summary().starts_with("[?] wants to store"));
    }

    #[test]
    fn unanswered_question_does_not_block_runtime_drop() {
        let (unblock_tx, unblock_rx) = std::sync::mpsc::channel::<()>();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let answer = runtime.block_on(async {
            tokio::time::timeout(
                std::time::Duration::from_millis(50),
                ask_detached(Arc::new(Mutex::new(())), move || {
                    let _ = unblock_rx.recv();
                    Ok(true)
                }),
            )
            .await
        });
        assert!(answer.is_err());

        let (dropped_tx, dropped_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            drop(runtime);
            dropped_tx.send(()).unwrap();
        });
        assert!(
            dropped_rx
                .recv_timeout(std::time::Duration::from_secs(3))
                .is_ok()
        );
        drop(unblock_tx);
    }

    #[tokio::test]
    async fn detached_question_delivers_answer() {
        let answer = ask_detached(Arc::new(Mutex::new(())), || Ok(false)).await;
        assert!(!answer.unwrap());
        let err = ask_detached(Arc::new(Mutex::new(())), || {
            Err(ConsentError("not a terminal".into()))
        })
        .await
        .unwrap_err();
        assert_eq!(err.0, "not a terminal");
    }

    #[tokio::test]
    async fn static_prompt_answers() {
        let consent = ConsentRequest::new(&request(Operation::Get), &PeerInfo::unknown());
        assert!(StaticPrompt(true).confirm(&consent).await.unwrap());
        assert!(!StaticPrompt(false).confirm(&consent).await.unwrap());
    }
}
