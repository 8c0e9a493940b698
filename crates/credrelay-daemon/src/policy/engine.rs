//! Relay policy engine.
//!
//! Decides per request whether the local helper may run. Nothing is
//! remembered between requests: every remote `get` or `store` is asked
//! about again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use credrelay_core::{CredentialRequest, Operation};

use super::consent::{ConsentPrompt, ConsentRequest};
use super::types::{Authorization, ConnectionContext, DenyReason, Origin, PolicyDecision};
use crate::shutdown::shutdown_signalled;

/// Policy engine gating relayed credential operations.
pub struct PolicyEngine {
    prompt: Arc<dyn ConsentPrompt>,
    consent_timeout: Duration,
}

impl PolicyEngine {
    pub fn new(prompt: Arc<dyn ConsentPrompt>, consent_timeout: Duration) -> Self {
        Self {
            prompt,
            consent_timeout,
        }
    }

    /// Static decision for an operation arriving from `origin`.
    pub const fn decide(operation: Operation, origin: Origin) -> PolicyDecision {
        match (origin, operation) {
            (Origin::Local, _) => PolicyDecision::Allow,
            (Origin::Remote, Operation::Erase) => PolicyDecision::Deny(DenyReason::EraseOverRelay),
            (Origin::Remote, Operation::Get | Operation::Store) => PolicyDecision::RequireConsent,
        }
    }

    /// Authorize one request, prompting the user when required.
    ///
    /// A pending prompt resolves as denied when `shutdown` flips to `true`.
    pub async fn authorize(
        &self,
        request: &CredentialRequest,
        ctx: &ConnectionContext,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Authorization {
        match Self::decide(request.operation, ctx.origin) {
            PolicyDecision::Allow => {
                debug!(conn = ctx.id, op = %request.operation, "Local origin, allowed");
                Authorization::Allowed { prompted: false }
            }
            PolicyDecision::Deny(reason) => Authorization::Denied(reason),
            PolicyDecision::RequireConsent => self.ask(request, ctx, shutdown).await,
        }
    }

    async fn ask(
        &self,
        request: &CredentialRequest,
        ctx: &ConnectionContext,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Authorization {
        if *shutdown.borrow() {
            return Authorization::Denied(DenyReason::ShuttingDown);
        }

        let consent = ConsentRequest::new(request, &ctx.peer);
        info!(
            conn = ctx.id,
            op = %consent.operation,
            target_url = %consent.target,
            peer = %consent.peer,
            "Consent requested"
        );

        let answer = tokio::select! {
            answer = tokio::time::timeout(self.consent_timeout, self.prompt.confirm(&consent)) => answer,
            () = shutdown_signalled(shutdown) => {
                return Authorization::Denied(DenyReason::ShuttingDown);
            }
        };

        match answer {
            Ok(Ok(true)) => Authorization::Allowed { prompted: true },
            Ok(Ok(false)) => Authorization::Denied(DenyReason::UserDeclined),
            Ok(Err(e)) => {
                warn!(conn = ctx.id, error = %e, "Consent prompt failed");
                Authorization::Denied(DenyReason::PromptFailed)
            }
            Err(_) => Authorization::Denied(DenyReason::ConsentTimedOut),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use credrelay_core::Fields;

    use super::*;
    use crate::peer::PeerInfo;
    use crate::policy::consent::{ConsentError, StaticPrompt};

    struct CountingPrompt {
        answer: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ConsentPrompt for CountingPrompt {
        async fn confirm(&self, _request: &ConsentRequest) -> Result<bool, ConsentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer)
        }
    }

    struct NeverAnswers;

    #[async_trait]
    impl ConsentPrompt for NeverAnswers {
        async fn confirm(&self, _request: &ConsentRequest) -> Result<bool, ConsentError> {
            std::future::pending().await
        }
    }

    struct Broken;

    #[async_trait]
    impl ConsentPrompt for Broken {
        async fn confirm(&self, _request: &ConsentRequest) -> Result<bool, ConsentError> {
            Err(ConsentError("not a terminal".into()))
        }
    }

    fn request(op: Operation) -> CredentialRequest {
        CredentialRequest::new(
            op,
            [("protocol", "https"), ("host", "example.com")]
                .into_iter()
                .collect::<Fields>(),
        )
    }

    fn remote() -> ConnectionContext {
        ConnectionContext::remote(1, PeerInfo::unknown())
    }

    fn engine(prompt: Arc<dyn ConsentPrompt>) -> PolicyEngine {
        PolicyEngine::new(prompt, Duration::from_secs(5))
    }

    #[test]
    fn erase_from_remote_is_always_denied() {
        assert_eq!(
            PolicyEngine::decide(Operation::Erase, Origin::Remote),
            PolicyDecision::Deny(DenyReason::EraseOverRelay)
        );
    }

    #[test]
    fn get_and_store_from_remote_require_consent() {
        for op in [Operation::Get, Operation::Store] {
            assert_eq!(
                PolicyEngine::decide(op, Origin::Remote),
                PolicyDecision::RequireConsent
            );
        }
    }

    #[test]
    fn local_origin_is_allowed() {
        for op in [Operation::Get, Operation::Store, Operation::Erase] {
            assert_eq!(PolicyEngine::decide(op, Origin::Local), PolicyDecision::Allow);
        }
    }

    #[tokio::test]
    async fn erase_never_prompts() {
        let prompt = Arc::new(CountingPrompt {
            answer: true,
            calls: AtomicUsize::new(0),
        });
        let engine = engine(prompt.clone());
        let (_tx, mut rx) = watch::channel(false);
        let auth = engine
            .authorize(&request(Operation::Erase), &remote(), &mut rx)
            .await;
        assert_eq!(auth, Authorization::Denied(DenyReason::EraseOverRelay));
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn consent_is_asked_every_time() {
        let prompt = Arc::new(CountingPrompt {
            answer: true,
            calls: AtomicUsize::new(0),
        });
        let engine = engine(prompt.clone());
        let (_tx, mut rx) = watch::channel(false);
        for _ in 0..3 {
            let auth = engine
                .authorize(&request(Operation::Get), &remote(), &mut rx)
                .await;
            assert_eq!(auth, Authorization::Allowed { prompted: true });
        }
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn declined_consent_denies() {
        let engine = engine(Arc::new(StaticPrompt(false)));
        let (_tx, mut rx) = watch::channel(false);
        let auth = engine
            .authorize(&request(Operation::Store), &remote(), &mut rx)
            .await;
        assert_eq!(auth, Authorization::Denied(DenyReason::UserDeclined));
    }

    #[tokio::test]
    async fn prompt_error_denies() {
        let engine = engine(Arc::new(Broken));
        let (_tx, mut rx) = watch::channel(false);
        let auth = engine
            .authorize(&request(Operation::Get), &remote(), &mut rx)
            .await;
        assert_eq!(auth, Authorization::Denied(DenyReason::PromptFailed));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_prompt_times_out() {
        let engine = engine(Arc::new(NeverAnswers));
        let (_tx, mut rx) = watch::channel(false);
        let auth = engine
            .authorize(&request(Operation::Get), &remote(), &mut rx)
            .await;
        assert_eq!(auth, Authorization::Denied(DenyReason::ConsentTimedOut));
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_prompt() {
        let engine = engine(Arc::new(NeverAnswers));
        let (tx, mut rx) = watch::channel(false);
        let req = request(Operation::Get);
        let ctx = remote();
        let pending = engine.authorize(&req, &ctx, &mut rx);
        let (auth, ()) = tokio::join!(pending, async {
            tokio::task::yield_now().await;
            tx.send(true).unwrap();
        });
        assert_eq!(auth, Authorization::Denied(DenyReason::ShuttingDown));
    }

    #[tokio::test]
    async fn no_prompt_after_shutdown() {
        let prompt = Arc::new(CountingPrompt {
            answer: true,
            calls: AtomicUsize::new(0),
        });
        let engine = engine(prompt.clone());
        let (_tx, mut rx) = watch::channel(true);
        let auth = engine
            .authorize(&request(Operation::Get), &remote(), &mut rx)
            .await;
        assert_eq!(auth, Authorization::Denied(DenyReason::ShuttingDown));
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn local_origin_skips_prompt() {
        let prompt = Arc::new(CountingPrompt {
            answer: false,
            calls: AtomicUsize::new(0),
        });
        let engine = engine(prompt.clone());
        let (_tx, mut rx) = watch::channel(false);
        let auth = engine
            .authorize(&request(Operation::Erase), &ConnectionContext::local(7), &mut rx)
            .await;
        assert_eq!(auth, Authorization::Allowed { prompted: false });
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 0);
    }
}
