//! Per-connection session: one request in, one response out.
//!
//! Reading → Deciding → (consent) → Invoking → Writing → Closed. Any failure
//! ends the session with the empty response, so a remote caller cannot tell
//! a denial from "no credential found". The log can.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use credrelay_core::codec::{encode_response, read_request};
use credrelay_core::{CredentialRequest, CredentialResponse};

use crate::helper::{CredentialHelper, HelperError};
use crate::policy::{Authorization, ConnectionContext, DenyReason, PolicyEngine};

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Helper ran and its output was written back.
    Served { exit_status: i32 },
    /// Policy or user refused.
    Denied(DenyReason),
    /// Bad, truncated, oversized or too-slow input.
    Malformed,
    /// Helper could not run or failed.
    HelperFailed,
    /// The connection broke.
    Io,
}

/// Drives one connection through the policy engine and the helper.
pub struct ConnectionHandler {
    policy: Arc<PolicyEngine>,
    helper: Arc<dyn CredentialHelper>,
    read_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(
        policy: Arc<PolicyEngine>,
        helper: Arc<dyn CredentialHelper>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            policy,
            helper,
            read_timeout,
        }
    }

    /// Serve exactly one request on `stream`, then close it.
    pub async fn handle<S>(
        &self,
        stream: S,
        ctx: ConnectionContext,
        mut shutdown: watch::Receiver<bool>,
    ) -> SessionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        let request = match tokio::time::timeout(self.read_timeout, read_request(&mut reader)).await
        {
            Ok(Ok(request)) => request,
            Ok(Err(e)) if e.is_malformed_request() => {
                warn!(conn = ctx.id, peer = %ctx.peer, error = %e, "Malformed request");
                return finish(&mut write_half, &ctx, SessionOutcome::Malformed, None).await;
            }
            Ok(Err(e)) => {
                warn!(conn = ctx.id, error = %e, "Failed to read request");
                return SessionOutcome::Io;
            }
            Err(_) => {
                warn!(conn = ctx.id, peer = %ctx.peer, timeout = ?self.read_timeout, "Request read timed out");
                return finish(&mut write_half, &ctx, SessionOutcome::Malformed, None).await;
            }
        };
        drop(reader);

        debug!(
            conn = ctx.id,
            op = %request.operation,
            fields = ?request.fields.keys(),
            "Request received"
        );

        let outcome = match self.policy.authorize(&request, &ctx, &mut shutdown).await {
            Authorization::Denied(reason) => {
                warn!(
                    conn = ctx.id,
                    op = %request.operation,
                    target_url = %request.target(),
                    peer = %ctx.peer,
                    %reason,
                    "Request denied"
                );
                return finish(&mut write_half, &ctx, SessionOutcome::Denied(reason), None).await;
            }
            Authorization::Allowed { prompted } => {
                debug!(conn = ctx.id, prompted, "Request allowed");
                self.invoke(&request, &ctx).await
            }
        };

        match outcome {
            Some(response) => {
                let outcome = SessionOutcome::Served {
                    exit_status: response.exit_status,
                };
                finish(&mut write_half, &ctx, outcome, Some(&response)).await
            }
            None => finish(&mut write_half, &ctx, SessionOutcome::HelperFailed, None).await,
        }
    }

    async fn invoke(
        &self,
        request: &CredentialRequest,
        ctx: &ConnectionContext,
    ) -> Option<CredentialResponse> {
        match self.helper.invoke(request.operation, &request.fields).await {
            Ok(response) => {
                info!(
                    conn = ctx.id,
                    op = %request.operation,
                    target_url = %request.target(),
                    returned = ?response.fields.keys(),
                    "Request served"
                );
                Some(response)
            }
            Err(HelperError::Failed { status, response }) => {
                warn!(
                    conn = ctx.id,
                    op = %request.operation,
                    target_url = %request.target(),
                    status,
                    returned = ?response.fields.keys(),
                    "Credential helper failed"
                );
                None
            }
            Err(e) => {
                error!(conn = ctx.id, op = %request.operation, error = %e, "Credential helper error");
                None
            }
        }
    }
}

/// Write the response (empty unless `response` is given) and close.
async fn finish<W>(
    writer: &mut W,
    ctx: &ConnectionContext,
    outcome: SessionOutcome,
    response: Option<&CredentialResponse>,
) -> SessionOutcome
where
    W: AsyncWrite + Unpin,
{
    let bytes = match response.map(encode_response).transpose() {
        Ok(Some(bytes)) => bytes,
        Ok(None) => b"\n".to_vec(),
        Err(e) => {
            error!(conn = ctx.id, error = %e, "Helper response not encodable");
            b"\n".to_vec()
        }
    };

    let written = async {
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        writer.shutdown().await
    };
    if let Err(e) = written.await {
        debug!(conn = ctx.id, error = %e, "Failed to write response");
        return SessionOutcome::Io;
    }
    outcome
}
