//! Daemon shutdown signal.
//!
//! Shutdown is a `watch` channel flipped to `true` once. Every connection
//! holds a receiver so pending consent prompts can be cancelled.

use tokio::sync::watch;

/// Resolves once shutdown has been signalled.
///
/// If the sender is dropped without signalling, this never resolves.
pub async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stopping| *stopping).await.is_err() {
        std::future::pending::<()>().await;
    }
}
