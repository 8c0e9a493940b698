//! Bridge to the local credential helper.
//!
//! Only reached after the policy engine allowed a request. One invocation per
//! request, no retries: Git already retries credential lookups itself.

mod process;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use credrelay_core::{CodecError, CredentialResponse, Fields, Operation};

pub use process::ProcessHelper;

/// Helper invocation errors.
#[derive(Debug, Error)]
pub enum HelperError {
    #[error("Credential helper {program:?} could not be started: {source}")]
    Unavailable {
        program: String,
        source: std::io::Error,
    },

    /// Non-zero exit. The parsed output is kept for diagnostics.
    #[error("Credential helper exited with status {status}")]
    Failed {
        status: i32,
        response: CredentialResponse,
    },

    #[error("Credential helper did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Credential helper input rejected: {0}")]
    Encode(#[from] CodecError),

    #[error("I/O error talking to credential helper: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that can answer a credential operation.
#[async_trait]
pub trait CredentialHelper: Send + Sync {
    async fn invoke(
        &self,
        operation: Operation,
        fields: &Fields,
    ) -> Result<CredentialResponse, HelperError>;
}
