//! Relay socket client.
//!
//! Git must never hang or fail because the relay is away, so [`run`] turns
//! every failure into the empty response and lets Git fall through to its
//! other helpers.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, warn};

use credrelay_core::codec::{MAX_REQUEST_BYTES, encode_request, encode_response, parse_helper_output};
use credrelay_core::config::CLIENT_TIMEOUT_SECS;
use credrelay_core::{CodecError, CredentialRequest, CredentialResponse, Fields, Operation};

/// Socket path used when none is configured; matches the `ssh -R` hint the
/// daemon prints.
pub const DEFAULT_SOCKET: &str = "/tmp/git-credential-relay.sock";

/// Default bound on one relay round trip. Covers the user answering the
/// consent prompt on the other end.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(CLIENT_TIMEOUT_SECS);

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Cannot connect to relay socket {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Relay did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Relay response exceeds {0} bytes")]
    ResponseTooLarge(usize),

    #[error("Request cannot be encoded: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Send one request to the relay and return the fields it answered with.
pub async fn relay(
    socket: &Path,
    request: &CredentialRequest,
    timeout: Duration,
) -> Result<Fields, ClientError> {
    let bytes = encode_request(request)?;
    tokio::time::timeout(timeout, exchange(socket, &bytes))
        .await
        .map_err(|_| ClientError::Timeout(timeout))?
}

async fn exchange(socket: &Path, request: &[u8]) -> Result<Fields, ClientError> {
    let mut stream = UnixStream::connect(socket)
        .await
        .map_err(|source| ClientError::Connect {
            path: socket.to_path_buf(),
            source,
        })?;
    stream.write_all(request).await?;
    stream.flush().await?;

    let limit = MAX_REQUEST_BYTES as u64;
    let mut response = Vec::new();
    (&mut stream).take(limit + 1).read_to_end(&mut response).await?;
    if response.len() as u64 > limit {
        return Err(ClientError::ResponseTooLarge(MAX_REQUEST_BYTES));
    }
    Ok(parse_helper_output(&response))
}

/// Handle one helper invocation and return what to print on stdout.
///
/// Unknown operations produce no output at all. Everything else produces
/// a complete response, empty when the relay could not be used.
pub async fn run(operation: &str, input: &[u8], socket: &Path, timeout: Duration) -> Vec<u8> {
    let Ok(operation) = Operation::from_str(operation) else {
        debug!(operation, "Ignoring unsupported operation");
        return Vec::new();
    };

    let request = CredentialRequest::new(operation, parse_helper_output(input));
    let fields = match relay(socket, &request, timeout).await {
        Ok(fields) => fields,
        Err(e) => {
            warn!(op = %operation, error = %e, "Credential relay unavailable");
            Fields::new()
        }
    };

    encode_response(&CredentialResponse::new(fields, 0)).unwrap_or_else(|e| {
        warn!(error = %e, "Relay response cannot be re-encoded");
        b"\n".to_vec()
    })
}
