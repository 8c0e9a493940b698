//! Line-oriented `key=value` codec for the credential relay protocol.
//!
//! The format is Git's own credential-helper format: one attribute per line,
//! terminated by a blank line. Relay requests additionally carry an
//! `op=<get|store|erase>` envelope line that is never forwarded to helpers.

mod encoder;
mod parser;
mod types;

use thiserror::Error;

pub use encoder::{encode_fields, encode_helper_input, encode_request, encode_response};
pub use parser::{MAX_REQUEST_BYTES, OP_KEY, decode, parse_helper_output, read_request};
pub use types::*;

/// Errors produced while decoding or encoding credential messages.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed line {line}: {reason}")]
    Malformed { line: usize, reason: &'static str },

    #[error("Unknown operation: {0:?}")]
    UnknownOperation(String),

    #[error("Request truncated before end of line")]
    Truncated,

    #[error("Request exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Line {line} is not valid UTF-8")]
    InvalidUtf8 { line: usize },

    #[error("Field cannot be encoded: {0}")]
    InvalidField(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Whether the error is a fault of the peer's input rather than of the
    /// local transport.
    pub const fn is_malformed_request(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::InvalidField(_))
    }
}
