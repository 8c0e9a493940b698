//! git-credential-relay core library
//!
//! Shared functionality for the relay daemon and the remote client:
//! - Codec for Git's `key=value` credential format plus the relay envelope
//! - Configuration loading and defaults
//! - Tracing initialisation
//! - Common error types

pub mod codec;
pub mod config;
pub mod error;
pub mod tracing_init;

pub use codec::{CodecError, CredentialRequest, CredentialResponse, Fields, Operation};
pub use config::Config;
pub use error::{Error, Result};
