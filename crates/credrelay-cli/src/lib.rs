//! Git credential relay remote client library.
//!
//! Runs on the remote host as a Git credential helper and forwards each
//! request over the forwarded Unix socket to the relay daemon.

pub mod client;
