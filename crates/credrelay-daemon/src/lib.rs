//! Git credential relay daemon library.
//!
//! Core functionality for the relay daemon:
//! - Unix socket listener with stale-socket recovery
//! - Per-connection request/response sessions
//! - Policy engine with interactive consent
//! - Bridge to the local Git credential helper

pub mod helper;
pub mod peer;
pub mod policy;
pub mod server;
pub mod shutdown;
