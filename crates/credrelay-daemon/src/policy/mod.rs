//! Operation policy for relayed credential requests.
//!
//! Erase is refused outright for remote connections; get and store need the
//! local user's consent through an injected [`ConsentPrompt`].

mod consent;
mod engine;
mod types;

pub use consent::{ConsentError, ConsentPrompt, ConsentRequest, StaticPrompt, TerminalPrompt};
pub use engine::PolicyEngine;
pub use types::{Authorization, ConnectionContext, DenyReason, Origin, PolicyDecision};
