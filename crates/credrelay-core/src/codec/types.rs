//! Message types for the credential relay protocol.

use std::fmt;
use std::str::FromStr;

use super::CodecError;

/// Credential operation requested by the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Operation {
    /// Look up a credential.
    #[default]
    Get,
    /// Persist a credential that Git found to work.
    Store,
    /// Delete a credential that Git found to be rejected.
    Erase,
}

impl Operation {
    /// Wire name, as used in `op=<name>` and as a helper argument.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Store => "store",
            Self::Erase => "erase",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get" => Ok(Self::Get),
            "store" => Ok(Self::Store),
            "erase" => Ok(Self::Erase),
            other => Err(CodecError::UnknownOperation(other.to_string())),
        }
    }
}

/// Ordered `key=value` attributes with unique keys.
///
/// Inserting an existing key replaces its value in place, so the first
/// occurrence fixes the position and the last occurrence fixes the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    entries: Vec<(String, String)>,
}

impl Fields {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert or replace a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.entries.push((key, value));
        None
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Field names only, in order. Safe to log.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Self::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

/// A decoded request from the relay socket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialRequest {
    pub operation: Operation,
    pub fields: Fields,
}

impl CredentialRequest {
    pub const fn new(operation: Operation, fields: Fields) -> Self {
        Self { operation, fields }
    }

    /// Human-readable target, e.g. `https://alice@github.com/org/repo`.
    ///
    /// Built from `protocol`, `username`, `host` and `path`; never includes
    /// secret fields.
    pub fn target(&self) -> String {
        let protocol = self.fields.get("protocol").unwrap_or("?");
        let host = self.fields.get("host").unwrap_or("?");
        let mut target = format!("{protocol}://");
        if let Some(user) = self.fields.get("username").filter(|u| !u.is_empty()) {
            target.push_str(user);
            target.push('@');
        }
        target.push_str(host);
        if let Some(path) = self.fields.get("path").filter(|p| !p.is_empty()) {
            target.push('/');
            target.push_str(path.trim_start_matches('/'));
        }
        target
    }
}

/// A response written back over the relay socket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialResponse {
    pub fields: Fields,
    /// Exit status reported by the helper; `0` for synthesized responses.
    pub exit_status: i32,
}

impl CredentialResponse {
    /// The empty response: indistinguishable from "no credential found".
    pub const fn empty() -> Self {
        Self {
            fields: Fields::new(),
            exit_status: 0,
        }
    }

    pub const fn new(fields: Fields, exit_status: i32) -> Self {
        Self {
            fields,
            exit_status,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn operation_parses_known_names() {
        assert_eq!("get".parse::<Operation>().unwrap(), Operation::Get);
        assert_eq!("store".parse::<Operation>().unwrap(), Operation::Store);
        assert_eq!("erase".parse::<Operation>().unwrap(), Operation::Erase);
    }

    #[test]
    fn operation_rejects_unknown_and_case_variants() {
        assert!(matches!(
            "fill".parse::<Operation>(),
            Err(CodecError::UnknownOperation(op)) if op == "fill"
        ));
        assert!("GET".parse::<Operation>().is_err());
    }

    #[test]
    fn duplicate_key_keeps_first_position_and_last_value() {
        let mut fields = Fields::new();
        fields.insert("protocol", "https");
        fields.insert("host", "a.example");
        let prev = fields.insert("protocol", "ssh");
        assert_eq!(prev.as_deref(), Some("https"));
        assert_eq!(fields.keys(), vec!["protocol", "host"]);
        assert_eq!(fields.get("protocol"), Some("ssh"));
    }

    #[test]
    fn target_includes_user_and_path() {
        let req = CredentialRequest::new(
            Operation::Get,
            [
                ("protocol", "https"),
                ("host", "github.com"),
                ("username", "alice"),
                ("path", "org/repo.git"),
            ]
            .into_iter()
            .collect(),
        );
        assert_eq!(req.target(), "https://alice@github.com/org/repo.git");
    }

    #[test]
    fn target_with_missing_fields() {
        let req = CredentialRequest::default();
        assert_eq!(req.target(), "?://?");
    }

    #[test]
    fn target_never_contains_password() {
        let req = CredentialRequest::new(
            Operation::Store,
            [("protocol", "https"), ("host", "h"), ("password", "hunter2")]
                .into_iter()
                .collect(),
        );
        assert!(!req.target().contains("hunter2"));
    }
}
