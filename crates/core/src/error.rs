//! Error types for Decoy

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias using Decoy Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the interception and clock machinery.
///
/// These never stand in for an error thrown by an intercepted member; those
/// travel as [`Thrown`] values through the wrapped call untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("{member} is not a callable member")]
    NotCallable { member: String },

    #[error("{member} is synchronous and cannot delegate to an asynchronous substitute")]
    AsyncSubstitute { member: String },

    #[error("Clock is already installed on this time source")]
    AlreadyInstalled,

    #[error("Stale handle: {what} has already been restored")]
    StaleHandle { what: String },

    #[error("Restoration failed for {} member(s): {}", .0.len(), join_failures(.0))]
    RestorationFailure(Vec<RestoreFailure>),

    #[error("Timer loop aborted after {limit} timers (possible uncleared interval)")]
    TimerLoop { limit: usize },

    #[error("Unknown alias: @{0}")]
    UnknownAlias(String),

    #[error("Alias @{alias} does not refer to a {expected}")]
    AliasKind { alias: String, expected: &'static str },

    #[error("Target refused write to {member}: {reason}")]
    Target { member: String, reason: String },
}

impl Error {
    pub(crate) fn stale(what: impl Into<String>) -> Self {
        Error::StaleHandle { what: what.into() }
    }
}

/// One member that could not be put back during restoration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreFailure {
    pub member: String,
    pub reason: String,
}

impl fmt::Display for RestoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.member, self.reason)
    }
}

fn join_failures(failures: &[RestoreFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A value thrown by a member implementation.
///
/// Host objects throw arbitrary values, so the payload is an opaque JSON value.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("thrown: {0}")]
pub struct Thrown(pub serde_json::Value);

impl Thrown {
    /// Build an `Error`-shaped payload with a name and message
    pub fn error(name: &str, message: impl Into<String>) -> Self {
        Thrown(serde_json::json!({ "name": name, "message": message.into() }))
    }

    /// The `message` field of an error-shaped payload, or the payload itself if it is a string
    pub fn message(&self) -> Option<&str> {
        match &self.0 {
            serde_json::Value::String(s) => Some(s),
            other => other.get("message").and_then(|m| m.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restoration_failure_lists_members() {
        let err = Error::RestorationFailure(vec![
            RestoreFailure { member: "obj.foo".into(), reason: "frozen".into() },
            RestoreFailure { member: "obj.bar".into(), reason: "frozen".into() },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("2 member(s)"));
        assert!(msg.contains("obj.foo (frozen)"));
        assert!(msg.contains("obj.bar (frozen)"));
    }

    #[test]
    fn test_thrown_message() {
        assert_eq!(Thrown::error("TypeError", "boom").message(), Some("boom"));
        assert_eq!(Thrown(serde_json::json!("plain")).message(), Some("plain"));
        assert_eq!(Thrown(serde_json::json!(42)).message(), None);
    }
}
