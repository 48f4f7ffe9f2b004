//! Read-only predicates over recorded calls
//!
//! A [`Calls`] value is taken from the live recorder each time it is asked
//! for, so a poller that keeps re-querying always sees the calls made up to
//! that instant.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::recorder::{CallOutcome, CallRecord};

/// JSON type of an argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }
}

/// Positional argument matcher
#[derive(Debug, Clone)]
pub enum ArgMatcher {
    Eq(Value),
    Any,
    /// Matches string arguments against a pattern
    Regex(Regex),
    Kind(ValueKind),
}

impl ArgMatcher {
    pub fn regex(pattern: &str) -> std::result::Result<Self, regex::Error> {
        Ok(ArgMatcher::Regex(Regex::new(pattern)?))
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ArgMatcher::Eq(expected) => expected == value,
            ArgMatcher::Any => true,
            ArgMatcher::Regex(re) => value.as_str().map(|s| re.is_match(s)).unwrap_or(false),
            ArgMatcher::Kind(kind) => ValueKind::of(value) == *kind,
        }
    }
}

impl From<Value> for ArgMatcher {
    fn from(value: Value) -> Self {
        ArgMatcher::Eq(value)
    }
}

/// Snapshot of one member's calls, in call order
#[derive(Debug, Clone, Serialize)]
pub struct Calls {
    member: String,
    records: Vec<CallRecord>,
}

impl Calls {
    pub fn new(member: impl Into<String>, records: Vec<CallRecord>) -> Self {
        Self {
            member: member.into(),
            records,
        }
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn records(&self) -> &[CallRecord] {
        &self.records
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn called(&self) -> bool {
        !self.records.is_empty()
    }

    pub fn not_called(&self) -> bool {
        self.records.is_empty()
    }

    pub fn called_once(&self) -> bool {
        self.count() == 1
    }

    pub fn called_twice(&self) -> bool {
        self.count() == 2
    }

    pub fn called_thrice(&self) -> bool {
        self.count() == 3
    }

    pub fn called_times(&self, n: usize) -> bool {
        self.count() == n
    }

    pub fn call(&self, index: usize) -> Option<&CallRecord> {
        self.records.get(index)
    }

    pub fn first_call(&self) -> Option<&CallRecord> {
        self.records.first()
    }

    pub fn last_call(&self) -> Option<&CallRecord> {
        self.records.last()
    }

    pub fn args(&self, index: usize) -> Option<&[Value]> {
        self.records.get(index).map(|r| r.args.as_slice())
    }

    /// Some call started with these arguments (extra trailing arguments allowed)
    pub fn called_with(&self, expected: &[Value]) -> bool {
        self.records.iter().any(|r| prefix_eq(&r.args, expected))
    }

    /// Some call had exactly these arguments
    pub fn called_with_exactly(&self, expected: &[Value]) -> bool {
        self.records.iter().any(|r| r.args == expected)
    }

    /// Every call started with these arguments; false when never called
    pub fn always_called_with(&self, expected: &[Value]) -> bool {
        self.called() && self.records.iter().all(|r| prefix_eq(&r.args, expected))
    }

    pub fn never_called_with(&self, expected: &[Value]) -> bool {
        !self.called_with(expected)
    }

    pub fn called_with_matching(&self, matchers: &[ArgMatcher]) -> bool {
        self.records.iter().any(|r| {
            r.args.len() >= matchers.len()
                && matchers.iter().zip(&r.args).all(|(m, a)| m.matches(a))
        })
    }

    pub fn returned(&self, value: &Value) -> bool {
        self.records.iter().any(|r| r.return_value() == Some(value))
    }

    pub fn threw(&self) -> bool {
        self.records.iter().any(|r| r.thrown().is_some())
    }

    pub fn threw_value(&self, value: &Value) -> bool {
        self.records.iter().any(|r| r.thrown() == Some(value))
    }

    /// Some call threw an error-shaped value with this message
    pub fn threw_message(&self, message: &str) -> bool {
        self.records.iter().any(|r| match &r.outcome {
            CallOutcome::Threw(v) => {
                v.get("message").and_then(|m| m.as_str()) == Some(message)
                    || v.as_str() == Some(message)
            }
            _ => false,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_pending()).count()
    }

    /// First call here happened before the last call of `other`
    pub fn called_before(&self, other: &Calls) -> bool {
        match (self.records.first(), other.records.last()) {
            (Some(mine), Some(theirs)) => mine.seq < theirs.seq,
            _ => false,
        }
    }

    /// Last call here happened after the first call of `other`
    pub fn called_after(&self, other: &Calls) -> bool {
        match (self.records.last(), other.records.first()) {
            (Some(mine), Some(theirs)) => mine.seq > theirs.seq,
            _ => false,
        }
    }
}

fn prefix_eq(actual: &[Value], expected: &[Value]) -> bool {
    actual.len() >= expected.len() && actual.iter().zip(expected).all(|(a, e)| a == e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(seq: u64, args: Vec<Value>, outcome: CallOutcome) -> CallRecord {
        CallRecord {
            seq,
            member: "obj.foo".into(),
            args,
            outcome,
        }
    }

    fn sample() -> Calls {
        Calls::new(
            "obj.foo",
            vec![
                record(1, vec![json!("I am a"), json!("I am b")], CallOutcome::Returned(json!(1))),
                record(2, vec![json!("second")], CallOutcome::Threw(json!({"message": "nope"}))),
            ],
        )
    }

    #[test]
    fn test_counts() {
        let calls = sample();
        assert!(calls.called());
        assert!(calls.called_twice());
        assert!(!calls.called_once());
        assert!(calls.called_times(2));
        assert!(Calls::new("x", vec![]).not_called());
    }

    #[test]
    fn test_called_with_is_prefix_match() {
        let calls = sample();
        assert!(calls.called_with(&[json!("I am a")]));
        assert!(calls.called_with(&[json!("I am a"), json!("I am b")]));
        assert!(!calls.called_with_exactly(&[json!("I am a")]));
        assert!(calls.never_called_with(&[json!("third")]));
        assert!(!calls.always_called_with(&[json!("I am a")]));
    }

    #[test]
    fn test_matchers() {
        let calls = sample();
        let m = vec![ArgMatcher::regex("^I am").unwrap(), ArgMatcher::Kind(ValueKind::String)];
        assert!(calls.called_with_matching(&m));
        assert!(!calls.called_with_matching(&[ArgMatcher::Kind(ValueKind::Number)]));
        assert!(calls.called_with_matching(&[ArgMatcher::Any]));
    }

    #[test]
    fn test_outcomes() {
        let calls = sample();
        assert!(calls.returned(&json!(1)));
        assert!(calls.threw());
        assert!(calls.threw_message("nope"));
        assert_eq!(calls.pending_count(), 0);
    }

    #[test]
    fn test_ordering_between_members() {
        let a = Calls::new("a", vec![record(1, vec![], CallOutcome::Pending)]);
        let b = Calls::new("b", vec![record(5, vec![], CallOutcome::Pending)]);
        assert!(a.called_before(&b));
        assert!(b.called_after(&a));
        assert!(!b.called_before(&a));
    }
}
