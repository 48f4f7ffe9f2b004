//! Replacement policies deciding what a stubbed call does

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::member::Member;

/// Behaviour of a stub for calls that have no per-call override
#[derive(Clone)]
pub enum Policy {
    /// Invoke whatever the stub replaced
    PassThrough,
    FixedReturn(Value),
    FixedThrow(Value),
    /// Invoke a substitute with the same arguments
    Delegate(Member),
    /// n-th value on the n-th call since configuration; the last value repeats
    SequencedReturns { values: Vec<Value>, cursor: usize },
}

impl Policy {
    pub fn sequence(values: Vec<Value>) -> Self {
        Policy::SequencedReturns { values, cursor: 0 }
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::PassThrough => write!(f, "PassThrough"),
            Policy::FixedReturn(v) => write!(f, "FixedReturn({})", v),
            Policy::FixedThrow(v) => write!(f, "FixedThrow({})", v),
            Policy::Delegate(m) => write!(f, "Delegate({:?})", m),
            Policy::SequencedReturns { values, cursor } => {
                write!(f, "SequencedReturns({} values, at {})", values.len(), cursor)
            }
        }
    }
}

/// What the interceptor should do for one call
#[derive(Debug)]
pub(crate) enum Decision {
    CallOriginal,
    Call(Member),
    Return(Value),
    Throw(Value),
}

/// Mutable stub configuration: a default policy plus per-call overrides
#[derive(Debug)]
pub(crate) struct StubBehavior {
    default: Policy,
    on_call: BTreeMap<usize, Policy>,
    calls: usize,
}

impl StubBehavior {
    pub(crate) fn new(default: Policy) -> Self {
        Self {
            default,
            on_call: BTreeMap::new(),
            calls: 0,
        }
    }

    pub(crate) fn set_default(&mut self, policy: Policy) {
        self.default = policy;
    }

    /// Override the outcome of the call with this zero-based index
    pub(crate) fn set_on_call(&mut self, index: usize, policy: Policy) {
        self.on_call.insert(index, policy);
    }

    /// Restart call numbering and rewind every sequence
    pub(crate) fn reset_calls(&mut self) {
        self.calls = 0;
        for policy in std::iter::once(&mut self.default).chain(self.on_call.values_mut()) {
            if let Policy::SequencedReturns { cursor, .. } = policy {
                *cursor = 0;
            }
        }
    }

    pub(crate) fn decide(&mut self) -> Decision {
        let index = self.calls;
        self.calls += 1;
        match self.on_call.get_mut(&index) {
            Some(policy) => apply(policy),
            None => apply(&mut self.default),
        }
    }
}

fn apply(policy: &mut Policy) -> Decision {
    match policy {
        Policy::PassThrough => Decision::CallOriginal,
        Policy::FixedReturn(v) => Decision::Return(v.clone()),
        Policy::FixedThrow(v) => Decision::Throw(v.clone()),
        Policy::Delegate(m) => Decision::Call(m.clone()),
        Policy::SequencedReturns { values, cursor } => {
            let value = values
                .get(*cursor)
                .or_else(|| values.last())
                .cloned()
                .unwrap_or(Value::Null);
            if *cursor < values.len() {
                *cursor += 1;
            }
            Decision::Return(value)
        }
    }
}
