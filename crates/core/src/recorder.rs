//! Append-only call log for one intercepted member

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::error::{Error, Result};
use crate::member::CallResult;

/// Process-wide call order, shared by every recorder so calls to different
/// members can be compared.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// How a recorded call ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CallOutcome {
    Returned(Value),
    Threw(Value),
    /// Still running, or an asynchronous result that has not settled yet
    Pending,
}

impl From<&CallResult> for CallOutcome {
    fn from(result: &CallResult) -> Self {
        match result {
            Ok(value) => CallOutcome::Returned(value.clone()),
            Err(thrown) => CallOutcome::Threw(thrown.0.clone()),
        }
    }
}

/// One invocation of an intercepted member
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub seq: u64,
    pub member: String,
    pub args: Vec<Value>,
    pub outcome: CallOutcome,
}

impl CallRecord {
    pub fn return_value(&self) -> Option<&Value> {
        match &self.outcome {
            CallOutcome::Returned(v) => Some(v),
            _ => None,
        }
    }

    pub fn thrown(&self) -> Option<&Value> {
        match &self.outcome {
            CallOutcome::Threw(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.outcome == CallOutcome::Pending
    }
}

/// Call log bound to a single member
#[derive(Clone)]
pub struct Recorder {
    member: Arc<str>,
    state: Arc<Mutex<RecorderState>>,
}

#[derive(Default)]
struct RecorderState {
    records: Vec<CallRecord>,
    disposed: bool,
}

impl Recorder {
    pub fn new(member: impl Into<String>) -> Self {
        Self {
            member: Arc::from(member.into()),
            state: Arc::new(Mutex::new(RecorderState::default())),
        }
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    fn stale(&self) -> Error {
        Error::stale(format!("recorder for {}", self.member))
    }

    /// Open a record at call time. The outcome starts as pending and is
    /// filled in by [`Recorder::settle`].
    pub fn begin(&self, args: Vec<Value>) -> Result<u64> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(self.stale());
        }
        let seq = NEXT_SEQ.fetch_add(1, Ordering::SeqCst);
        trace!(member = %self.member, seq, "call");
        state.records.push(CallRecord {
            seq,
            member: self.member.to_string(),
            args,
            outcome: CallOutcome::Pending,
        });
        Ok(seq)
    }

    /// Fill in the outcome of a pending record. Settled records are never
    /// rewritten; a record dropped by `clear` is silently skipped.
    pub fn settle(&self, seq: u64, outcome: CallOutcome) -> Result<()> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(self.stale());
        }
        if let Some(record) = state.records.iter_mut().rev().find(|r| r.seq == seq) {
            if record.is_pending() {
                trace!(member = %self.member, seq, outcome = ?outcome, "settled");
                record.outcome = outcome;
            }
        }
        Ok(())
    }

    /// Append a call whose outcome is already known
    pub fn record(&self, args: Vec<Value>, outcome: CallOutcome) -> Result<CallRecord> {
        let seq = self.begin(args)?;
        self.settle(seq, outcome)?;
        let state = self.state.lock();
        state
            .records
            .iter()
            .rev()
            .find(|r| r.seq == seq)
            .cloned()
            .ok_or_else(|| self.stale())
    }

    /// Lazy view over the records in call order. The view reads live state
    /// on every step and can be restarted.
    pub fn query(&self) -> Result<CallLog> {
        if self.state.lock().disposed {
            return Err(self.stale());
        }
        Ok(CallLog {
            recorder: self.clone(),
            next: 0,
        })
    }

    pub fn snapshot(&self) -> Result<Vec<CallRecord>> {
        let state = self.state.lock();
        if state.disposed {
            return Err(self.stale());
        }
        Ok(state.records.clone())
    }

    pub fn len(&self) -> Result<usize> {
        let state = self.state.lock();
        if state.disposed {
            return Err(self.stale());
        }
        Ok(state.records.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Forget recorded calls without disposing the recorder
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(self.stale());
        }
        state.records.clear();
        Ok(())
    }

    /// Drop all records; every later operation fails with `StaleHandle`
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        state.disposed = true;
        state.records.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }
}

/// Restartable, lazily evaluated sequence of call records
#[derive(Clone)]
pub struct CallLog {
    recorder: Recorder,
    next: usize,
}

impl CallLog {
    /// Rewind to the first call
    pub fn restart(&mut self) {
        self.next = 0;
    }
}

impl Iterator for CallLog {
    type Item = CallRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let state = self.recorder.state.lock();
        if state.disposed {
            return None;
        }
        let record = state.records.get(self.next).cloned();
        if record.is_some() {
            self.next += 1;
        }
        record
    }
}
