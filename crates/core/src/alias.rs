//! Named handles, looked up later as `@name`

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::ClockHandle;
use crate::error::{Error, Result};
use crate::interceptor::{Handle, Spy, Stub};

/// Anything that can be registered under an alias
#[derive(Clone)]
pub enum Alias {
    Spy(Spy),
    Stub(Stub),
    Clock(ClockHandle),
}

impl Alias {
    /// The interception handle, for spies and stubs
    pub fn handle(&self) -> Option<&Handle> {
        match self {
            Alias::Spy(spy) => Some(spy.handle()),
            Alias::Stub(stub) => Some(stub.handle()),
            Alias::Clock(_) => None,
        }
    }
}

impl From<Spy> for Alias {
    fn from(spy: Spy) -> Self {
        Alias::Spy(spy)
    }
}

impl From<Stub> for Alias {
    fn from(stub: Stub) -> Self {
        Alias::Stub(stub)
    }
}

impl From<ClockHandle> for Alias {
    fn from(clock: ClockHandle) -> Self {
        Alias::Clock(clock)
    }
}

fn normalize(name: &str) -> &str {
    name.strip_prefix('@').unwrap_or(name)
}

/// Alias table scoped to one test
#[derive(Clone, Default)]
pub struct Aliases {
    entries: Arc<Mutex<HashMap<String, Alias>>>,
}

impl Aliases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `alias` under `name`; a later registration with the same name wins
    pub fn insert(&self, name: &str, alias: impl Into<Alias>) {
        self.entries.lock().insert(normalize(name).to_string(), alias.into());
    }

    pub fn get(&self, name: &str) -> Result<Alias> {
        let name = normalize(name);
        self.entries
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownAlias(name.to_string()))
    }

    pub fn handle(&self, name: &str) -> Result<Handle> {
        match self.get(name)? {
            Alias::Spy(spy) => Ok(spy.handle().clone()),
            Alias::Stub(stub) => Ok(stub.handle().clone()),
            Alias::Clock(_) => Err(Error::AliasKind {
                alias: normalize(name).to_string(),
                expected: "spy or stub",
            }),
        }
    }

    pub fn stub(&self, name: &str) -> Result<Stub> {
        match self.get(name)? {
            Alias::Stub(stub) => Ok(stub),
            _ => Err(Error::AliasKind {
                alias: normalize(name).to_string(),
                expected: "stub",
            }),
        }
    }

    pub fn clock(&self, name: &str) -> Result<ClockHandle> {
        match self.get(name)? {
            Alias::Clock(clock) => Ok(clock),
            _ => Err(Error::AliasKind {
                alias: normalize(name).to_string(),
                expected: "clock",
            }),
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
