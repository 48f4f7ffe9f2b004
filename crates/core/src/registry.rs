//! Restoration registry: every live interception, in installation order
//!
//! Interceptions on the same member form a chain. The target holds the top
//! wrapper; each wrapper's link points at whatever it replaced. Disposing the
//! top writes its saved member back to the target. Disposing a lower handle
//! splices it out by handing its saved member to the handle above.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::MissingMember;
use crate::error::{Error, Result, RestoreFailure};
use crate::interceptor::{build_wrapper, check_substitute, Handle, Link, SharedBehavior, Spy, Stub};
use crate::member::Member;
use crate::policy::{Policy, StubBehavior};
use crate::recorder::Recorder;
use crate::target::Target;

type ChainKey = (usize, String);

struct Installed {
    target: Arc<dyn Target>,
    name: String,
    qualified: String,
    link: Link,
    wrapper: Member,
    recorder: Recorder,
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    order: Vec<u64>,
    entries: HashMap<u64, Installed>,
    chains: HashMap<ChainKey, Vec<u64>>,
}

/// Tracks active interceptions so they can be undone together
#[derive(Clone, Default)]
pub struct Registry {
    state: Arc<Mutex<RegistryState>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `name` on `target` in a spy
    pub fn spy(&self, target: Arc<dyn Target>, name: &str) -> Result<Spy> {
        let handle = self.install(target, name, None, MissingMember::Reject)?;
        Ok(Spy::new(handle))
    }

    /// Wrap `name` on `target` in a stub. Without a substitute the stub
    /// passes calls through until reconfigured.
    pub fn stub(
        &self,
        target: Arc<dyn Target>,
        name: &str,
        substitute: Option<Member>,
        missing: MissingMember,
    ) -> Result<Stub> {
        let asynchronous = target.get(name).is_some_and(|member| member.is_async());
        let policy = match substitute {
            Some(member) => {
                check_substitute(&format!("{}.{}", target.label(), name), asynchronous, &member)?;
                Policy::Delegate(member)
            }
            None => Policy::PassThrough,
        };
        let behavior = Arc::new(Mutex::new(StubBehavior::new(policy)));
        let handle = self.install(target, name, Some(behavior.clone()), missing)?;
        Ok(Stub::new(handle, behavior, asynchronous))
    }

    fn install(
        &self,
        target: Arc<dyn Target>,
        name: &str,
        behavior: Option<SharedBehavior>,
        missing: MissingMember,
    ) -> Result<Handle> {
        let qualified = format!("{}.{}", target.label(), name);
        let current = target.get(name);

        let asynchronous = match &current {
            Some(member) if member.is_callable() => member.is_async(),
            None if behavior.is_some() && missing == MissingMember::Create => {
                debug!(member = %qualified, "creating stubbed member");
                false
            }
            _ => return Err(Error::NotCallable { member: qualified }),
        };

        let link: Link = Arc::new(Mutex::new(current));
        let recorder = Recorder::new(qualified.clone());
        let kind = if behavior.is_some() { "stub" } else { "spy" };
        let wrapper = build_wrapper(&qualified, link.clone(), recorder.clone(), behavior, asynchronous);

        let mut state = self.state.lock();
        target
            .set(name, wrapper.clone())
            .map_err(|reason| Error::Target {
                member: qualified.clone(),
                reason,
            })?;

        state.next_id += 1;
        let id = state.next_id;
        let key = (target.identity(), name.to_string());
        let chain = state.chains.entry(key).or_default();
        chain.push(id);
        debug!(member = %qualified, id, kind, depth = chain.len(), "installed");

        state.order.push(id);
        state.entries.insert(
            id,
            Installed {
                target,
                name: name.to_string(),
                qualified: qualified.clone(),
                link,
                wrapper,
                recorder: recorder.clone(),
            },
        );
        drop(state);

        Ok(Handle::new(id, qualified, recorder, self.clone()))
    }

    /// Restore one handle. Unknown or already-disposed ids are a no-op.
    /// The handle is forgotten even when writing the target fails.
    pub fn dispose(&self, id: u64) -> std::result::Result<(), RestoreFailure> {
        let mut state = self.state.lock();
        Self::dispose_locked(&mut state, id)
    }

    fn dispose_locked(state: &mut RegistryState, id: u64) -> std::result::Result<(), RestoreFailure> {
        let Some(entry) = state.entries.remove(&id) else {
            return Ok(());
        };
        state.order.retain(|other| *other != id);
        entry.recorder.dispose();

        let key = (entry.target.identity(), entry.name.clone());
        let chain = state.chains.remove(&key).unwrap_or_default();
        let position = chain.iter().position(|other| *other == id);
        let saved = entry.link.lock().clone();

        let mut remaining = chain;
        let result = match position {
            Some(pos) if pos + 1 < remaining.len() => {
                let above = remaining[pos + 1];
                if let Some(upper) = state.entries.get(&above) {
                    *upper.link.lock() = saved;
                }
                debug!(member = %entry.qualified, id, "spliced out of interception chain");
                Ok(())
            }
            _ => Self::write_back(&entry, saved),
        };

        if let Some(pos) = position {
            remaining.remove(pos);
        }
        if !remaining.is_empty() {
            state.chains.insert(key, remaining);
        }
        result
    }

    fn write_back(entry: &Installed, saved: Option<Member>) -> std::result::Result<(), RestoreFailure> {
        match entry.target.get(&entry.name) {
            Some(current) if current.same(&entry.wrapper) => {}
            _ => warn!(member = %entry.qualified, "member was replaced out-of-band; restoring anyway"),
        }

        let written = match saved {
            Some(original) => entry.target.set(&entry.name, original),
            None => entry.target.remove(&entry.name),
        };
        match written {
            Ok(()) => {
                debug!(member = %entry.qualified, "restored");
                Ok(())
            }
            Err(reason) => {
                warn!(member = %entry.qualified, %reason, "restore failed");
                Err(RestoreFailure {
                    member: entry.qualified.clone(),
                    reason,
                })
            }
        }
    }

    /// Restore everything in reverse installation order and clear the
    /// registry. Failures are collected, never short-circuited.
    pub fn restore_all(&self) -> Result<()> {
        let mut state = self.state.lock();
        let ids: Vec<u64> = state.order.iter().rev().copied().collect();
        if !ids.is_empty() {
            debug!(count = ids.len(), "restoring all interceptions");
        }

        let failures: Vec<RestoreFailure> = ids
            .into_iter()
            .filter_map(|id| Self::dispose_locked(&mut state, id).err())
            .collect();

        state.order.clear();
        state.entries.clear();
        state.chains.clear();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::RestorationFailure(failures))
        }
    }

    /// Number of active interceptions
    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Qualified member names of active interceptions, in installation order
    pub fn active_members(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.entries.get(id).map(|e| e.qualified.clone()))
            .collect()
    }
}
