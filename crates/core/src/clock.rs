//! Virtual clock: a deterministic stand-in for wall-clock time and timers
//!
//! Time only moves when test code advances it. Pending timers live in an
//! ordered queue keyed by `(fire_at, insertion order)`, so equal fire times
//! run first-in first-out.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::time::{TimeProvider, TimeSource, TimerCallback, TimerId};

/// A timer waiting to fire
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingTimer {
    pub id: TimerId,
    pub fire_at: i64,
    pub interval_ms: Option<u64>,
}

struct TimerEntry {
    id: TimerId,
    interval_ms: Option<u64>,
    callback: TimerCallback,
}

type QueueKey = (i64, u64);

/// Millisecond offset as a signed delta, saturating instead of wrapping
fn offset(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

struct Installation {
    source: TimeSource,
    previous: Arc<dyn TimeProvider>,
}

struct ClockState {
    now: i64,
    installation: Option<Installation>,
    next_id: u64,
    next_order: u64,
    queue: BTreeMap<QueueKey, TimerEntry>,
    index: HashMap<TimerId, QueueKey>,
    /// Bumped on every install and uninstall
    epoch: u64,
    running: Option<TimerId>,
    running_repeats: bool,
    running_cancelled: bool,
}

impl ClockState {
    fn insert(&mut self, fire_at: i64, entry: TimerEntry) {
        self.next_order += 1;
        let key = (fire_at, self.next_order);
        self.index.insert(entry.id, key);
        self.queue.insert(key, entry);
    }

    /// Remove the earliest entry, optionally only if it fires by `limit`
    fn pop_due(&mut self, limit: Option<i64>) -> Option<(i64, TimerEntry)> {
        let (&key, _) = self.queue.iter().next()?;
        if limit.is_some_and(|limit| key.0 > limit) {
            return None;
        }
        let entry = self.queue.remove(&key)?;
        self.index.remove(&entry.id);
        Some((key.0, entry))
    }
}

/// Deterministic clock. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct VirtualClock {
    state: Arc<Mutex<ClockState>>,
    loop_limit: usize,
}

impl VirtualClock {
    pub fn new(start_ms: i64) -> Self {
        Self::with_loop_limit(start_ms, 1000)
    }

    pub fn with_loop_limit(start_ms: i64, loop_limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                now: start_ms,
                installation: None,
                next_id: 0,
                next_order: 0,
                queue: BTreeMap::new(),
                index: HashMap::new(),
                epoch: 0,
                running: None,
                running_repeats: false,
                running_cancelled: false,
            })),
            loop_limit,
        }
    }

    /// Take over `source`: from now on it reads this clock and schedules
    /// onto this clock's queue.
    pub fn install(&self, source: &TimeSource) -> Result<()> {
        let mut state = self.state.lock();
        if state.installation.is_some() || source.is_virtual() {
            return Err(Error::AlreadyInstalled);
        }
        let previous = source.swap(Arc::new(self.clone()));
        state.epoch += 1;
        debug!(now_ms = state.now, "virtual clock installed");
        state.installation = Some(Installation {
            source: source.clone(),
            previous,
        });
        Ok(())
    }

    /// Give the source its previous provider back and drop pending timers
    /// without running them.
    pub fn uninstall(&self) -> Result<()> {
        let mut state = self.state.lock();
        let Some(installation) = state.installation.take() else {
            return Err(Error::stale("virtual clock"));
        };
        installation.source.swap(installation.previous);
        state.epoch += 1;
        let discarded = state.queue.len();
        state.queue.clear();
        state.index.clear();
        debug!(now_ms = state.now, discarded, "virtual clock uninstalled");
        Ok(())
    }

    pub fn is_installed(&self) -> bool {
        self.state.lock().installation.is_some()
    }

    pub fn now_ms(&self) -> i64 {
        self.state.lock().now
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_ms()).single().unwrap_or_default()
    }

    pub fn schedule(&self, delay_ms: u64, interval_ms: Option<u64>, callback: TimerCallback) -> TimerId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = TimerId(state.next_id);
        let fire_at = state.now.saturating_add(offset(delay_ms));
        trace!(%id, fire_at, ?interval_ms, "scheduled");
        state.insert(
            fire_at,
            TimerEntry {
                id,
                interval_ms,
                callback,
            },
        );
        id
    }

    pub fn set_timeout<F>(&self, delay_ms: u64, f: F) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule(delay_ms, None, Arc::new(f))
    }

    pub fn set_interval<F>(&self, interval_ms: u64, f: F) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule(interval_ms, Some(interval_ms), Arc::new(f))
    }

    /// Cancel a pending timer, or stop an interval from inside its own callback
    pub fn cancel(&self, id: TimerId) -> bool {
        let mut state = self.state.lock();
        if let Some(key) = state.index.remove(&id) {
            state.queue.remove(&key);
            return true;
        }
        if state.running == Some(id) && state.running_repeats && !state.running_cancelled {
            state.running_cancelled = true;
            return true;
        }
        false
    }

    fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Run one timer that has already been popped. No lock is held while the
    /// callback runs, so it may schedule, cancel or read time. An interval is
    /// not rescheduled when the callback installed or uninstalled the clock.
    fn fire(&self, fire_at: i64, entry: TimerEntry) {
        let epoch = {
            let mut state = self.state.lock();
            state.now = state.now.max(fire_at);
            state.running = Some(entry.id);
            state.running_repeats = entry.interval_ms.is_some();
            state.running_cancelled = false;
            state.epoch
        };
        trace!(id = %entry.id, fire_at, "firing");
        (entry.callback)();

        let mut state = self.state.lock();
        let cancelled = state.running_cancelled;
        state.running = None;
        state.running_repeats = false;
        state.running_cancelled = false;
        if state.epoch != epoch {
            debug!(id = %entry.id, "clock torn down by its own timer");
            return;
        }
        if let Some(interval) = entry.interval_ms {
            let next = fire_at.saturating_add(offset(interval.max(1)));
            // an interval pinned at the end of time would never let `advance` finish
            if !cancelled && next > fire_at {
                state.insert(next, entry);
            }
        }
    }

    /// Move time forward by `ms`, firing every timer that falls due on the
    /// way at its own fire time. Returns the number of timers fired. Stops
    /// early if a timer uninstalls the clock.
    pub fn advance(&self, ms: u64) -> usize {
        let target = self.now_ms().saturating_add(offset(ms));
        let epoch = self.epoch();
        let mut fired = 0;
        loop {
            let due = {
                let mut state = self.state.lock();
                if state.epoch != epoch {
                    break;
                }
                state.pop_due(Some(target))
            };
            match due {
                Some((fire_at, entry)) => {
                    self.fire(fire_at, entry);
                    fired += 1;
                }
                None => break,
            }
        }
        let mut state = self.state.lock();
        state.now = state.now.max(target);
        debug!(by_ms = ms, now_ms = state.now, fired, "advanced");
        fired
    }

    /// Jump to the next pending timer and fire it. Returns false when idle.
    pub fn next(&self) -> bool {
        self.fire_next(self.epoch())
    }

    /// Fire the earliest timer unless the clock was installed or uninstalled
    /// since `epoch`
    fn fire_next(&self, epoch: u64) -> bool {
        let due = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return false;
            }
            state.pop_due(None)
        };
        match due {
            Some((fire_at, entry)) => {
                self.fire(fire_at, entry);
                true
            }
            None => false,
        }
    }

    /// Fire timers until none are left. Intervals never run dry, so this
    /// stops with `TimerLoop` after the configured number of timers.
    pub fn run_all(&self) -> Result<usize> {
        let epoch = self.epoch();
        let mut fired = 0;
        while self.pending_count() > 0 {
            if fired >= self.loop_limit {
                return Err(Error::TimerLoop {
                    limit: self.loop_limit,
                });
            }
            if !self.fire_next(epoch) {
                break;
            }
            fired += 1;
        }
        Ok(fired)
    }

    /// Change "now" without firing anything. Pending timers keep their
    /// remaining delay.
    pub fn set_system_time(&self, now_ms: i64) {
        let mut state = self.state.lock();
        let delta = now_ms - state.now;
        state.now = now_ms;
        if delta == 0 {
            return;
        }
        let queue = std::mem::take(&mut state.queue);
        state.index.clear();
        for ((fire_at, order), entry) in queue {
            let key = (fire_at + delta, order);
            state.index.insert(entry.id, key);
            state.queue.insert(key, entry);
        }
    }

    pub fn pending(&self) -> Vec<PendingTimer> {
        let state = self.state.lock();
        state
            .queue
            .iter()
            .map(|(&(fire_at, _), entry)| PendingTimer {
                id: entry.id,
                fire_at,
                interval_ms: entry.interval_ms,
            })
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl TimeProvider for VirtualClock {
    fn now_ms(&self) -> i64 {
        VirtualClock::now_ms(self)
    }

    fn schedule(&self, delay_ms: u64, interval_ms: Option<u64>, callback: TimerCallback) -> TimerId {
        VirtualClock::schedule(self, delay_ms, interval_ms, callback)
    }

    fn cancel(&self, id: TimerId) -> bool {
        VirtualClock::cancel(self, id)
    }

    fn is_virtual(&self) -> bool {
        true
    }
}

/// Handle to an installed clock, as returned by `Sandbox::clock`.
/// Every operation fails with `StaleHandle` once the clock is restored,
/// except `restore` itself which becomes a no-op.
#[derive(Clone)]
pub struct ClockHandle {
    clock: VirtualClock,
}

impl ClockHandle {
    pub(crate) fn new(clock: VirtualClock) -> Self {
        Self { clock }
    }

    fn live(&self) -> Result<&VirtualClock> {
        if self.clock.is_installed() {
            Ok(&self.clock)
        } else {
            Err(Error::stale("clock"))
        }
    }

    pub fn is_restored(&self) -> bool {
        !self.clock.is_installed()
    }

    pub fn now_ms(&self) -> Result<i64> {
        Ok(self.live()?.now_ms())
    }

    pub fn now(&self) -> Result<DateTime<Utc>> {
        Ok(self.live()?.now())
    }

    /// Advance virtual time, firing due timers. Returns how many fired.
    pub fn tick(&self, ms: u64) -> Result<usize> {
        Ok(self.live()?.advance(ms))
    }

    pub fn next(&self) -> Result<bool> {
        Ok(self.live()?.next())
    }

    pub fn run_all(&self) -> Result<usize> {
        self.live()?.run_all()
    }

    pub fn set_system_time(&self, now_ms: i64) -> Result<()> {
        self.live()?.set_system_time(now_ms);
        Ok(())
    }

    pub fn pending(&self) -> Result<Vec<PendingTimer>> {
        Ok(self.live()?.pending())
    }

    pub fn restore(&self) -> Result<()> {
        if self.clock.is_installed() {
            self.clock.uninstall()
        } else {
            Ok(())
        }
    }
}
