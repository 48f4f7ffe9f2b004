//! Injectable time: the provider trait, the real-time provider and the
//! swappable ambient slot application code reads time through

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Callback run when a timer fires
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Identifier returned by scheduling calls, used for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Source of "now" and of delayed / repeating callbacks
pub trait TimeProvider: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> i64;

    /// Run `callback` after `delay_ms`, then every `interval_ms` if given
    fn schedule(&self, delay_ms: u64, interval_ms: Option<u64>, callback: TimerCallback) -> TimerId;

    /// Cancel a pending timer. Unknown or already-fired ids return false.
    fn cancel(&self, id: TimerId) -> bool;

    /// Whether time only moves when test code says so
    fn is_virtual(&self) -> bool {
        false
    }
}

/// Wall-clock time with timers driven by the Tokio runtime
#[derive(Clone, Default)]
pub struct SystemTime {
    next_id: Arc<AtomicU64>,
    timers: Arc<Mutex<HashMap<TimerId, JoinHandle<()>>>>,
}

impl SystemTime {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeProvider for SystemTime {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Must be called from within a Tokio runtime; outside one the timer is
    /// dropped with a warning.
    fn schedule(&self, delay_ms: u64, interval_ms: Option<u64>, callback: TimerCallback) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(%id, "no Tokio runtime; timer will never fire");
            return id;
        };

        let timers = self.timers.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            trace!(%id, "system timer fired");
            callback();
            match interval_ms {
                Some(every) => {
                    let every = Duration::from_millis(every.max(1));
                    let mut ticker =
                        tokio::time::interval_at(tokio::time::Instant::now() + every, every);
                    loop {
                        ticker.tick().await;
                        callback();
                    }
                }
                None => {
                    timers.lock().remove(&id);
                }
            }
        });
        self.timers.lock().insert(id, task);
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        match self.timers.lock().remove(&id) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

/// The ambient time slot. Application code holds a clone and reads time or
/// schedules work through it; a virtual clock swaps the provider underneath.
#[derive(Clone)]
pub struct TimeSource {
    provider: Arc<RwLock<Arc<dyn TimeProvider>>>,
}

impl TimeSource {
    pub fn new(provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            provider: Arc::new(RwLock::new(provider)),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemTime::new()))
    }

    /// The lock is released before the provider is used, so callbacks may
    /// read time or schedule through this source.
    fn current(&self) -> Arc<dyn TimeProvider> {
        self.provider.read().clone()
    }

    /// Replace the provider, returning the previous one
    pub(crate) fn swap(&self, provider: Arc<dyn TimeProvider>) -> Arc<dyn TimeProvider> {
        std::mem::replace(&mut *self.provider.write(), provider)
    }

    pub fn is_virtual(&self) -> bool {
        self.current().is_virtual()
    }

    pub fn now_ms(&self) -> i64 {
        self.current().now_ms()
    }

    pub fn now(&self) -> DateTime<Utc> {
        let ms = self.now_ms();
        Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
    }

    /// Whole seconds since the epoch, rounded down
    pub fn unix_seconds(&self) -> i64 {
        self.now_ms().div_euclid(1000)
    }

    pub fn set_timeout<F>(&self, delay_ms: u64, f: F) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.current().schedule(delay_ms, None, Arc::new(f))
    }

    pub fn set_interval<F>(&self, interval_ms: u64, f: F) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.current().schedule(interval_ms, Some(interval_ms), Arc::new(f))
    }

    pub fn schedule(&self, delay_ms: u64, interval_ms: Option<u64>, callback: TimerCallback) -> TimerId {
        self.current().schedule(delay_ms, interval_ms, callback)
    }

    pub fn clear(&self, id: TimerId) -> bool {
        self.current().cancel(id)
    }
}

impl Default for TimeSource {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_system_time_is_close_to_chrono() {
        let source = TimeSource::system();
        let delta = (source.now_ms() - Utc::now().timestamp_millis()).abs();
        assert!(delta < 1000);
        assert!(!source.is_virtual());
    }

    #[tokio::test]
    async fn test_system_timeout_fires() {
        let source = TimeSource::system();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        source.set_timeout(5, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_system_cancel_prevents_fire() {
        let source = TimeSource::system();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let id = source.set_timeout(50, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(source.clear(id));
        assert!(!source.clear(id));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
