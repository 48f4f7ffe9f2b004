//! Per-test scope owning interceptions, aliases and the virtual clock

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::alias::{Alias, Aliases};
use crate::clock::{ClockHandle, VirtualClock};
use crate::config::DecoyConfig;
use crate::error::{Error, Result};
use crate::interceptor::{Spy, Stub};
use crate::member::{CallResult, Member};
use crate::registry::Registry;
use crate::target::Target;
use crate::time::TimeSource;

/// Lifecycle hooks a test runner drives around each test
pub trait ScopeListener {
    fn test_started(&self, name: &str);

    fn test_finished(&self, name: &str) -> Result<()>;
}

/// Everything one test installs, undone together at the end of the test
pub struct Sandbox {
    config: DecoyConfig,
    registry: Registry,
    aliases: Aliases,
    time: TimeSource,
    clock: Mutex<Option<ClockHandle>>,
}

impl Sandbox {
    pub fn new() -> Self {
        Self::with_config(DecoyConfig::default())
    }

    pub fn with_config(config: DecoyConfig) -> Self {
        Self::with_time_source(config, TimeSource::system())
    }

    /// Use an existing ambient time source; `clock` takes it over
    pub fn with_time_source(config: DecoyConfig, time: TimeSource) -> Self {
        Self {
            config,
            registry: Registry::new(),
            aliases: Aliases::new(),
            time,
            clock: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DecoyConfig {
        &self.config
    }

    /// The ambient time source application code should read time through
    pub fn time(&self) -> &TimeSource {
        &self.time
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn aliases(&self) -> &Aliases {
        &self.aliases
    }

    pub fn spy<T: Target + Clone + 'static>(&self, target: &T, name: &str) -> Result<Spy> {
        self.registry.spy(Arc::new(target.clone()), name)
    }

    /// Stub that passes through to the original until reconfigured
    pub fn stub<T: Target + Clone + 'static>(&self, target: &T, name: &str) -> Result<Stub> {
        self.stub_on(Arc::new(target.clone()), name, None)
    }

    /// Stub that answers every call with `f`
    pub fn stub_with<T, F>(&self, target: &T, name: &str, f: F) -> Result<Stub>
    where
        T: Target + Clone + 'static,
        F: Fn(&[Value]) -> CallResult + Send + Sync + 'static,
    {
        self.stub_on(Arc::new(target.clone()), name, Some(Member::method(f)))
    }

    pub fn stub_on(&self, target: Arc<dyn Target>, name: &str, substitute: Option<Member>) -> Result<Stub> {
        self.registry
            .stub(target, name, substitute, self.config.interception.missing_member)
    }

    /// Install a virtual clock on this sandbox's time source, starting at
    /// `start_ms` (the epoch when omitted)
    pub fn clock(&self, start_ms: Option<i64>) -> Result<ClockHandle> {
        let mut slot = self.clock.lock();
        if slot.as_ref().is_some_and(|c| !c.is_restored()) {
            return Err(Error::AlreadyInstalled);
        }
        let clock = VirtualClock::with_loop_limit(start_ms.unwrap_or(0), self.config.clock.loop_limit);
        clock.install(&self.time)?;
        let handle = ClockHandle::new(clock);
        *slot = Some(handle.clone());
        Ok(handle)
    }

    pub fn clock_at(&self, start: DateTime<Utc>) -> Result<ClockHandle> {
        self.clock(Some(start.timestamp_millis()))
    }

    /// The installed clock, if any
    pub fn current_clock(&self) -> Option<ClockHandle> {
        self.clock.lock().clone().filter(|c| !c.is_restored())
    }

    /// Register under `@name`
    pub fn alias(&self, name: &str, alias: impl Into<Alias>) {
        self.aliases.insert(name, alias);
    }

    pub fn get(&self, name: &str) -> Result<Alias> {
        self.aliases.get(name)
    }

    /// Restore every interception, then uninstall the clock. Interception
    /// failures are reported after the clock is torn down.
    pub fn restore_all(&self) -> Result<()> {
        let restored = self.registry.restore_all();
        if let Some(clock) = self.clock.lock().take() {
            clock.restore()?;
        }
        restored
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeListener for Sandbox {
    fn test_started(&self, name: &str) {
        debug!(test = name, "scope started");
        if !self.registry.is_empty() || self.current_clock().is_some() {
            warn!(test = name, "previous scope left interceptions behind; restoring");
            if let Err(e) = self.restore_all() {
                warn!(test = name, error = %e, "cleanup before test failed");
            }
        }
    }

    fn test_finished(&self, name: &str) -> Result<()> {
        debug!(test = name, active = self.registry.len(), "scope finished");
        self.aliases.clear();
        self.restore_all()
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if let Err(e) = self.restore_all() {
            warn!(error = %e, "restore on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MissingMember;
    use crate::error::Thrown;
    use crate::target::Object;
    use chrono::TimeZone;
    use serde_json::json;

    fn obj() -> Object {
        Object::new("obj").with_method("foo", |_| Ok(Value::Null))
    }

    #[test]
    fn test_spy_wraps_methods() {
        let sandbox = Sandbox::new();
        let obj = obj();
        let person = Object::new("person")
            .with_method("getName", |_| Ok(json!("n")))
            .with_method("getAge", |_| Ok(json!(3)));

        let spy_foo = sandbox.spy(&obj, "foo").unwrap();
        let spy_name = sandbox.spy(&person, "getName").unwrap();
        let spy_age = sandbox.spy(&person, "getAge").unwrap();
        sandbox.alias("foo", spy_foo.clone());

        obj.call("foo", vec![]).unwrap();
        person.call("getName", vec![]).unwrap();
        person.call("getAge", vec![]).unwrap();

        assert!(spy_foo.called().unwrap());
        assert!(spy_name.called().unwrap());
        assert!(spy_age.called().unwrap());
        assert!(sandbox.aliases().handle("@foo").unwrap().called_once().unwrap());
    }

    #[test]
    fn test_spy_sees_calls_made_by_timers() {
        let sandbox = Sandbox::new();
        let clock = sandbox.clock(Some(0)).unwrap();
        let obj = obj();
        let spy = sandbox.spy(&obj, "foo").unwrap();

        let (first, second) = (obj.clone(), obj.clone());
        sandbox.time().set_timeout(500, move || {
            let _ = first.call("foo", vec![json!("first")]);
        });
        sandbox.time().set_timeout(2500, move || {
            let _ = second.call("foo", vec![json!("second")]);
        });

        clock.tick(1000).unwrap();
        assert!(spy.called_once().unwrap());
        clock.tick(2000).unwrap();
        assert!(spy.called_twice().unwrap());
        assert!(spy.called_with(&[json!("second")]).unwrap());
    }

    #[test]
    fn test_stub_replacer_function() {
        let sandbox = Sandbox::with_config(DecoyConfig::default());
        let win = Object::new("win").with_method("setLocationHref", |_| {
            Err(Thrown::error("Error", "navigation is not allowed in tests"))
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let stub = sandbox
            .stub_with(&win, "setLocationHref", move |args| {
                sink.lock().push(args[0].clone());
                Ok(Value::Null)
            })
            .unwrap();
        sandbox.alias("setLocationHref", stub);

        win.call("setLocationHref", vec![json!("tel:+1-555-0100")]).unwrap();

        assert_eq!(*seen.lock(), vec![json!("tel:+1-555-0100")]);
        let handle = sandbox.aliases().handle("setLocationHref").unwrap();
        assert!(handle.called_once().unwrap());
    }

    #[test]
    fn test_clock_controls_time_source() {
        let sandbox = Sandbox::new();
        let now = Utc.with_ymd_and_hms(2017, 3, 14, 0, 0, 0).unwrap();
        let clock = sandbox.clock_at(now).unwrap();

        assert_eq!(sandbox.time().unix_seconds(), 1_489_449_600);
        clock.tick(10_000).unwrap();
        assert_eq!(sandbox.time().unix_seconds(), 1_489_449_610);
        assert_eq!(sandbox.clock(None).err(), Some(Error::AlreadyInstalled));

        clock.restore().unwrap();
        assert!(!sandbox.time().is_virtual());
        assert!(sandbox.clock(None).is_ok());
    }

    #[test]
    fn test_finishing_scope_restores_everything() {
        let sandbox = Sandbox::new();
        let obj = obj();
        let original = obj.get("foo").unwrap();

        sandbox.test_started("first");
        let stub = sandbox.stub(&obj, "foo").unwrap();
        stub.returns(json!("stubbed")).unwrap();
        sandbox.alias("foo", stub.clone());
        sandbox.clock(Some(1)).unwrap();
        sandbox.test_finished("first").unwrap();

        assert!(obj.get("foo").unwrap().same(&original));
        assert!(!sandbox.time().is_virtual());
        assert!(matches!(sandbox.get("@foo"), Err(Error::UnknownAlias(_))));
        assert!(stub.is_restored());
        sandbox.test_finished("first").unwrap();
    }

    #[test]
    fn test_drop_restores() {
        let obj = obj();
        let original = obj.get("foo").unwrap();
        {
            let sandbox = Sandbox::new();
            sandbox.spy(&obj, "foo").unwrap();
            assert!(!obj.get("foo").unwrap().same(&original));
        }
        assert!(obj.get("foo").unwrap().same(&original));
    }

    #[test]
    fn test_missing_member_policy_from_config() {
        let mut config = DecoyConfig::default();
        config.interception.missing_member = MissingMember::Create;
        let sandbox = Sandbox::with_config(config);
        let win = Object::new("win");

        let stub = sandbox.stub(&win, "setLocationHref").unwrap();
        stub.returns(json!(true)).unwrap();
        assert_eq!(win.call("setLocationHref", vec![]).unwrap(), json!(true));

        sandbox.restore_all().unwrap();
        assert!(win.get("setLocationHref").is_none());
    }

    #[test]
    fn test_alias_kinds() {
        let sandbox = Sandbox::new();
        let clock = sandbox.clock(None).unwrap();
        sandbox.alias("@clock", clock);

        assert!(sandbox.aliases().clock("clock").is_ok());
        assert!(matches!(
            sandbox.aliases().handle("clock"),
            Err(Error::AliasKind { expected: "spy or stub", .. })
        ));
        assert!(matches!(sandbox.get("nothing"), Err(Error::UnknownAlias(name)) if name == "nothing"));
        assert_eq!(sandbox.aliases().names(), vec!["clock"]);
    }

    #[test]
    fn test_sequenced_stub_via_sandbox() {
        let sandbox = Sandbox::new();
        let obj = obj();
        let stub = sandbox.stub(&obj, "foo").unwrap();
        stub.on_first_call()
            .returns(json!("first"))
            .unwrap()
            .returns(json!("default"))
            .unwrap();

        assert_eq!(obj.call("foo", vec![]).unwrap(), json!("first"));
        assert_eq!(obj.call("foo", vec![]).unwrap(), json!("default"));

        stub.reset().unwrap();
        assert_eq!(obj.call("foo", vec![]).unwrap(), json!("first"));
        assert!(stub.called_once().unwrap());
    }
}
