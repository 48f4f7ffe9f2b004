//! Wrappers that route member calls through a recorder, plus the spy and
//! stub handles returned to callers

use futures::future::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::ops::Deref;
use std::sync::Arc;
use tracing::warn;

use crate::error::{Error, Result, Thrown};
use crate::member::{CallResult, Invocation, Member};
use crate::policy::{Decision, Policy, StubBehavior};
use crate::query::Calls;
use crate::recorder::{CallOutcome, CallLog, Recorder};
use crate::registry::Registry;

/// What a wrapper delegates to. Shared so a lower handle can be spliced out
/// of a stack without touching the target.
pub(crate) type Link = Arc<Mutex<Option<Member>>>;

pub(crate) type SharedBehavior = Arc<Mutex<StubBehavior>>;

/// Everything a wrapper closure needs per call
#[derive(Clone)]
struct Route {
    member: String,
    link: Link,
    recorder: Recorder,
    behavior: Option<SharedBehavior>,
}

impl Route {
    /// Policy decision for a recorded call. A stranded wrapper (`seq` is
    /// `None`) always behaves like the member it replaced.
    fn decide(&self, seq: Option<u64>) -> Decision {
        if seq.is_none() {
            return Decision::CallOriginal;
        }
        match &self.behavior {
            Some(behavior) => behavior.lock().decide(),
            None => Decision::CallOriginal,
        }
    }

    /// Open a record, or `None` if the handle has been restored while
    /// something still holds the wrapper.
    fn begin(&self, args: &[Value]) -> Option<u64> {
        match self.recorder.begin(args.to_vec()) {
            Ok(seq) => Some(seq),
            Err(_) => {
                warn!(member = %self.member, "call through a restored wrapper; not recorded");
                None
            }
        }
    }

    fn invocation(&self, decision: Decision, args: Vec<Value>) -> Invocation {
        match decision {
            Decision::CallOriginal => {
                let original = self.link.lock().clone();
                match original {
                    Some(member) => member.invoke(&self.member, args),
                    None => Invocation::Ready(Ok(Value::Null)),
                }
            }
            Decision::Call(substitute) => substitute.invoke(&self.member, args),
            Decision::Return(value) => Invocation::Ready(Ok(value)),
            Decision::Throw(value) => Invocation::Ready(Err(Thrown(value))),
        }
    }

    fn finish(&self, seq: Option<u64>, result: &CallResult) {
        if let Some(seq) = seq {
            let _ = self.recorder.settle(seq, CallOutcome::from(result));
        }
    }
}

/// Build the replacement member. The wrapper keeps the calling convention of
/// what it replaces: async in, async out.
pub(crate) fn build_wrapper(
    member: &str,
    link: Link,
    recorder: Recorder,
    behavior: Option<SharedBehavior>,
    asynchronous: bool,
) -> Member {
    let route = Route {
        member: member.to_string(),
        link,
        recorder,
        behavior,
    };

    if asynchronous {
        Member::AsyncMethod(Arc::new(move |args: Vec<Value>| {
            let seq = route.begin(&args);
            let invocation = route.invocation(route.decide(seq), args);
            let route = route.clone();
            async move {
                let result = invocation.settle().await;
                route.finish(seq, &result);
                result
            }
            .boxed()
        }))
    } else {
        Member::Method(Arc::new(move |args: &[Value]| {
            let seq = route.begin(args);
            let result = match route.invocation(route.decide(seq), args.to_vec()) {
                Invocation::Ready(result) => result,
                Invocation::Pending(_) => Err(Thrown::error(
                    "TypeError",
                    format!("{} replaced a synchronous member with an asynchronous one", route.member),
                )),
            };
            route.finish(seq, &result);
            result
        }))
    }
}

/// Refuse an asynchronous substitute for a synchronous member
pub(crate) fn check_substitute(member: &str, asynchronous: bool, substitute: &Member) -> Result<()> {
    if substitute.is_async() && !asynchronous {
        return Err(Error::AsyncSubstitute {
            member: member.to_string(),
        });
    }
    Ok(())
}

/// Common part of a spy or stub: identity, recorder and query facade
#[derive(Clone)]
pub struct Handle {
    id: u64,
    member: String,
    recorder: Recorder,
    registry: Registry,
}

impl Handle {
    pub(crate) fn new(id: u64, member: String, recorder: Recorder, registry: Registry) -> Self {
        Self {
            id,
            member,
            recorder,
            registry,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Qualified member name, e.g. `person.getName`
    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn is_restored(&self) -> bool {
        self.recorder.is_disposed()
    }

    /// Put this member back. Restoring twice is a no-op.
    pub fn restore(&self) -> Result<()> {
        self.registry
            .dispose(self.id)
            .map_err(|failure| Error::RestorationFailure(vec![failure]))
    }

    /// Forget recorded calls, keep the interception in place
    pub fn reset_history(&self) -> Result<()> {
        self.recorder.clear()
    }

    pub fn log(&self) -> Result<CallLog> {
        self.recorder.query()
    }

    pub fn calls(&self) -> Result<Calls> {
        Ok(Calls::new(self.member.clone(), self.recorder.snapshot()?))
    }

    pub fn call_count(&self) -> Result<usize> {
        self.recorder.len()
    }

    pub fn called(&self) -> Result<bool> {
        Ok(self.calls()?.called())
    }

    pub fn called_once(&self) -> Result<bool> {
        Ok(self.calls()?.called_once())
    }

    pub fn called_twice(&self) -> Result<bool> {
        Ok(self.calls()?.called_twice())
    }

    pub fn called_times(&self, n: usize) -> Result<bool> {
        Ok(self.calls()?.called_times(n))
    }

    pub fn called_with(&self, args: &[Value]) -> Result<bool> {
        Ok(self.calls()?.called_with(args))
    }

    pub fn returned(&self, value: &Value) -> Result<bool> {
        Ok(self.calls()?.returned(value))
    }

    pub fn threw(&self) -> Result<bool> {
        Ok(self.calls()?.threw())
    }

    pub fn called_before(&self, other: &Handle) -> Result<bool> {
        Ok(self.calls()?.called_before(&other.calls()?))
    }
}

/// Observes calls; never changes what the member returns or throws
#[derive(Clone)]
pub struct Spy {
    handle: Handle,
}

impl Spy {
    pub(crate) fn new(handle: Handle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Deref for Spy {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        &self.handle
    }
}

/// Records calls and decides their outcome through a replacement policy
#[derive(Clone)]
pub struct Stub {
    handle: Handle,
    behavior: SharedBehavior,
    asynchronous: bool,
}

impl Stub {
    pub(crate) fn new(handle: Handle, behavior: SharedBehavior, asynchronous: bool) -> Self {
        Self {
            handle,
            behavior,
            asynchronous,
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    fn configure(&self, policy: Policy) -> Result<&Self> {
        if self.handle.is_restored() {
            return Err(Error::stale(format!("stub {}", self.handle.member)));
        }
        self.behavior.lock().set_default(policy);
        Ok(self)
    }

    pub fn returns(&self, value: Value) -> Result<&Self> {
        self.configure(Policy::FixedReturn(value))
    }

    pub fn throws(&self, value: Value) -> Result<&Self> {
        self.configure(Policy::FixedThrow(value))
    }

    /// Throw an `Error`-shaped value with this name and message
    pub fn throws_error(&self, name: &str, message: &str) -> Result<&Self> {
        self.configure(Policy::FixedThrow(Thrown::error(name, message).0))
    }

    pub fn returns_in_order(&self, values: Vec<Value>) -> Result<&Self> {
        self.configure(Policy::sequence(values))
    }

    pub fn calls_fake<F>(&self, f: F) -> Result<&Self>
    where
        F: Fn(&[Value]) -> CallResult + Send + Sync + 'static,
    {
        self.configure(Policy::Delegate(Member::method(f)))
    }

    /// Delegate to `member`. A synchronous stub refuses an async substitute.
    pub fn calls_fake_member(&self, member: Member) -> Result<&Self> {
        check_substitute(&self.handle.member, self.asynchronous, &member)?;
        self.configure(Policy::Delegate(member))
    }

    /// Back to invoking whatever the stub replaced
    pub fn calls_through(&self) -> Result<&Self> {
        self.configure(Policy::PassThrough)
    }

    /// Configure the call with this zero-based index
    pub fn on_call(&self, index: usize) -> OnCall<'_> {
        OnCall { stub: self, index }
    }

    pub fn on_first_call(&self) -> OnCall<'_> {
        self.on_call(0)
    }

    pub fn on_second_call(&self) -> OnCall<'_> {
        self.on_call(1)
    }

    /// Clear recorded calls and restart per-call numbering
    pub fn reset(&self) -> Result<()> {
        self.handle.reset_history()?;
        self.behavior.lock().reset_calls();
        Ok(())
    }
}

impl Deref for Stub {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        &self.handle
    }
}

/// Per-call override builder returned by [`Stub::on_call`]
pub struct OnCall<'a> {
    stub: &'a Stub,
    index: usize,
}

impl<'a> OnCall<'a> {
    fn configure(self, policy: Policy) -> Result<&'a Stub> {
        if self.stub.handle.is_restored() {
            return Err(Error::stale(format!("stub {}", self.stub.handle.member)));
        }
        self.stub.behavior.lock().set_on_call(self.index, policy);
        Ok(self.stub)
    }

    pub fn returns(self, value: Value) -> Result<&'a Stub> {
        self.configure(Policy::FixedReturn(value))
    }

    pub fn throws(self, value: Value) -> Result<&'a Stub> {
        self.configure(Policy::FixedThrow(value))
    }

    pub fn calls_fake<F>(self, f: F) -> Result<&'a Stub>
    where
        F: Fn(&[Value]) -> CallResult + Send + Sync + 'static,
    {
        self.configure(Policy::Delegate(Member::method(f)))
    }

    pub fn calls_fake_member(self, member: Member) -> Result<&'a Stub> {
        check_substitute(&self.stub.handle.member, self.stub.asynchronous, &member)?;
        self.configure(Policy::Delegate(member))
    }

    pub fn calls_through(self) -> Result<&'a Stub> {
        self.configure(Policy::PassThrough)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MissingMember;
    use crate::target::{Object, Target};
    use serde_json::json;

    fn api(rx: tokio::sync::oneshot::Receiver<Value>) -> Object {
        let rx = Arc::new(Mutex::new(Some(rx)));
        Object::new("api").with_async_method("fetch", move |_args| {
            let rx = rx.lock().take();
            async move {
                match rx {
                    Some(rx) => rx.await.map_err(|_| Thrown::error("Error", "sender dropped")),
                    None => Ok(Value::Null),
                }
            }
        })
    }

    #[tokio::test]
    async fn test_async_spy_records_pending_then_settles() {
        let registry = Registry::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let api = api(rx);
        let spy = registry.spy(Arc::new(api.clone()), "fetch").unwrap();

        let invocation = api.invoke("fetch", vec![json!("/users")]);
        assert_eq!(spy.calls().unwrap().pending_count(), 1);
        assert!(spy.called_with(&[json!("/users")]).unwrap());

        tx.send(json!(["ada"])).unwrap();
        assert_eq!(invocation.settle().await.unwrap(), json!(["ada"]));

        let calls = spy.calls().unwrap();
        assert_eq!(calls.pending_count(), 0);
        assert!(calls.returned(&json!(["ada"])));
    }

    #[tokio::test]
    async fn test_async_stub_rejects() {
        let registry = Registry::new();
        let (_tx, rx) = tokio::sync::oneshot::channel();
        let api = api(rx);
        let stub = registry
            .stub(Arc::new(api.clone()), "fetch", None, MissingMember::Reject)
            .unwrap();
        stub.throws(json!("offline")).unwrap();

        let err = api.call_async("fetch", vec![]).await.unwrap_err();
        assert_eq!(err, Thrown(json!("offline")));
        assert!(stub.threw().unwrap());
        assert!(api.get("fetch").unwrap().is_async());
    }

    #[test]
    fn test_restored_wrapper_held_elsewhere_passes_through() {
        let registry = Registry::new();
        let obj = Object::new("obj").with_method("foo", |args| Ok(json!(args.len())));
        let spy = registry.spy(Arc::new(obj.clone()), "foo").unwrap();
        let kept = obj.get("foo").unwrap();
        spy.restore().unwrap();

        let result = kept.invoke("obj.foo", vec![json!(1)]);
        match result {
            Invocation::Ready(result) => assert_eq!(result.unwrap(), json!(1)),
            Invocation::Pending(_) => panic!("synchronous wrapper returned a future"),
        }
        assert!(matches!(spy.calls(), Err(Error::StaleHandle { .. })));
    }

    #[test]
    fn test_reentrant_calls_keep_call_order() {
        let registry = Registry::new();
        let obj = Object::new("obj");
        let inner = obj.clone();
        obj.insert(
            "countdown",
            Member::method(move |args| {
                let n = args[0].as_i64().unwrap_or(0);
                if n > 0 {
                    inner.call("countdown", vec![json!(n - 1)])?;
                }
                Ok(json!(n))
            }),
        );
        let spy = registry.spy(Arc::new(obj.clone()), "countdown").unwrap();

        obj.call("countdown", vec![json!(2)]).unwrap();

        let calls = spy.calls().unwrap();
        let order: Vec<_> = calls.records().iter().map(|r| r.args[0].clone()).collect();
        assert_eq!(order, vec![json!(2), json!(1), json!(0)]);
        assert!(calls.records().iter().all(|r| !r.is_pending()));
    }

    #[test]
    fn test_sync_stub_refuses_async_substitute() {
        let registry = Registry::new();
        let obj = Object::new("obj").with_method("foo", |_| Ok(json!("real")));
        let stub = registry
            .stub(Arc::new(obj.clone()), "foo", None, MissingMember::Reject)
            .unwrap();
        let substitute = || Member::async_method(|_args| async { Ok(json!("fake")) });

        assert_eq!(
            stub.calls_fake_member(substitute()).err(),
            Some(Error::AsyncSubstitute { member: "obj.foo".into() })
        );
        assert!(matches!(
            stub.on_first_call().calls_fake_member(substitute()),
            Err(Error::AsyncSubstitute { .. })
        ));
        assert_eq!(obj.call("foo", vec![]).unwrap(), json!("real"));

        let other = Object::new("other").with_method("bar", |_| Ok(Value::Null));
        assert!(matches!(
            registry.stub(Arc::new(other), "bar", Some(substitute()), MissingMember::Reject),
            Err(Error::AsyncSubstitute { .. })
        ));
        assert_eq!(registry.active_members(), vec!["obj.foo"]);
    }

    #[tokio::test]
    async fn test_async_stub_accepts_either_substitute() {
        let registry = Registry::new();
        let (_tx, rx) = tokio::sync::oneshot::channel();
        let api = api(rx);
        let stub = registry
            .stub(Arc::new(api.clone()), "fetch", None, MissingMember::Reject)
            .unwrap();

        stub.calls_fake_member(Member::async_method(|_args| async { Ok(json!("later")) }))
            .unwrap();
        assert_eq!(api.call_async("fetch", vec![]).await.unwrap(), json!("later"));

        stub.calls_fake(|_| Ok(json!("now"))).unwrap();
        assert_eq!(api.call_async("fetch", vec![]).await.unwrap(), json!("now"));
    }

    #[test]
    fn test_reset_restarts_returns_in_order() {
        let registry = Registry::new();
        let obj = Object::new("obj").with_method("next", |_| Ok(Value::Null));
        let stub = registry
            .stub(Arc::new(obj.clone()), "next", None, MissingMember::Reject)
            .unwrap();
        stub.returns_in_order(vec![json!(1), json!(2), json!(3)]).unwrap();

        obj.call("next", vec![]).unwrap();
        obj.call("next", vec![]).unwrap();
        stub.reset().unwrap();

        assert_eq!(obj.call("next", vec![]).unwrap(), json!(1));
        assert_eq!(stub.call_count().unwrap(), 1);
    }
}
