//! Member values held by targets: plain data or callables

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::Thrown;

/// Outcome of invoking a callable member
pub type CallResult = std::result::Result<Value, Thrown>;

/// Synchronous callable signature
pub type MethodFn = dyn Fn(&[Value]) -> CallResult + Send + Sync;

/// Asynchronous callable signature; the future settles later
pub type AsyncMethodFn = dyn Fn(Vec<Value>) -> BoxFuture<'static, CallResult> + Send + Sync;

/// A named member of a target object
#[derive(Clone)]
pub enum Member {
    /// Synchronous method
    Method(Arc<MethodFn>),
    /// Method returning a future
    AsyncMethod(Arc<AsyncMethodFn>),
    /// Non-callable property
    Data(Value),
}

/// What a call produced: either a settled result or a pending future
pub enum Invocation {
    Ready(CallResult),
    Pending(BoxFuture<'static, CallResult>),
}

impl Invocation {
    /// Wait for the outcome regardless of how the member was implemented
    pub async fn settle(self) -> CallResult {
        match self {
            Invocation::Ready(result) => result,
            Invocation::Pending(fut) => fut.await,
        }
    }
}

impl Member {
    pub fn method<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> CallResult + Send + Sync + 'static,
    {
        Member::Method(Arc::new(f))
    }

    pub fn async_method<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        Member::AsyncMethod(Arc::new(move |args| f(args).boxed()))
    }

    /// A method that ignores its arguments and returns `null`
    pub fn noop() -> Self {
        Member::method(|_| Ok(Value::Null))
    }

    pub fn is_callable(&self) -> bool {
        !matches!(self, Member::Data(_))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Member::AsyncMethod(_))
    }

    /// Reference identity for callables, value equality for data
    pub fn same(&self, other: &Member) -> bool {
        match (self, other) {
            (Member::Method(a), Member::Method(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Member::AsyncMethod(a), Member::AsyncMethod(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Member::Data(a), Member::Data(b)) => a == b,
            _ => false,
        }
    }

    /// Invoke the member. Calling a data member throws a `TypeError` the way
    /// a dynamic host would.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Invocation {
        match self {
            Member::Method(f) => Invocation::Ready(f(&args)),
            Member::AsyncMethod(f) => Invocation::Pending(f(args)),
            Member::Data(_) => Invocation::Ready(Err(Thrown::error(
                "TypeError",
                format!("{} is not a function", name),
            ))),
        }
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Method(m) => write!(f, "Method({:p})", Arc::as_ptr(m) as *const ()),
            Member::AsyncMethod(m) => write!(f, "AsyncMethod({:p})", Arc::as_ptr(m) as *const ()),
            Member::Data(v) => write!(f, "Data({})", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_is_reference_identity() {
        let a = Member::noop();
        let b = Member::noop();
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
        assert!(Member::Data(json!(1)).same(&Member::Data(json!(1))));
    }

    #[tokio::test]
    async fn test_invoke_data_member_throws() {
        let result = Member::Data(json!("x")).invoke("obj.x", vec![]).settle().await;
        let thrown = result.unwrap_err();
        assert_eq!(thrown.message(), Some("obj.x is not a function"));
    }

    #[tokio::test]
    async fn test_async_method_settles() {
        let m = Member::async_method(|args: Vec<Value>| async move { Ok(json!(args.len())) });
        assert!(m.is_async());
        let result = m.invoke("obj.f", vec![json!(1), json!(2)]).settle().await;
        assert_eq!(result.unwrap(), json!(2));
    }
}
