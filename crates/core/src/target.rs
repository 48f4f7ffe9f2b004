//! Objects whose members can be intercepted
//!
//! Interception never reflects over arbitrary values. Anything that can hand
//! out a member by name and accept a replacement implements [`Target`].

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Thrown;
use crate::member::{CallResult, Invocation, Member};

/// A host object with named members
pub trait Target: Send + Sync {
    /// Stable identity; two handles to the same object report the same id
    fn identity(&self) -> usize;

    /// Name used in logs and error messages
    fn label(&self) -> String;

    fn get(&self, name: &str) -> Option<Member>;

    fn set(&self, name: &str, member: Member) -> std::result::Result<(), String>;

    fn remove(&self, name: &str) -> std::result::Result<(), String>;
}

/// A dynamic object: a shared, mutable bag of members
#[derive(Clone)]
pub struct Object {
    inner: Arc<ObjectInner>,
}

struct ObjectInner {
    label: String,
    members: Mutex<BTreeMap<String, Member>>,
    frozen: AtomicBool,
}

impl Object {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                label: label.into(),
                members: Mutex::new(BTreeMap::new()),
                frozen: AtomicBool::new(false),
            }),
        }
    }

    pub fn with_method<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> CallResult + Send + Sync + 'static,
    {
        self.insert(name, Member::method(f));
        self
    }

    pub fn with_async_method<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        self.insert(name, Member::async_method(f));
        self
    }

    pub fn with_value(self, name: &str, value: Value) -> Self {
        self.insert(name, Member::Data(value));
        self
    }

    /// Unconditional write, ignoring the frozen flag. This is how application
    /// code mutates its own objects.
    pub fn insert(&self, name: &str, member: Member) {
        self.inner.members.lock().insert(name.to_string(), member);
    }

    pub fn member_names(&self) -> Vec<String> {
        self.inner.members.lock().keys().cloned().collect()
    }

    /// Refuse all further writes through [`Target::set`] and [`Target::remove`]
    pub fn freeze(&self) {
        self.inner.frozen.store(true, Ordering::SeqCst);
    }

    pub fn thaw(&self) {
        self.inner.frozen.store(false, Ordering::SeqCst);
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}.{}", self.inner.label, name)
    }

    /// Look the member up and invoke it. The lookup lock is released before
    /// the member runs so implementations may call back into this object.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Invocation {
        let member = self.inner.members.lock().get(name).cloned();
        match member {
            Some(member) => member.invoke(&self.qualified(name), args),
            None => Invocation::Ready(Err(Thrown::error(
                "TypeError",
                format!("{} is not a function", self.qualified(name)),
            ))),
        }
    }

    /// Call a synchronous member
    pub fn call(&self, name: &str, args: Vec<Value>) -> CallResult {
        match self.invoke(name, args) {
            Invocation::Ready(result) => result,
            Invocation::Pending(_) => Err(Thrown::error(
                "TypeError",
                format!("{} is asynchronous; use call_async", self.qualified(name)),
            )),
        }
    }

    /// Call any member and wait for it to settle
    pub async fn call_async(&self, name: &str, args: Vec<Value>) -> CallResult {
        self.invoke(name, args).settle().await
    }
}

impl Target for Object {
    fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn label(&self) -> String {
        self.inner.label.clone()
    }

    fn get(&self, name: &str) -> Option<Member> {
        self.inner.members.lock().get(name).cloned()
    }

    fn set(&self, name: &str, member: Member) -> std::result::Result<(), String> {
        if self.inner.frozen.load(Ordering::SeqCst) {
            return Err(format!("{} is frozen", self.inner.label));
        }
        self.insert(name, member);
        Ok(())
    }

    fn remove(&self, name: &str) -> std::result::Result<(), String> {
        if self.inner.frozen.load(Ordering::SeqCst) {
            return Err(format!("{} is frozen", self.inner.label));
        }
        self.inner.members.lock().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_and_missing_member() {
        let obj = Object::new("obj").with_method("double", |args| {
            Ok(json!(args[0].as_i64().unwrap_or(0) * 2))
        });
        assert_eq!(obj.call("double", vec![json!(21)]).unwrap(), json!(42));

        let err = obj.call("missing", vec![]).unwrap_err();
        assert_eq!(err.message(), Some("obj.missing is not a function"));
    }

    #[test]
    fn test_identity_shared_by_clones() {
        let a = Object::new("a");
        let b = a.clone();
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), Object::new("a").identity());
    }

    #[test]
    fn test_frozen_object_rejects_target_writes() {
        let obj = Object::new("win").with_method("f", |_| Ok(Value::Null));
        obj.freeze();
        assert!(obj.set("f", Member::noop()).is_err());
        assert!(obj.remove("f").is_err());
        obj.thaw();
        assert!(obj.remove("f").is_ok());
        assert!(obj.member_names().is_empty());
    }

    #[test]
    fn test_member_may_call_back_into_object() {
        let obj = Object::new("obj").with_method("base", |_| Ok(json!(1)));
        let handle = obj.clone();
        obj.insert(
            "outer",
            Member::method(move |_| {
                let inner = handle.call("base", vec![])?;
                Ok(json!(inner.as_i64().unwrap_or(0) + 1))
            }),
        );
        assert_eq!(obj.call("outer", vec![]).unwrap(), json!(2));
    }
}
