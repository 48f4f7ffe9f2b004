//! Named host objects a scenario intercepts and calls

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

use decoy_core::{Object, Thrown};

use crate::error::{E2eError, E2eResult};
use crate::spec::{MethodSpec, ObjectSpec};

/// The objects of one scenario run
pub struct World {
    objects: BTreeMap<String, Object>,
}

impl World {
    pub fn build(specs: &BTreeMap<String, ObjectSpec>) -> Self {
        let objects = specs
            .iter()
            .map(|(name, spec)| (name.clone(), build_object(name, spec)))
            .collect();
        Self { objects }
    }

    pub fn object(&self, name: &str) -> E2eResult<&Object> {
        self.objects
            .get(name)
            .ok_or_else(|| E2eError::UnknownObject(name.to_string()))
    }
}

fn build_object(name: &str, spec: &ObjectSpec) -> Object {
    let mut object = Object::new(name);
    for (value_name, value) in &spec.values {
        object = object.with_value(value_name, value.clone());
    }
    for (method, behavior) in &spec.methods {
        let label = format!("{}.{}", name, method);
        object = match behavior.clone() {
            MethodSpec::Noop => object.with_method(method, |_| Ok(Value::Null)),
            MethodSpec::Returns { value } => object.with_method(method, move |_| Ok(value.clone())),
            MethodSpec::Throws { value } => object.with_method(method, move |_| Err(Thrown(value.clone()))),
            MethodSpec::Echo => object.with_method(method, |args| Ok(Value::Array(args.to_vec()))),
            MethodSpec::Log { prefix } => {
                let prefix = prefix.unwrap_or_else(|| format!("{} called with", label));
                object.with_method(method, move |args| {
                    info!("{} {}", prefix, serde_json::Value::Array(args.to_vec()));
                    Ok(Value::Null)
                })
            }
        };
    }
    object
}

#[cfg(test)]
mod tests {
    use super::*;
    use decoy_core::Target;
    use serde_json::json;

    fn world() -> World {
        let yaml = r#"
obj:
  methods:
    foo:
      behavior: log
    answer:
      behavior: returns
      value: 42
    fail:
      behavior: throws
      value: { name: Error, message: nope }
    echo:
      behavior: echo
  values:
    count: 3
"#;
        let specs: BTreeMap<String, ObjectSpec> = serde_yaml::from_str(yaml).unwrap();
        World::build(&specs)
    }

    #[test]
    fn test_method_behaviors() {
        let world = world();
        let obj = world.object("obj").unwrap();

        assert_eq!(obj.call("foo", vec![json!(1)]).unwrap(), Value::Null);
        assert_eq!(obj.call("answer", vec![]).unwrap(), json!(42));
        assert_eq!(obj.call("fail", vec![]).unwrap_err().message(), Some("nope"));
        assert_eq!(obj.call("echo", vec![json!("a"), json!(2)]).unwrap(), json!(["a", 2]));
    }

    #[test]
    fn test_values_are_not_callable() {
        let world = world();
        let obj = world.object("obj").unwrap();
        assert!(obj.call("count", vec![]).is_err());
        assert!(!obj.get("count").unwrap().is_callable());
    }

    #[test]
    fn test_unknown_object() {
        assert!(matches!(world().object("ghost"), Err(E2eError::UnknownObject(name)) if name == "ghost"));
    }
}
