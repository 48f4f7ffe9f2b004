//! Declarative YAML scenario specification

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{E2eError, E2eResult};

/// A complete scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    /// Unique name for this test
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering tests
    #[serde(default)]
    pub tags: Vec<String>,

    /// Skip this test
    #[serde(default)]
    pub skip: bool,

    /// Run only the focused tests of a suite
    #[serde(default)]
    pub only: bool,

    /// Install a frozen virtual clock at this instant
    #[serde(default)]
    pub clock: Option<ClockStart>,

    /// Objects the steps intercept and call, by name
    #[serde(default)]
    pub objects: BTreeMap<String, ObjectSpec>,

    /// Steps to execute in order
    pub steps: Vec<TestStep>,
}

/// Either epoch milliseconds or an RFC 3339 timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClockStart {
    EpochMs(i64),
    Timestamp(String),
}

impl ClockStart {
    pub fn epoch_ms(&self) -> E2eResult<i64> {
        match self {
            ClockStart::EpochMs(ms) => Ok(*ms),
            ClockStart::Timestamp(ts) => DateTime::parse_from_rfc3339(ts)
                .map(|dt| dt.timestamp_millis())
                .map_err(|e| E2eError::SpecParse(format!("Invalid clock timestamp '{}': {}", ts, e))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectSpec {
    #[serde(default)]
    pub methods: BTreeMap<String, MethodSpec>,

    /// Plain data members
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

/// What an object's own method does when called
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum MethodSpec {
    Noop,
    Returns {
        #[serde(default)]
        value: Value,
    },
    Throws {
        value: Value,
    },
    /// Returns its arguments as an array
    Echo,
    /// Logs its arguments
    Log {
        #[serde(default)]
        prefix: Option<String>,
    },
}

/// How a stub step configures the stub
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StubSpec {
    Returns {
        #[serde(default)]
        value: Value,
    },
    Throws {
        value: Value,
    },
    ReturnsInOrder {
        values: Vec<Value>,
    },
    /// Replacement function: checks its arguments, then returns `returns`
    CallsFake {
        #[serde(default)]
        expect_args: Option<Vec<Value>>,
        #[serde(default)]
        returns: Value,
    },
    CallsThrough,
}

/// A single step in a test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Wrap a member in a spy
    Spy {
        object: String,
        member: String,
        #[serde(default, rename = "as")]
        alias: Option<String>,
    },

    /// Replace a member with a stub
    Stub {
        object: String,
        member: String,
        #[serde(default, rename = "as")]
        alias: Option<String>,
        #[serde(default)]
        behavior: Option<StubSpec>,
    },

    /// Call a member the way application code would
    Call {
        object: String,
        member: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        expect_return: Option<Value>,
        #[serde(default)]
        expect_throw: bool,
    },

    /// Call a member later through the ambient time source
    Schedule {
        object: String,
        member: String,
        #[serde(default)]
        args: Vec<Value>,
        delay_ms: u64,
        #[serde(default)]
        repeat: bool,
    },

    /// Advance the installed clock
    Tick {
        ms: u64,
    },

    /// Retrying assertion over an aliased spy or stub
    Should {
        alias: String,
        expect: String,
        #[serde(default)]
        value: Option<Value>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Check the ambient time
    Now {
        #[serde(default)]
        epoch_ms: Option<i64>,
        #[serde(default)]
        unix_seconds: Option<i64>,
    },

    /// Restore one alias, or everything when no alias is given
    Restore {
        #[serde(default)]
        alias: Option<String>,
    },

    /// Log a message (for debugging)
    Log {
        message: String,
    },
}

impl TestStep {
    /// Short label used in step results
    pub fn label(&self) -> String {
        match self {
            TestStep::Spy { object, member, .. } => format!("spy {}.{}", object, member),
            TestStep::Stub { object, member, .. } => format!("stub {}.{}", object, member),
            TestStep::Call { object, member, .. } => format!("call {}.{}", object, member),
            TestStep::Schedule { object, member, delay_ms, .. } => {
                format!("schedule {}.{} in {}ms", object, member, delay_ms)
            }
            TestStep::Tick { ms } => format!("tick {}ms", ms),
            TestStep::Should { alias, expect, .. } => format!("@{} should {}", alias.trim_start_matches('@'), expect),
            TestStep::Now { .. } => "now".to_string(),
            TestStep::Restore { alias: Some(alias) } => format!("restore @{}", alias.trim_start_matches('@')),
            TestStep::Restore { alias: None } => "restore all".to_string(),
            TestStep::Log { .. } => "log".to_string(),
        }
    }
}

/// Chai-style chainer of a `should` step, e.g. `have.been.calledTwice`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chainer {
    Called,
    CalledOnce,
    CalledTwice,
    CalledThrice,
    CallCount,
    CalledWith,
    CalledWithExactly,
    Returned,
    Threw,
}

impl Chainer {
    /// Whether the chainer reads its expected value from the step
    pub fn takes_value(self) -> bool {
        matches!(
            self,
            Chainer::CallCount | Chainer::CalledWith | Chainer::CalledWithExactly | Chainer::Returned
        )
    }
}

/// A parsed `should` expectation, possibly negated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expectation {
    pub negated: bool,
    pub chainer: Chainer,
}

impl FromStr for Expectation {
    type Err = E2eError;

    fn from_str(s: &str) -> E2eResult<Self> {
        let (negated, rest) = match s.strip_prefix("not.") {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let word = ["have.been.", "be.", "have."]
            .iter()
            .find_map(|prefix| rest.strip_prefix(prefix))
            .unwrap_or(rest);

        let chainer = match word {
            "called" => Chainer::Called,
            "calledOnce" => Chainer::CalledOnce,
            "calledTwice" => Chainer::CalledTwice,
            "calledThrice" => Chainer::CalledThrice,
            "callCount" => Chainer::CallCount,
            "calledWith" => Chainer::CalledWith,
            "calledWithExactly" => Chainer::CalledWithExactly,
            "returned" => Chainer::Returned,
            "thrown" | "threw" => Chainer::Threw,
            _ => return Err(E2eError::SpecParse(format!("Unknown chainer: {}", s))),
        };
        Ok(Self { negated, chainer })
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self.chainer {
            Chainer::Called => "have.been.called",
            Chainer::CalledOnce => "have.been.calledOnce",
            Chainer::CalledTwice => "have.been.calledTwice",
            Chainer::CalledThrice => "have.been.calledThrice",
            Chainer::CallCount => "have.callCount",
            Chainer::CalledWith => "have.been.calledWith",
            Chainer::CalledWithExactly => "have.been.calledWithExactly",
            Chainer::Returned => "have.returned",
            Chainer::Threw => "have.thrown",
        };
        if self.negated {
            write!(f, "not.{}", word)
        } else {
            f.write_str(word)
        }
    }
}

impl TestSpec {
    /// Parse a test spec from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let spec: Self = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Parse a test spec from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all test specs from a directory, in file name order
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut specs = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            let spec = Self::from_file(entry.path())?;
            specs.push(spec);
        }

        Ok(specs)
    }

    /// Filter specs by tag
    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    /// Catch malformed steps before anything runs
    fn validate(&self) -> E2eResult<()> {
        if let Some(clock) = &self.clock {
            clock.epoch_ms()?;
        }
        for step in &self.steps {
            match step {
                TestStep::Spy { object, .. }
                | TestStep::Stub { object, .. }
                | TestStep::Call { object, .. }
                | TestStep::Schedule { object, .. } => {
                    if !self.objects.contains_key(object) {
                        return Err(E2eError::UnknownObject(object.clone()));
                    }
                }
                TestStep::Should { expect, value, .. } => {
                    let expectation: Expectation = expect.parse()?;
                    if expectation.chainer.takes_value() && value.is_none() {
                        return Err(E2eError::SpecParse(format!("'{}' needs a value", expect)));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_parse_spy_spec() {
        let yaml = r#"
name: spy-wraps-method
description: Wrap a method in a spy
tags:
  - spy
objects:
  obj:
    methods:
      foo:
        behavior: log
        prefix: obj.foo called with
steps:
  - action: spy
    object: obj
    member: foo
    as: foo
  - action: call
    object: obj
    member: foo
    args: [1, "two"]
  - action: should
    alias: "@foo"
    expect: have.been.called
"#;
        let spec = TestSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.name, "spy-wraps-method");
        assert_eq!(spec.steps.len(), 3);
        assert!(matches!(
            &spec.objects["obj"].methods["foo"],
            MethodSpec::Log { prefix: Some(p) } if p == "obj.foo called with"
        ));
        assert!(matches!(&spec.steps[0], TestStep::Spy { alias: Some(a), .. } if a == "foo"));
        assert_eq!(spec.steps[2].label(), "@foo should have.been.called");
    }

    #[test]
    fn test_parse_clock_and_stub_spec() {
        let yaml = r#"
name: stub-and-clock
clock: "2017-03-14T00:00:00Z"
objects:
  util:
    methods:
      fetch:
        behavior: noop
steps:
  - action: stub
    object: util
    member: fetch
    behavior:
      kind: returns_in_order
      values: [1, 2]
  - action: tick
    ms: 10000
  - action: now
    unix_seconds: 1489449610
"#;
        let spec = TestSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.clock.as_ref().unwrap().epoch_ms().unwrap(), 1_489_449_600_000);
        assert!(matches!(spec.objects["util"].methods["fetch"], MethodSpec::Noop));
        assert!(matches!(
            &spec.steps[0],
            TestStep::Stub { behavior: Some(StubSpec::ReturnsInOrder { values }), .. } if values.len() == 2
        ));
    }

    #[test]
    fn test_epoch_ms_clock() {
        let spec = TestSpec::from_yaml("name: t\nclock: 1000\nsteps: []\n").unwrap();
        assert_eq!(spec.clock.unwrap().epoch_ms().unwrap(), 1000);
    }

    #[test]
    fn test_rejects_unknown_object() {
        let yaml = r#"
name: bad
steps:
  - action: spy
    object: ghost
    member: foo
"#;
        assert!(matches!(TestSpec::from_yaml(yaml), Err(E2eError::UnknownObject(o)) if o == "ghost"));
    }

    #[test]
    fn test_rejects_missing_value() {
        let yaml = r#"
name: bad
steps:
  - action: should
    alias: foo
    expect: have.callCount
"#;
        assert!(matches!(TestSpec::from_yaml(yaml), Err(E2eError::SpecParse(_))));
    }

    #[test]
    fn test_rejects_bad_timestamp() {
        assert!(TestSpec::from_yaml("name: t\nclock: yesterday\nsteps: []\n").is_err());
    }

    #[test_case("have.been.called", false, Chainer::Called)]
    #[test_case("be.calledOnce", false, Chainer::CalledOnce)]
    #[test_case("have.been.calledTwice", false, Chainer::CalledTwice)]
    #[test_case("not.have.been.called", true, Chainer::Called)]
    #[test_case("have.callCount", false, Chainer::CallCount)]
    #[test_case("have.been.calledWith", false, Chainer::CalledWith)]
    #[test_case("have.returned", false, Chainer::Returned)]
    #[test_case("have.thrown", false, Chainer::Threw)]
    #[test_case("calledThrice", false, Chainer::CalledThrice)]
    fn test_parse_chainer(input: &str, negated: bool, chainer: Chainer) {
        let expectation: Expectation = input.parse().unwrap();
        assert_eq!(expectation, Expectation { negated, chainer });
    }

    #[test]
    fn test_unknown_chainer() {
        assert!("have.been.calledSometimes".parse::<Expectation>().is_err());
    }

    #[test]
    fn test_filter_by_tag() {
        let specs = vec![
            TestSpec::from_yaml("name: a\ntags: [clock]\nsteps: []\n").unwrap(),
            TestSpec::from_yaml("name: b\ntags: [spy]\nsteps: []\n").unwrap(),
        ];
        let filtered = TestSpec::filter_by_tag(&specs, "clock");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "a");
    }
}
