//! Decoy E2E Scenario Runner
//!
//! Declarative YAML scenarios driving spies, stubs and clocks:
//! - Builds named host objects from each spec
//! - Runs every spec in a fresh sandbox with scope lifecycle hooks
//! - Retries `should` assertions while host time moves
//! - Writes a JSON results file
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Scenario Runner (Rust)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioRunner                                             │
//! │    ├── run_spec(spec: TestSpec) -> TestResult               │
//! │    │     ├── Sandbox::test_started / test_finished          │
//! │    │     └── host time: frozen clock | driven clock         │
//! │    └── write_results(suite) -> test-results.json            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestSpec (YAML)                                            │
//! │    ├── name, description, tags, clock?                      │
//! │    ├── objects: { name: { methods, values } }               │
//! │    └── steps: [Step]                                        │
//! │          ├── spy / stub { object, member, as? }             │
//! │          ├── call { object, member, args }                  │
//! │          ├── schedule { delay_ms, repeat? }                 │
//! │          ├── tick { ms }                                    │
//! │          ├── should { alias, expect, value? }               │
//! │          └── now / restore / log                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod harness;
pub mod runner;
pub mod spec;
pub mod world;

pub use error::{E2eError, E2eResult};
pub use runner::{RunnerConfig, ScenarioRunner, TestResult, TestSuiteResult};
pub use spec::{TestSpec, TestStep};
