//! Scenario runner: one sandbox per spec, steps executed against it

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use decoy_core::{
    Alias, Calls, DecoyConfig, Sandbox, ScopeListener, Thrown, TimerCallback, VirtualClock,
};

use crate::error::{E2eError, E2eResult};
use crate::spec::{Chainer, Expectation, StubSpec, TestSpec, TestStep};
use crate::world::World;

/// Result of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    #[serde(default)]
    pub skipped: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
}

impl TestResult {
    fn skipped(spec: &TestSpec) -> Self {
        Self {
            name: spec.name.clone(),
            success: true,
            skipped: true,
            duration_ms: 0,
            steps: vec![],
            error: None,
        }
    }

    fn failed(spec: &TestSpec, error: &E2eError) -> Self {
        Self {
            name: spec.name.clone(),
            success: false,
            skipped: false,
            duration_ms: 0,
            steps: vec![],
            error: Some(error.to_string()),
        }
    }
}

/// Result of running all tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn single(result: TestResult) -> Self {
        Self {
            total: 1,
            passed: usize::from(result.success && !result.skipped),
            failed: usize::from(!result.success),
            skipped: usize::from(result.skipped),
            duration_ms: result.duration_ms,
            results: vec![result],
        }
    }
}

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub decoy: DecoyConfig,
    pub specs_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            decoy: DecoyConfig::default(),
            specs_dir: PathBuf::from("tests/specs"),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

/// How time moves while a scenario runs
enum HostTime {
    /// The scenario installed its own clock; only `tick` moves it
    Frozen,
    /// The runner owns a clock started at wall-clock time and advances it
    /// while assertions retry
    Driven(VirtualClock),
}

impl HostTime {
    fn wait(&self, ms: u64) {
        if let HostTime::Driven(clock) = self {
            let fired = clock.advance(ms);
            if fired > 0 {
                debug!(fired, waited_ms = ms, "timers fired while retrying");
            }
        }
    }
}

/// Main scenario runner
pub struct ScenarioRunner {
    decoy: DecoyConfig,
    specs_dir: PathBuf,
    output_dir: PathBuf,
}

impl ScenarioRunner {
    /// Create a new runner with default configuration
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    pub fn with_config(config: RunnerConfig) -> Self {
        Self {
            decoy: config.decoy,
            specs_dir: config.specs_dir,
            output_dir: config.output_dir,
        }
    }

    /// Run all tests in the specs directory
    pub fn run_all(&self) -> E2eResult<TestSuiteResult> {
        let specs = TestSpec::load_all(&self.specs_dir)?;
        self.run_specs(&specs)
    }

    /// Run tests matching a tag
    pub fn run_tagged(&self, tag: &str) -> E2eResult<TestSuiteResult> {
        let specs = TestSpec::load_all(&self.specs_dir)?;
        let filtered: Vec<TestSpec> = TestSpec::filter_by_tag(&specs, tag).into_iter().cloned().collect();
        self.run_specs(&filtered)
    }

    /// Run a specific test by name
    pub fn run_test(&self, name: &str) -> E2eResult<TestResult> {
        let specs = TestSpec::load_all(&self.specs_dir)?;
        let spec = specs
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::SpecParse(format!("Test not found: {}", name)))?;

        self.run_spec(&spec)
    }

    /// Run a list of specs. When any spec is marked `only`, the others are skipped.
    pub fn run_specs(&self, specs: &[TestSpec]) -> E2eResult<TestSuiteResult> {
        let start = Instant::now();
        let mut results = Vec::new();
        let mut passed = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let focused = specs.iter().any(|s| s.only);

        info!("Running {} test(s)...", specs.len());

        for spec in specs {
            if spec.skip || (focused && !spec.only) {
                skipped += 1;
                info!("- {} (skipped)", spec.name);
                results.push(TestResult::skipped(spec));
                continue;
            }

            match self.run_spec(spec) {
                Ok(result) => {
                    if result.success {
                        passed += 1;
                        info!("✓ {} ({} ms)", result.name, result.duration_ms);
                    } else {
                        failed += 1;
                        error!("✗ {} - {}", result.name, result.error.as_deref().unwrap_or("unknown error"));
                    }
                    results.push(result);
                }
                Err(e) => {
                    failed += 1;
                    error!("✗ {} - {}", spec.name, e);
                    results.push(TestResult::failed(spec, &e));
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            passed, failed, skipped, duration_ms
        );

        Ok(TestSuiteResult {
            total: specs.len(),
            passed,
            failed,
            skipped,
            duration_ms,
            results,
        })
    }

    /// Run a single spec in a fresh sandbox
    pub fn run_spec(&self, spec: &TestSpec) -> E2eResult<TestResult> {
        let start = Instant::now();
        debug!("Running test: {}", spec.name);

        let sandbox = Sandbox::with_config(self.decoy.clone());
        sandbox.test_started(&spec.name);

        let host = match &spec.clock {
            Some(clock) => {
                let handle = sandbox.clock(Some(clock.epoch_ms()?))?;
                sandbox.alias("clock", handle);
                HostTime::Frozen
            }
            None => {
                let clock = VirtualClock::with_loop_limit(Utc::now().timestamp_millis(), self.decoy.clock.loop_limit);
                clock.install(sandbox.time())?;
                HostTime::Driven(clock)
            }
        };

        let ctx = StepContext {
            sandbox: &sandbox,
            world: World::build(&spec.objects),
            host: &host,
            config: &self.decoy,
        };

        let mut step_results = Vec::new();
        let mut test_error: Option<String> = None;

        for step in &spec.steps {
            let step_start = Instant::now();
            let step_name = step.label();
            debug!("Executing step: {}", step_name);

            let outcome = ctx.execute(step);
            let duration_ms = step_start.elapsed().as_millis() as u64;

            match outcome {
                Ok(()) => step_results.push(StepResult {
                    success: true,
                    step_name,
                    duration_ms,
                    error: None,
                }),
                Err(e) => {
                    test_error = Some(e.to_string());
                    step_results.push(StepResult {
                        success: false,
                        step_name,
                        duration_ms,
                        error: Some(e.to_string()),
                    });
                    break; // Stop on first failure
                }
            }
        }

        if let Err(e) = sandbox.test_finished(&spec.name) {
            warn!(test = %spec.name, error = %e, "restore after test failed");
            test_error.get_or_insert_with(|| e.to_string());
        }
        if let HostTime::Driven(clock) = &host {
            if let Err(e) = clock.uninstall() {
                warn!(test = %spec.name, error = %e, "host clock was already uninstalled");
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let success = test_error.is_none();

        Ok(TestResult {
            name: spec.name.clone(),
            success,
            skipped: false,
            duration_ms,
            steps: step_results,
            error: test_error,
        })
    }

    /// Write test results to JSON file
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        write_results(&self.output_dir, results)
    }
}

impl Default for ScenarioRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `test-results.json` under `output_dir`
pub fn write_results(output_dir: &Path, results: &TestSuiteResult) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let path = output_dir.join("test-results.json");
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}

struct StepContext<'a> {
    sandbox: &'a Sandbox,
    world: World,
    host: &'a HostTime,
    config: &'a DecoyConfig,
}

impl StepContext<'_> {
    fn execute(&self, step: &TestStep) -> E2eResult<()> {
        match step {
            TestStep::Spy { object, member, alias } => {
                let spy = self.sandbox.spy(self.world.object(object)?, member)?;
                if let Some(alias) = alias {
                    self.sandbox.alias(alias, spy);
                }
                Ok(())
            }
            TestStep::Stub { object, member, alias, behavior } => {
                let stub = self.sandbox.stub(self.world.object(object)?, member)?;
                match behavior {
                    Some(StubSpec::Returns { value }) => {
                        stub.returns(value.clone())?;
                    }
                    Some(StubSpec::Throws { value }) => {
                        stub.throws(value.clone())?;
                    }
                    Some(StubSpec::ReturnsInOrder { values }) => {
                        stub.returns_in_order(values.clone())?;
                    }
                    Some(StubSpec::CallsFake { expect_args, returns }) => {
                        let expected = expect_args.clone();
                        let returns = returns.clone();
                        stub.calls_fake(move |args| {
                            if let Some(expected) = &expected {
                                if args != expected.as_slice() {
                                    return Err(Thrown::error(
                                        "AssertionError",
                                        format!(
                                            "expected {} to equal {}",
                                            Value::Array(args.to_vec()),
                                            Value::Array(expected.clone())
                                        ),
                                    ));
                                }
                            }
                            Ok(returns.clone())
                        })?;
                    }
                    Some(StubSpec::CallsThrough) | None => {}
                }
                if let Some(alias) = alias {
                    self.sandbox.alias(alias, stub);
                }
                Ok(())
            }
            TestStep::Call { object, member, args, expect_return, expect_throw } => {
                let result = self.world.object(object)?.call(member, args.clone());
                let label = format!("{}.{}", object, member);
                match (result, *expect_throw) {
                    (Ok(value), false) => match expect_return {
                        Some(expected) if *expected != value => Err(E2eError::AssertionFailed(format!(
                            "expected {} to return {} but it returned {}",
                            label, expected, value
                        ))),
                        _ => Ok(()),
                    },
                    (Ok(value), true) => Err(E2eError::AssertionFailed(format!(
                        "expected {} to throw but it returned {}",
                        label, value
                    ))),
                    (Err(thrown), true) => {
                        debug!(member = %label, thrown = %thrown.0, "call threw as expected");
                        Ok(())
                    }
                    (Err(thrown), false) => Err(E2eError::Uncaught(thrown)),
                }
            }
            TestStep::Schedule { object, member, args, delay_ms, repeat } => {
                let target = self.world.object(object)?.clone();
                let member = member.clone();
                let args = args.clone();
                let label = format!("{}.{}", object, member);
                let callback: TimerCallback = Arc::new(move || {
                    if let Err(thrown) = target.call(&member, args.clone()) {
                        warn!(member = %label, thrown = %thrown.0, "scheduled call threw");
                    }
                });
                let interval = repeat.then_some(*delay_ms);
                let id = self.sandbox.time().schedule(*delay_ms, interval, callback);
                debug!(timer = %id, delay_ms, "scheduled");
                Ok(())
            }
            TestStep::Tick { ms } => {
                let clock = self.sandbox.current_clock().ok_or_else(|| E2eError::StepFailed {
                    step: step.label(),
                    reason: "no clock installed; set `clock` on the spec".to_string(),
                })?;
                let fired = clock.tick(*ms)?;
                debug!(ms, fired, "ticked");
                Ok(())
            }
            TestStep::Should { alias, expect, value, timeout_ms } => {
                let expectation: Expectation = expect.parse()?;
                self.should(alias, expectation, value.as_ref(), timeout_ms.unwrap_or(self.config.polling.timeout_ms))
            }
            TestStep::Now { epoch_ms, unix_seconds } => {
                let time = self.sandbox.time();
                if let Some(expected) = epoch_ms {
                    let actual = time.now_ms();
                    if actual != *expected {
                        return Err(E2eError::AssertionFailed(format!(
                            "expected now to be {} ms but it was {} ms",
                            expected, actual
                        )));
                    }
                }
                if let Some(expected) = unix_seconds {
                    let actual = time.unix_seconds();
                    if actual != *expected {
                        return Err(E2eError::AssertionFailed(format!(
                            "expected unix time {} but it was {}",
                            expected, actual
                        )));
                    }
                }
                Ok(())
            }
            TestStep::Restore { alias: Some(alias) } => {
                match self.sandbox.get(alias)? {
                    Alias::Clock(clock) => clock.restore()?,
                    other => {
                        if let Some(handle) = other.handle() {
                            handle.restore()?;
                        }
                    }
                }
                Ok(())
            }
            TestStep::Restore { alias: None } => Ok(self.sandbox.restore_all()?),
            TestStep::Log { message } => {
                info!("{}", message);
                Ok(())
            }
        }
    }

    /// Re-check the expectation until it holds, moving host time between
    /// attempts when the runner owns it
    fn should(&self, alias: &str, expectation: Expectation, value: Option<&Value>, timeout_ms: u64) -> E2eResult<()> {
        let interval = self.config.polling.interval_ms.max(1);
        let mut waited = 0;
        loop {
            let calls = self.sandbox.aliases().handle(alias)?.calls()?;
            if holds(expectation, value, &calls)? {
                return Ok(());
            }
            if waited >= timeout_ms {
                return Err(E2eError::Timeout {
                    waited_ms: waited,
                    expectation: format!(
                        "expected @{} to {} but it was called {} time(s)",
                        alias.trim_start_matches('@'),
                        expectation,
                        calls.count()
                    ),
                });
            }
            self.host.wait(interval);
            waited += interval;
        }
    }
}

fn holds(expectation: Expectation, value: Option<&Value>, calls: &Calls) -> E2eResult<bool> {
    let expected = || {
        value.ok_or_else(|| E2eError::SpecParse(format!("'{}' needs a value", expectation)))
    };
    let as_args = |v: &Value| match v {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };

    let result = match expectation.chainer {
        Chainer::Called => calls.called(),
        Chainer::CalledOnce => calls.called_once(),
        Chainer::CalledTwice => calls.called_twice(),
        Chainer::CalledThrice => calls.called_thrice(),
        Chainer::CallCount => {
            let n = expected()?
                .as_u64()
                .ok_or_else(|| E2eError::SpecParse("callCount needs a non-negative integer".to_string()))?;
            calls.called_times(n as usize)
        }
        Chainer::CalledWith => calls.called_with(&as_args(expected()?)),
        Chainer::CalledWithExactly => calls.called_with_exactly(&as_args(expected()?)),
        Chainer::Returned => calls.returned(expected()?),
        Chainer::Threw => calls.threw(),
    };
    Ok(result != expectation.negated)
}
