//! Scenario harness entry point
//!
//! This file is the test binary that runs the YAML scenarios.
//! Run with: cargo test --package decoy-e2e --test e2e

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use decoy_core::DecoyConfig;
use decoy_e2e::runner::RunnerConfig;
use decoy_e2e::{harness, E2eError, E2eResult, ScenarioRunner, TestSuiteResult};

#[derive(Parser, Debug)]
#[command(name = "decoy-e2e")]
#[command(about = "Scenario runner for Decoy spies, stubs and clocks")]
struct Args {
    /// Path to test specs directory
    #[arg(short, long, default_value = "tests/specs")]
    specs: PathBuf,

    /// Run only tests matching this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only a specific test by name
    #[arg(short, long)]
    name: Option<String>,

    /// Decoy configuration file (TOML)
    #[arg(short, long, env = "DECOY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the retry interval of `should` steps
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Override the retry timeout of `should` steps
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Output directory for results
    #[arg(short, long, default_value = "test-results")]
    output: PathBuf,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // `cargo test` also passes libtest flags such as --nocapture
    let args = Args::parse_from(harness::runner_args(std::env::args()));

    match run(args) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

fn run(args: Args) -> E2eResult<bool> {
    let mut decoy = match &args.config {
        Some(path) => DecoyConfig::load(path).map_err(|e| E2eError::Config(format!("{:#}", e)))?,
        None => DecoyConfig::default(),
    };
    if let Some(interval) = args.poll_interval_ms {
        decoy.polling.interval_ms = interval;
    }
    if let Some(timeout) = args.timeout_ms {
        decoy.polling.timeout_ms = timeout;
    }

    let runner = ScenarioRunner::with_config(RunnerConfig {
        decoy,
        specs_dir: args.specs,
        output_dir: args.output,
    });

    // Run tests
    let results = if let Some(name) = args.name {
        TestSuiteResult::single(runner.run_test(&name)?)
    } else if let Some(tag) = args.tag {
        runner.run_tagged(&tag)?
    } else {
        runner.run_all()?
    };

    // Write results
    runner.write_results(&results)?;

    Ok(results.failed == 0)
}
