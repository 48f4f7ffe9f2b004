//! Command line cleanup for the scenario test binary
//!
//! `cargo test` hands every test binary the libtest flags and name filters
//! meant for the standard harness. The scenario binary drops those and
//! passes everything else to its own parser untouched.

/// libtest switches without a value
const LIBTEST_SWITCHES: &[&str] = &[
    "--nocapture",
    "--show-output",
    "--ignored",
    "--include-ignored",
    "--exact",
    "--quiet",
    "-q",
    "--list",
    "--bench",
    "--test",
    "--force-run-in-process",
    "--report-time",
    "--ensure-time",
    "--shuffle",
];

/// libtest options taking a value, as `--opt value` or `--opt=value`
const LIBTEST_OPTIONS: &[&str] = &[
    "--test-threads",
    "--color",
    "--format",
    "--logfile",
    "--skip",
    "--shuffle-seed",
    "-Z",
];

/// Runner options taking a separate value
const RUNNER_OPTIONS: &[&str] = &[
    "-s",
    "--specs",
    "-t",
    "--tag",
    "-n",
    "--name",
    "-c",
    "--config",
    "--poll-interval-ms",
    "--timeout-ms",
    "-o",
    "--output",
];

/// Strip libtest flags and bare name filters. The program name stays first.
pub fn runner_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut args = args.into_iter().map(Into::into);
    let mut kept: Vec<String> = args.next().into_iter().collect();
    let mut dropped = Vec::new();

    while let Some(arg) = args.next() {
        let flag = arg.split('=').next().unwrap_or_default();
        if LIBTEST_SWITCHES.contains(&arg.as_str()) {
            dropped.push(arg);
        } else if LIBTEST_OPTIONS.contains(&flag) {
            let has_value = arg.contains('=');
            dropped.push(arg);
            if !has_value {
                dropped.extend(args.next());
            }
        } else if RUNNER_OPTIONS.contains(&arg.as_str()) {
            kept.push(arg);
            kept.extend(args.next());
        } else if arg.starts_with('-') {
            kept.push(arg);
        } else {
            dropped.push(arg);
        }
    }

    if !dropped.is_empty() {
        tracing::debug!(?dropped, "ignoring harness arguments");
    }
    kept
}
