//! Policy validation of a plan JSON with conftest.
use anyhow::Result;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::StepError;
use crate::host::Log;
use crate::process::{CommandRunner, RunOptions};

static COUNT_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)([0-9]+)\s+violation").expect("regex for violation counts"),
        Regex::new(r"(?i)([0-9]+)\s+test.*fail").expect("regex for failed test counts"),
        Regex::new(r"(?i)([0-9]+)\s+deny").expect("regex for deny counts"),
    ]
});

/// Outcome of one conftest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Validation {
    pub(crate) passed: bool,
    pub(crate) violations_count: u64,
}

pub(crate) struct PolicyValidator<'a> {
    runner: &'a dyn CommandRunner,
    log: &'a dyn Log,
    timeout: Option<Duration>,
}

impl<'a> PolicyValidator<'a> {
    pub(crate) fn new(runner: &'a dyn CommandRunner, log: &'a dyn Log) -> Self {
        Self {
            runner,
            log,
            timeout: None,
        }
    }

    pub(crate) fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn validate(
        &self,
        conftest: &Path,
        plan_json: &Path,
        policy_path: &Path,
    ) -> Result<Validation> {
        self.log
            .info(&format!("Running conftest test on: {}", plan_json.display()));
        self.log
            .info(&format!("Using policy path: {}", policy_path.display()));

        if !plan_json.exists() {
            return Err(StepError::MissingPath {
                what: "Plan file",
                path: plan_json.to_path_buf(),
            }
            .into());
        }
        if !policy_path.exists() {
            return Err(StepError::MissingPath {
                what: "Policy path",
                path: policy_path.to_path_buf(),
            }
            .into());
        }

        let program = conftest.to_string_lossy();
        let plan_arg = plan_json.to_string_lossy();
        let policy_arg = policy_path.to_string_lossy();
        let options = RunOptions {
            capture_stdout: true,
            capture_stderr: true,
            ignore_return_code: true,
            timeout: self.timeout,
            ..RunOptions::default()
        };
        let output = self.runner.run(
            &program,
            &["test", &plan_arg, "-p", &policy_arg],
            &options,
        )?;

        let passed = output.exit_code == 0;
        let violations_count = if passed {
            0
        } else {
            count_violations(&format!("{}{}", output.stdout, output.stderr))
        };

        if passed {
            self.log.info("Conftest validation passed");
            if !output.stdout.is_empty() {
                self.log.info(&output.stdout);
            }
        } else {
            self.log.warning(&format!(
                "Conftest found {violations_count} policy violation(s)"
            ));
            self.log.info("Conftest output:");
            if !output.stdout.is_empty() {
                self.log.info(&output.stdout);
            }
            if !output.stderr.is_empty() {
                self.log.error(&output.stderr);
            }
        }

        Ok(Validation {
            passed,
            violations_count,
        })
    }
}

/// Best-effort violation count scraped from conftest's text output.
///
/// Rules, first match wins:
/// 1. the number of literal `FAIL` occurrences, when there is at least one;
/// 2. the number captured by `N violation`, `N test ... fail`, or `N deny`
///    (case-insensitive, tried in that order);
/// 3. `1` when the text mentions `fail` or `deny` in any case;
/// 4. `0`.
pub(crate) fn count_violations(output: &str) -> u64 {
    let fails = output.matches("FAIL").count();
    if fails > 0 {
        return fails as u64;
    }

    for pattern in COUNT_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(output) {
            let digits = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            // Digit runs too long for u64 saturate rather than fail.
            return digits.parse().unwrap_or(u64::MAX);
        }
    }

    let lower = output.to_lowercase();
    if lower.contains("fail") || lower.contains("deny") {
        return 1;
    }
    0
}
