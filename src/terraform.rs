//! Terraform init/test/plan against a working directory.
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StepError;
use crate::host::Log;
use crate::process::{CommandRunner, RunOptions};

const TERRAFORM: &str = "terraform";
/// Binary plan artifact, relative to the working directory.
pub(crate) const PLAN_BINARY_FILE: &str = "tfplan.binary";

/// Which terraform steps to run.
#[derive(Debug, Clone)]
pub(crate) struct PlanRequest<'a> {
    pub(crate) working_dir: &'a Path,
    pub(crate) run_test: bool,
    pub(crate) run_plan: bool,
    pub(crate) plan_file: &'a str,
}

pub(crate) struct PlanRunner<'a> {
    runner: &'a dyn CommandRunner,
    log: &'a dyn Log,
    timeout: Option<Duration>,
}

impl<'a> PlanRunner<'a> {
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

    /// Run init, then test and plan as requested; returns the plan JSON path when planned.
    pub(crate) fn run(&self, request: &PlanRequest<'_>) -> Result<Option<PathBuf>> {
        if !request.working_dir.exists() {
            return Err(StepError::MissingPath {
                what: "Working directory",
                path: request.working_dir.to_path_buf(),
            }
            .into());
        }

        self.log.info("Running terraform init...");
        self.terraform(request.working_dir, &["init"])?;

        if request.run_test {
            self.log.info("Running terraform test...");
            self.terraform(request.working_dir, &["test"])?;
        }

        if !request.run_plan {
            return Ok(None);
        }
        self.plan(request.working_dir, request.plan_file).map(Some)
    }

    fn plan(&self, working_dir: &Path, plan_file: &str) -> Result<PathBuf> {
        self.log.info("Running terraform plan...");
        let plan_json = plan_json_path(working_dir, plan_file)?;

        self.terraform(working_dir, &["plan", "-out", PLAN_BINARY_FILE])?;

        self.log
            .info(&format!("Converting plan to JSON: {}", plan_json.display()));
        let options = RunOptions {
            cwd: Some(working_dir.to_path_buf()),
            capture_stdout: true,
            ignore_return_code: true,
            timeout: self.timeout,
            ..RunOptions::default()
        };
        let output = self
            .runner
            .run(TERRAFORM, &["show", "-json", PLAN_BINARY_FILE], &options)?;
        if output.exit_code != 0 {
            return Err(StepError::Conversion(output.exit_code).into());
        }

        std::fs::write(&plan_json, output.stdout.as_bytes())
            .with_context(|| format!("write {}", plan_json.display()))?;
        self.log
            .info(&format!("Plan JSON written to: {}", plan_json.display()));
        Ok(plan_json)
    }

    fn terraform(&self, working_dir: &Path, args: &[&str]) -> Result<()> {
        let options = RunOptions {
            cwd: Some(working_dir.to_path_buf()),
            timeout: self.timeout,
            ..RunOptions::default()
        };
        self.runner.run(TERRAFORM, args, &options)?;
        Ok(())
    }
}

/// The plan JSON always lands in the working directory under the file name part of `plan_file`.
pub(crate) fn plan_json_path(working_dir: &Path, plan_file: &str) -> Result<PathBuf> {
    let file_name = Path::new(plan_file)
        .file_name()
        .ok_or_else(|| StepError::InvalidInput {
            name: "terraform-plan-file",
            reason: format!("{plan_file:?} has no file name"),
        })?;
    Ok(working_dir.join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{kind_of, ErrorKind};
    use crate::host::testing::RecordingLog;
    use crate::process::testing::ScriptedRunner;
    use crate::process::CommandOutput;

    fn request<'a>(dir: &'a Path, run_test: bool, run_plan: bool) -> PlanRequest<'a> {
        PlanRequest {
            working_dir: dir,
            run_test,
            run_plan,
            plan_file: "tfplan.json",
        }
    }

    #[test]
    fn test_only_runs_init_then_test_and_returns_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RecordingLog::default();
        let runner = ScriptedRunner::default();
        let result = PlanRunner::new(&runner, &log)
            .run(&request(temp.path(), true, false))
            .expect("run");

        assert_eq!(result, None);
        assert_eq!(runner.subcommands(), ["init", "test"]);
        for call in runner.calls.borrow().iter() {
            assert_eq!(call.program, "terraform");
            assert_eq!(call.options.cwd.as_deref(), Some(temp.path()));
        }
    }

    #[test]
    fn plan_writes_captured_json_into_working_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RecordingLog::default();
        let plan = r#"{"format_version":"1.2","resource_changes":[]}"#;
        let runner = ScriptedRunner::default().respond(
            "terraform show",
            CommandOutput {
                exit_code: 0,
                stdout: plan.to_string(),
                stderr: String::new(),
            },
        );
        let result = PlanRunner::new(&runner, &log)
            .run(&request(temp.path(), false, true))
            .expect("run");

        let plan_json = temp.path().join("tfplan.json");
        assert_eq!(result, Some(plan_json.clone()));
        assert_eq!(std::fs::read_to_string(&plan_json).expect("read"), plan);
        assert_eq!(runner.subcommands(), ["init", "plan", "show"]);

        let calls = runner.calls.borrow();
        assert_eq!(calls[1].args, ["plan", "-out", "tfplan.binary"]);
        assert_eq!(calls[2].args, ["show", "-json", "tfplan.binary"]);
        assert!(calls[2].options.capture_stdout);
        assert!(calls[2].options.ignore_return_code);
    }

    #[test]
    fn show_failure_is_a_conversion_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RecordingLog::default();
        let runner = ScriptedRunner::default().respond(
            "terraform show",
            CommandOutput {
                exit_code: 1,
                ..CommandOutput::default()
            },
        );
        let err = PlanRunner::new(&runner, &log)
            .run(&request(temp.path(), true, true))
            .expect_err("show fails");

        assert_eq!(kind_of(&err), Some(ErrorKind::Conversion));
        assert_eq!(
            err.to_string(),
            "Failed to convert terraform plan to JSON. Exit code: 1"
        );
        assert!(!temp.path().join("tfplan.json").exists());
    }

    #[test]
    fn init_failure_stops_the_sequence() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RecordingLog::default();
        let runner = ScriptedRunner::default().respond(
            "terraform init",
            CommandOutput {
                exit_code: 1,
                ..CommandOutput::default()
            },
        );
        let err = PlanRunner::new(&runner, &log)
            .run(&request(temp.path(), true, true))
            .expect_err("init fails");

        assert_eq!(kind_of(&err), Some(ErrorKind::Subprocess));
        assert_eq!(runner.subcommands(), ["init"]);
    }

    #[test]
    fn missing_working_dir_fails_before_any_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = temp.path().join("nope");
        let log = RecordingLog::default();
        let runner = ScriptedRunner::default();
        let err = PlanRunner::new(&runner, &log)
            .run(&request(&missing, true, true))
            .expect_err("missing dir");

        assert_eq!(kind_of(&err), Some(ErrorKind::Input));
        assert!(err.to_string().starts_with("Working directory does not exist"));
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn plan_file_keeps_only_its_file_name() {
        let dir = Path::new("/work/infra");
        assert_eq!(
            plan_json_path(dir, "tfplan.json").expect("path"),
            dir.join("tfplan.json")
        );
        assert_eq!(
            plan_json_path(dir, "out/plans/prod.json").expect("path"),
            dir.join("prod.json")
        );
        let err = plan_json_path(dir, "..").expect_err("no file name");
        assert_eq!(kind_of(&err), Some(ErrorKind::Input));
    }

    #[test]
    fn timeout_is_forwarded_to_every_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RecordingLog::default();
        let runner = ScriptedRunner::default();
        let timeout = Some(Duration::from_secs(30));
        PlanRunner::new(&runner, &log)
            .with_timeout(timeout)
            .run(&request(temp.path(), true, true))
            .expect("run");
        assert!(runner
            .calls
            .borrow()
            .iter()
            .all(|call| call.options.timeout == timeout));
    }
}
