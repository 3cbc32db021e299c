//! The step itself: provision conftest, run terraform, validate, report.
//!
//! `run_step` is the only place errors are caught. Every failure below it
//! propagates here and becomes the run's failure message; policy violations are
//! an ordinary result that also fails the run, after the outputs are set.
use anyhow::Result;
use std::path::PathBuf;

use crate::cli::{StepArgs, StepInputs};
use crate::conftest::{PolicyValidator, Validation};
use crate::error::{kind_of, StepError};
use crate::host::{ActionHost, Log};
use crate::process::CommandRunner;
use crate::provision::{Provisioner, ReleaseSource, ToolCache};
use crate::terraform::{PlanRequest, PlanRunner};

/// Collaborators the step runs against.
pub(crate) struct Services<'a> {
    pub(crate) log: &'a dyn Log,
    pub(crate) runner: &'a dyn CommandRunner,
    pub(crate) releases: &'a dyn ReleaseSource,
    pub(crate) cache: ToolCache,
    pub(crate) scratch_root: Option<PathBuf>,
}

/// Run the step and record its terminal state on `host`.
pub(crate) fn run_step(args: StepArgs, services: &Services<'_>, host: &mut ActionHost) {
    match execute(args, services, host) {
        Ok(validation) if !validation.passed => {
            let message = format!(
                "Conftest validation failed with {} violation(s)",
                validation.violations_count
            );
            services.log.error(&message);
            host.set_failed(message);
        }
        Ok(_) => services
            .log
            .info("Terraform Conftest Action completed successfully"),
        Err(err) => fail(services.log, host, &err),
    }
}

/// Mark the run failed with the full error chain as its message.
pub(crate) fn fail(log: &dyn Log, host: &mut ActionHost, err: &anyhow::Error) {
    let message = format!("{err:#}");
    if let Some(kind) = kind_of(err) {
        log.debug(&format!("failure kind: {kind:?}"));
    }
    log.error(&message);
    host.set_failed(message);
}

/// Everything up to and including the outputs; returns the validation outcome.
fn execute(args: StepArgs, services: &Services<'_>, host: &mut ActionHost) -> Result<Validation> {
    let log = services.log;
    let inputs = args.into_inputs()?;
    log_inputs(log, &inputs);

    log.info("Setting up conftest...");
    let conftest = Provisioner::new(log, services.releases, services.cache.clone())
        .with_scratch_root(services.scratch_root.clone())
        .provision(&inputs.conftest_version)?;
    if let Some(dir) = conftest.parent() {
        if host.add_path(dir)? {
            log.debug(&format!("Added {} to PATH", dir.display()));
        }
    }
    log.info(&format!("Conftest available at: {}", conftest.display()));

    let mut plan_file = None;
    if inputs.run_terraform_test || inputs.run_terraform_plan {
        plan_file = PlanRunner::new(services.runner, log)
            .with_timeout(inputs.command_timeout)
            .run(&PlanRequest {
                working_dir: &inputs.working_directory,
                run_test: inputs.run_terraform_test,
                run_plan: inputs.run_terraform_plan,
                plan_file: &inputs.terraform_plan_file,
            })?;
    }

    let mut validation = Validation {
        passed: true,
        violations_count: 0,
    };
    if inputs.run_conftest {
        let plan_json = plan_file.as_deref().ok_or(StepError::PlanNotProduced)?;
        validation = PolicyValidator::new(services.runner, log)
            .with_timeout(inputs.command_timeout)
            .validate(&conftest, plan_json, &inputs.policy_path)?;
    }

    let mut outputs = Vec::with_capacity(3);
    if let Some(plan) = &plan_file {
        outputs.push(("plan-file", plan.display().to_string()));
    }
    outputs.push(("conftest-passed", validation.passed.to_string()));
    outputs.push(("violations-count", validation.violations_count.to_string()));
    host.set_outputs(&outputs)?;

    Ok(validation)
}

fn log_inputs(log: &dyn Log, inputs: &StepInputs) {
    log.info("Starting Terraform Conftest Action");
    log.info(&format!("Conftest version: {}", inputs.conftest_version));
    log.info(&format!("Policy path: {}", inputs.policy_path.display()));
    log.info(&format!(
        "Working directory: {}",
        inputs.working_directory.display()
    ));
    log.info(&format!("Run terraform test: {}", inputs.run_terraform_test));
    log.info(&format!("Run terraform plan: {}", inputs.run_terraform_plan));
    log.info(&format!("Run conftest: {}", inputs.run_conftest));
    log.info(&format!("Terraform plan file: {}", inputs.terraform_plan_file));
    if let Some(timeout) = inputs.command_timeout {
        log.info(&format!("Command timeout: {}s", timeout.as_secs()));
    }
}
