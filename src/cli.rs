//! Step inputs.
//!
//! Every input can come from a flag or from the `INPUT_*` variable the CI host
//! exports for it; flags win. Values stay raw strings until `into_inputs`, so a
//! bad value fails the run like any other step error instead of exiting with
//! a usage message.
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::StepError;

pub const DEFAULT_CONFTEST_VERSION: &str = "latest";
pub const DEFAULT_POLICY_PATH: &str = "./policy";
pub const DEFAULT_WORKING_DIRECTORY: &str = ".";
pub const DEFAULT_PLAN_FILE: &str = "tfplan.json";

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "tfconftest",
    version,
    about = "Plan Terraform and validate the plan against conftest policies"
)]
pub struct StepArgs {
    /// Conftest release to use ("latest" or a version, optionally v-prefixed)
    #[arg(long, value_name = "VERSION", env = "INPUT_CONFTEST-VERSION")]
    pub conftest_version: Option<String>,

    /// Directory or file holding the Rego policies
    #[arg(long, value_name = "PATH", env = "INPUT_POLICY-PATH")]
    pub policy_path: Option<String>,

    /// Terraform working directory
    #[arg(long, value_name = "DIR", env = "INPUT_WORKING-DIRECTORY")]
    pub working_directory: Option<String>,

    /// Run `terraform test` after init (true/false)
    #[arg(long, value_name = "BOOL", env = "INPUT_RUN-TERRAFORM-TEST")]
    pub run_terraform_test: Option<String>,

    /// Run `terraform plan` and export the plan as JSON (true/false)
    #[arg(long, value_name = "BOOL", env = "INPUT_RUN-TERRAFORM-PLAN")]
    pub run_terraform_plan: Option<String>,

    /// Validate the plan JSON with conftest (true/false)
    #[arg(long, value_name = "BOOL", env = "INPUT_RUN-CONFTEST")]
    pub run_conftest: Option<String>,

    /// File name for the plan JSON, written inside the working directory
    #[arg(long, value_name = "FILE", env = "INPUT_TERRAFORM-PLAN-FILE")]
    pub terraform_plan_file: Option<String>,

    /// Kill any terraform or conftest command running longer than this many seconds
    #[arg(long, value_name = "SECONDS", env = "INPUT_COMMAND-TIMEOUT")]
    pub command_timeout: Option<String>,
}

/// Inputs with defaults applied, in the order the step reads them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInputs {
    pub conftest_version: String,
    pub policy_path: PathBuf,
    pub working_directory: PathBuf,
    pub run_terraform_test: bool,
    pub run_terraform_plan: bool,
    pub run_conftest: bool,
    pub terraform_plan_file: String,
    pub command_timeout: Option<Duration>,
}

impl StepArgs {
    pub fn into_inputs(self) -> Result<StepInputs, StepError> {
        Ok(StepInputs {
            conftest_version: or_default(self.conftest_version, DEFAULT_CONFTEST_VERSION),
            policy_path: PathBuf::from(or_default(self.policy_path, DEFAULT_POLICY_PATH)),
            working_directory: PathBuf::from(or_default(
                self.working_directory,
                DEFAULT_WORKING_DIRECTORY,
            )),
            run_terraform_test: required_bool("run-terraform-test", self.run_terraform_test)?,
            run_terraform_plan: required_bool("run-terraform-plan", self.run_terraform_plan)?,
            run_conftest: required_bool("run-conftest", self.run_conftest)?,
            terraform_plan_file: or_default(self.terraform_plan_file, DEFAULT_PLAN_FILE),
            command_timeout: timeout(self.command_timeout)?,
        })
    }
}

fn or_default(value: Option<String>, default: &str) -> String {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn required_bool(name: &'static str, raw: Option<String>) -> Result<bool, StepError> {
    let raw = raw.unwrap_or_default();
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StepError::MissingInput(name));
    }
    parse_input_bool(raw).ok_or_else(|| StepError::InvalidInput {
        name,
        reason: format!(
            "{raw:?} does not meet YAML 1.2 \"Core Schema\" specification \
             (support boolean input list: `true | True | TRUE | false | False | FALSE`)"
        ),
    })
}

/// Booleans use the host's YAML 1.2 core-schema spellings only.
pub fn parse_input_bool(raw: &str) -> Option<bool> {
    match raw {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

fn timeout(raw: Option<String>) -> Result<Option<Duration>, StepError> {
    let raw = raw.unwrap_or_default();
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<u64>() {
        Ok(0) => Err(StepError::InvalidInput {
            name: "command-timeout",
            reason: "must be at least one second".to_string(),
        }),
        Ok(secs) => Ok(Some(Duration::from_secs(secs))),
        Err(err) => Err(StepError::InvalidInput {
            name: "command-timeout",
            reason: format!("{raw:?} is not a number of seconds: {err}"),
        }),
    }
}
