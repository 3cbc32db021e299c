use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod conftest;
mod error;
mod host;
mod pipeline;
mod process;
mod provision;
mod terraform;

use cli::StepArgs;
use host::{ActionHost, ActionLog};
use pipeline::Services;
use process::SystemRunner;
use provision::{GithubReleases, ToolCache};

fn main() -> ExitCode {
    init_tracing();
    let args = StepArgs::parse();

    let log = ActionLog::from_env();
    let mut host = ActionHost::from_env();
    match ToolCache::from_env() {
        Ok(cache) => {
            let runner = SystemRunner::new(&log);
            let releases = GithubReleases::from_env();
            let services = Services {
                log: &log,
                runner: &runner,
                releases: &releases,
                cache,
                scratch_root: std::env::var_os("RUNNER_TEMP")
                    .filter(|dir| !dir.is_empty())
                    .map(PathBuf::from),
            };
            pipeline::run_step(args, &services, &mut host);
        }
        Err(err) => pipeline::fail(&log, &mut host, &err),
    }

    if host.failure().is_some() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// `RUST_LOG` wins; otherwise the runner's debug switch picks the level.
fn init_tracing() {
    let default_level = if std::env::var("RUNNER_DEBUG").is_ok_and(|value| value == "1") {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}
