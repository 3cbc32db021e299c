//! Subprocess capability used by every stage that shells out.
use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;
use wait_timeout::ChildExt;

use crate::error::StepError;
use crate::host::Log;

/// Per-invocation knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RunOptions {
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) capture_stdout: bool,
    pub(crate) capture_stderr: bool,
    /// Report a non-zero exit through `CommandOutput::exit_code` instead of failing.
    pub(crate) ignore_return_code: bool,
    pub(crate) timeout: Option<Duration>,
}

/// Exit code plus whatever streams were captured (empty when inherited).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CommandOutput {
    pub(crate) exit_code: i32,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

pub(crate) trait CommandRunner {
    fn run(&self, program: &str, args: &[&str], options: &RunOptions) -> Result<CommandOutput>;
}

/// Runs real processes, echoing each command line before it starts.
pub(crate) struct SystemRunner<'a> {
    log: &'a dyn Log,
}

impl<'a> SystemRunner<'a> {
    pub(crate) fn new(log: &'a dyn Log) -> Self {
        Self { log }
    }
}

impl CommandRunner for SystemRunner<'_> {
    fn run(&self, program: &str, args: &[&str], options: &RunOptions) -> Result<CommandOutput> {
        let resolved = resolve_program(program)?;
        let label = resolved.display().to_string();
        let mut line = Vec::with_capacity(args.len() + 1);
        line.push(label.as_str());
        line.extend(args.iter().copied());
        self.log
            .info(&format!("[command]{}", shell_words::join(line)));

        let mut command = Command::new(&resolved);
        command.args(args).stdin(Stdio::null());
        if let Some(cwd) = &options.cwd {
            command.current_dir(cwd);
        }
        command.stdout(stdio_for(options.capture_stdout));
        command.stderr(stdio_for(options.capture_stderr));

        let mut child = command
            .spawn()
            .with_context(|| format!("spawn {label}"))?;
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        // Descendants may still hold the pipes after a timeout kill, so the
        // readers are only joined once the child exited on its own.
        let status = wait_for_exit(&mut child, options.timeout, &label)?;
        let stdout = join_reader(stdout_reader)?;
        let stderr = join_reader(stderr_reader)?;

        let Some(exit_code) = status.code() else {
            return Err(StepError::Terminated { program: label }.into());
        };
        if exit_code != 0 && !options.ignore_return_code {
            return Err(StepError::NonZeroExit {
                program: label,
                code: exit_code,
            }
            .into());
        }
        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

/// Resolve bare program names on PATH; anything with a separator is used as-is.
fn resolve_program(program: &str) -> Result<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 || path.is_absolute() {
        if !path.exists() {
            return Err(StepError::ProgramNotFound(program.to_string()).into());
        }
        return Ok(path.to_path_buf());
    }
    which::which(program).map_err(|_| StepError::ProgramNotFound(program.to_string()).into())
}

fn stdio_for(capture: bool) -> Stdio {
    if capture {
        Stdio::piped()
    } else {
        Stdio::inherit()
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut stream: R) -> JoinHandle<std::io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        Ok(bytes)
    })
}

fn join_reader(reader: Option<JoinHandle<std::io::Result<Vec<u8>>>>) -> Result<String> {
    let Some(reader) = reader else {
        return Ok(String::new());
    };
    let bytes = reader
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
        .context("read child output")?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn wait_for_exit(child: &mut Child, timeout: Option<Duration>, label: &str) -> Result<ExitStatus> {
    let Some(timeout) = timeout else {
        return child.wait().with_context(|| format!("wait for {label}"));
    };
    match child
        .wait_timeout(timeout)
        .with_context(|| format!("wait for {label}"))?
    {
        Some(status) => Ok(status),
        None => {
            // The child may exit between the timeout and the kill.
            let _ = child.kill();
            let _ = child.wait();
            Err(StepError::TimedOut {
                program: label.to_string(),
                timeout,
            }
            .into())
        }
    }
}
