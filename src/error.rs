//! Failure taxonomy shared by every pipeline stage.
//!
//! Stages return `anyhow::Result` and raise these values for the failures the
//! orchestrator needs to tell apart; plain I/O failures travel as context-wrapped
//! `anyhow` errors instead.
use std::path::PathBuf;
use std::time::Duration;

/// Coarse classification of a [`StepError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    Configuration,
    Input,
    Resolution,
    NotFound,
    Subprocess,
    Conversion,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum StepError {
    #[error(
        "Cannot run conftest: terraform plan was not executed. Set run-terraform-plan to true."
    )]
    PlanNotProduced,

    #[error("Input required and not supplied: {0}")]
    MissingInput(&'static str),

    #[error("{what} does not exist: {}", path.display())]
    MissingPath { what: &'static str, path: PathBuf },

    #[error("Invalid value for input {name}: {reason}")]
    InvalidInput { name: &'static str, reason: String },

    #[error("Failed to fetch latest version: {0}")]
    VersionFetch(String),

    #[error("Failed to parse GitHub API response: {0}")]
    VersionParse(String),

    #[error("Conftest binary not found in extracted archive at: {}", .0.display())]
    BinaryNotFound(PathBuf),

    #[error("Unable to locate executable file: {0}")]
    ProgramNotFound(String),

    #[error("The process '{program}' failed with exit code {code}")]
    NonZeroExit { program: String, code: i32 },

    #[error("The process '{program}' was terminated by a signal")]
    Terminated { program: String },

    #[error("The process '{program}' timed out after {}s", timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("Failed to mark {} as executable: {reason}", path.display())]
    Permission { path: PathBuf, reason: String },

    #[error("Failed to convert terraform plan to JSON. Exit code: {0}")]
    Conversion(i32),
}

impl StepError {
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            StepError::PlanNotProduced => ErrorKind::Configuration,
            StepError::MissingInput(_)
            | StepError::MissingPath { .. }
            | StepError::InvalidInput { .. } => ErrorKind::Input,
            StepError::VersionFetch(_) | StepError::VersionParse(_) => ErrorKind::Resolution,
            StepError::BinaryNotFound(_) => ErrorKind::NotFound,
            StepError::ProgramNotFound(_)
            | StepError::NonZeroExit { .. }
            | StepError::Terminated { .. }
            | StepError::TimedOut { .. }
            | StepError::Permission { .. } => ErrorKind::Subprocess,
            StepError::Conversion(_) => ErrorKind::Conversion,
        }
    }
}

/// Classify an error chain by the first [`StepError`] found in it.
pub(crate) fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<StepError>())
        .map(StepError::kind)
}
