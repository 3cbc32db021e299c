//! The CI host seam: logging capability, step outputs, PATH export, and the
//! failed-run flag.
//!
//! Outputs and PATH additions use the host's file-command protocol when the
//! corresponding file is advertised through the environment, and fall back to
//! stdout workflow commands otherwise.
use anyhow::{anyhow, Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Logging capability handed to every pipeline stage.
pub(crate) trait Log {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warning(&self, message: &str);
    fn error(&self, message: &str);
}

/// Log through `tracing`, adding host annotations for warnings and errors.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ActionLog {
    annotate: bool,
}

impl ActionLog {
    pub(crate) fn from_env() -> Self {
        let annotate = std::env::var("GITHUB_ACTIONS").is_ok_and(|value| value == "true");
        Self { annotate }
    }
}

impl Log for ActionLog {
    fn debug(&self, message: &str) {
        tracing::debug!("{message}");
    }

    fn info(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn warning(&self, message: &str) {
        tracing::warn!("{message}");
        if self.annotate {
            println!("::warning::{}", escape_data(message));
        }
    }

    fn error(&self, message: &str) {
        tracing::error!("{message}");
        if self.annotate {
            println!("::error::{}", escape_data(message));
        }
    }
}

/// Escape a workflow-command payload.
pub(crate) fn escape_data(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn escape_property(value: &str) -> String {
    escape_data(value).replace(':', "%3A").replace(',', "%2C")
}

/// Step outputs and terminal state for one run.
#[derive(Debug, Default)]
pub(crate) struct ActionHost {
    output_file: Option<PathBuf>,
    path_file: Option<PathBuf>,
    failure: Option<String>,
}

impl ActionHost {
    pub(crate) fn from_env() -> Self {
        Self::new(
            non_empty_env("GITHUB_OUTPUT").map(PathBuf::from),
            non_empty_env("GITHUB_PATH").map(PathBuf::from),
        )
    }

    pub(crate) fn new(output_file: Option<PathBuf>, path_file: Option<PathBuf>) -> Self {
        Self {
            output_file,
            path_file,
            failure: None,
        }
    }

    /// Publish several outputs at once: either all of them are written or none.
    pub(crate) fn set_outputs(&mut self, outputs: &[(&str, String)]) -> Result<()> {
        match &self.output_file {
            Some(path) => {
                let mut entries = String::new();
                for (name, value) in outputs {
                    entries.push_str(&file_command_entry(name, value)?);
                }
                append_line(path, &entries)
                    .with_context(|| format!("write outputs to {}", path.display()))
            }
            None => {
                for (name, _) in outputs {
                    check_output_name(name)?;
                }
                for (name, value) in outputs {
                    println!(
                        "::set-output name={}::{}",
                        escape_property(name),
                        escape_data(value)
                    );
                }
                Ok(())
            }
        }
    }

    /// Make `dir` visible on PATH for later steps of the job.
    pub(crate) fn add_path(&mut self, dir: &Path) -> Result<bool> {
        let Some(path_file) = &self.path_file else {
            return Ok(false);
        };
        append_line(path_file, &format!("{}\n", dir.display()))
            .with_context(|| format!("append PATH entry to {}", path_file.display()))?;
        Ok(true)
    }

    pub(crate) fn set_failed(&mut self, message: impl Into<String>) {
        self.failure = Some(message.into());
    }

    pub(crate) fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn check_output_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['\r', '\n']) || name.contains("<<") {
        return Err(anyhow!("invalid output name {name:?}"));
    }
    Ok(())
}

fn file_command_entry(name: &str, value: &str) -> Result<String> {
    check_output_name(name)?;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let delimiter = format!("ghadelimiter_{}_{nanos}", std::process::id());
    if name.contains(&delimiter) || value.contains(&delimiter) {
        return Err(anyhow!(
            "unexpected input: output {name} contains the delimiter {delimiter}"
        ));
    }
    Ok(format!("{name}<<{delimiter}\n{value}\n{delimiter}\n"))
}

fn append_line(path: &Path, text: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(text.as_bytes())
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Read back outputs written with the file-command protocol.
#[cfg(test)]
pub(crate) fn parse_output_file(contents: &str) -> std::collections::BTreeMap<String, String> {
    let mut outputs = std::collections::BTreeMap::new();
    let mut lines = contents.lines();
    while let Some(header) = lines.next() {
        let Some((name, delimiter)) = header.split_once("<<") else {
            continue;
        };
        let mut value = Vec::new();
        for line in lines.by_ref() {
            if line == delimiter {
                break;
            }
            value.push(line);
        }
        outputs.insert(name.to_string(), value.join("\n"));
    }
    outputs
}
