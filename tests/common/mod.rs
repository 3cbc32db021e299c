//! Shared test infrastructure for integration tests.
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Conftest version seeded into the fixture's tool cache.
pub const CONFTEST_VERSION: &str = "0.56.0";

const FAKE_TERRAFORM: &str = r#"#!/bin/sh
case "$1" in
  init|test) echo "terraform $1 ok" ;;
  plan) echo "plan" > "$3" ;;
  show) echo '{"format_version":"1.2","resource_changes":[]}' ;;
  *) echo "unexpected terraform command: $*" >&2; exit 64 ;;
esac
"#;

/// Fails every plan when the policy directory contains a `deny.rego`.
const FAKE_CONFTEST: &str = r#"#!/bin/sh
if [ -f "$4/deny.rego" ]; then
  echo "FAIL - $2 - main - everything is denied"
  echo "1 test, 0 passed, 0 warnings, 1 failure, 0 exceptions"
  exit 1
fi
echo "1 test, 1 passed, 0 warnings, 0 failures, 0 exceptions"
"#;

/// A runner-like sandbox: fake terraform on PATH, a pre-seeded tool cache,
/// and the host's output and PATH files.
pub struct StepFixture {
    pub temp: TempDir,
    pub working_dir: PathBuf,
    pub policy_dir: PathBuf,
    pub output_file: PathBuf,
    pub path_file: PathBuf,
    bin_dir: PathBuf,
    tool_cache: PathBuf,
}

/// Exit status plus the parsed step outputs of one run.
pub struct StepResult {
    pub success: bool,
    pub outputs: BTreeMap<String, String>,
    pub stdout: String,
    pub stderr: String,
}

impl StepFixture {
    pub fn new() -> anyhow::Result<Self> {
        let temp = TempDir::new()?;
        let root = temp.path().to_path_buf();

        let bin_dir = root.join("bin");
        fs::create_dir_all(&bin_dir)?;
        write_script(&bin_dir.join("terraform"), FAKE_TERRAFORM)?;

        let tool_cache = root.join("tool-cache");
        let version_dir = tool_cache.join("conftest").join(CONFTEST_VERSION);
        fs::create_dir_all(version_dir.join("x64"))?;
        write_script(&version_dir.join("x64").join("conftest"), FAKE_CONFTEST)?;
        fs::write(version_dir.join("x64.complete"), "")?;

        let working_dir = root.join("infra");
        fs::create_dir_all(&working_dir)?;
        fs::write(working_dir.join("main.tf"), "")?;
        let policy_dir = root.join("policy");
        fs::create_dir_all(&policy_dir)?;
        fs::create_dir_all(root.join("runner-temp"))?;

        Ok(Self {
            output_file: root.join("github_output"),
            path_file: root.join("github_path"),
            working_dir,
            policy_dir,
            bin_dir,
            tool_cache,
            temp,
        })
    }

    /// Check if `sh` is available; skip test if not.
    pub fn skip_if_shell_missing(&self) -> bool {
        let missing = which::which("sh").is_err();
        if missing {
            eprintln!("Skipping: sh not available");
        }
        missing
    }

    pub fn add_policy(&self, name: &str, contents: &str) -> anyhow::Result<()> {
        fs::write(self.policy_dir.join(name), contents)?;
        Ok(())
    }

    /// Run the step binary with `extra` flags on top of the fixture's inputs.
    pub fn run(&self, extra: &[&str]) -> anyhow::Result<StepResult> {
        let mut path = OsString::from(&self.bin_dir);
        if let Some(existing) = env::var_os("PATH") {
            path.push(":");
            path.push(existing);
        }

        let mut command = Command::new(env!("CARGO_BIN_EXE_tfconftest"));
        command
            .arg("--conftest-version")
            .arg(format!("v{CONFTEST_VERSION}"))
            .arg("--working-directory")
            .arg(&self.working_dir)
            .arg("--policy-path")
            .arg(&self.policy_dir)
            .args(extra)
            .env("PATH", path)
            .env("RUNNER_TOOL_CACHE", &self.tool_cache)
            .env("RUNNER_TEMP", self.temp.path().join("runner-temp"))
            .env("GITHUB_OUTPUT", &self.output_file)
            .env("GITHUB_PATH", &self.path_file)
            .env_remove("GITHUB_ACTIONS")
            .env_remove("GITHUB_TOKEN")
            .env_remove("RUST_LOG");
        for (name, _) in env::vars_os() {
            if name.to_string_lossy().starts_with("INPUT_") {
                command.env_remove(&name);
            }
        }

        let Output {
            status,
            stdout,
            stderr,
        } = command.output()?;
        let outputs = match fs::read_to_string(&self.output_file) {
            Ok(contents) => parse_output_file(&contents),
            Err(_) => BTreeMap::new(),
        };
        Ok(StepResult {
            success: status.success(),
            outputs,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

fn write_script(path: &Path, contents: &str) -> anyhow::Result<()> {
    fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Read back `name<<DELIM` blocks from a GITHUB_OUTPUT-style file.
fn parse_output_file(contents: &str) -> BTreeMap<String, String> {
    let mut outputs = BTreeMap::new();
    let mut lines = contents.lines();
    while let Some(header) = lines.next() {
        let Some((name, delimiter)) = header.split_once("<<") else {
            continue;
        };
        let value: Vec<&str> = lines.by_ref().take_while(|line| *line != delimiter).collect();
        outputs.insert(name.to_string(), value.join("\n"));
    }
    outputs
}
