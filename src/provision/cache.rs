//! On-disk tool cache laid out the way CI runners lay out theirs:
//! `<root>/<tool>/<version>/<arch>/` plus a sibling `<arch>.complete` marker.
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const ARCH: &str = "x64";

#[derive(Debug, Clone)]
pub(crate) struct ToolCache {
    root: PathBuf,
}

impl ToolCache {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Use the runner's tool cache, else a per-user cache directory.
    pub(crate) fn from_env() -> Result<Self> {
        if let Some(root) = std::env::var_os("RUNNER_TOOL_CACHE").filter(|root| !root.is_empty()) {
            return Ok(Self::new(root));
        }
        let base = dirs::cache_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| anyhow!("cannot determine a cache directory"))?;
        Ok(Self::new(base.join("terraform-conftest").join("tool-cache")))
    }

    fn version_dir(&self, tool: &str, version: &str) -> PathBuf {
        self.root.join(tool).join(version)
    }

    /// Cached directory for `tool`@`version`, only if it was stored completely.
    pub(crate) fn find(&self, tool: &str, version: &str) -> Option<PathBuf> {
        let version_dir = self.version_dir(tool, version);
        let dir = version_dir.join(ARCH);
        let marker = version_dir.join(format!("{ARCH}.complete"));
        (dir.is_dir() && marker.is_file()).then_some(dir)
    }

    /// Copy the contents of `source` into the cache and return the cached directory.
    pub(crate) fn cache_dir(&self, source: &Path, tool: &str, version: &str) -> Result<PathBuf> {
        let version_dir = self.version_dir(tool, version);
        let dest = version_dir.join(ARCH);
        let marker = version_dir.join(format!("{ARCH}.complete"));

        if marker.exists() {
            fs::remove_file(&marker).with_context(|| format!("remove {}", marker.display()))?;
        }
        if dest.exists() {
            fs::remove_dir_all(&dest).with_context(|| format!("remove {}", dest.display()))?;
        }
        fs::create_dir_all(&dest).with_context(|| format!("create {}", dest.display()))?;
        copy_tree(source, &dest)?;
        fs::write(&marker, "").with_context(|| format!("write {}", marker.display()))?;
        Ok(dest)
    }
}

fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    for entry in fs::read_dir(source).with_context(|| format!("read {}", source.display()))? {
        let entry = entry.with_context(|| format!("read {}", source.display()))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if from.is_dir() {
            fs::create_dir_all(&to).with_context(|| format!("create {}", to.display()))?;
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to)
                .with_context(|| format!("copy {} to {}", from.display(), to.display()))?;
        }
    }
    Ok(())
}
