//! Conftest provisioning: resolve a version, reuse the tool cache, or download,
//! extract, and cache a fresh copy.
mod archive;
mod cache;
mod release;

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use crate::error::StepError;
use crate::host::Log;

pub(crate) use cache::ToolCache;
pub(crate) use release::{GithubReleases, ReleaseSource};

pub(crate) const BINARY_NAME: &str = "conftest";
const LATEST: &str = "latest";

/// Strip one leading `v`.
pub(crate) fn normalize_version(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

pub(crate) struct Provisioner<'a> {
    log: &'a dyn Log,
    source: &'a dyn ReleaseSource,
    cache: ToolCache,
    scratch_root: Option<PathBuf>,
}

impl<'a> Provisioner<'a> {
    pub(crate) fn new(log: &'a dyn Log, source: &'a dyn ReleaseSource, cache: ToolCache) -> Self {
        Self {
            log,
            source,
            cache,
            scratch_root: None,
        }
    }

    /// Place download scratch directories under `root` instead of the system temp dir.
    pub(crate) fn with_scratch_root(mut self, root: Option<PathBuf>) -> Self {
        self.scratch_root = root;
        self
    }

    /// Return the path of an executable conftest for `request`.
    pub(crate) fn provision(&self, request: &str) -> Result<PathBuf> {
        let normalized = normalize_version(request);
        self.log
            .info(&format!("Setting up conftest version: {normalized}"));

        let version = if normalized == LATEST {
            let version = self.source.latest_version()?;
            self.log.info(&format!("Resolved latest version: {version}"));
            version
        } else {
            normalized.to_string()
        };

        if let Some(cached_dir) = self.cache.find(BINARY_NAME, &version) {
            self.log
                .info(&format!("Using cached conftest at: {}", cached_dir.display()));
            let binary = cached_dir.join(BINARY_NAME);
            if binary.is_file() {
                make_executable(&binary)?;
                return Ok(binary);
            }
            self.log.debug(&format!(
                "cached directory {} has no {BINARY_NAME}; downloading again",
                cached_dir.display()
            ));
        }

        self.download_and_cache(&version)
    }

    fn download_and_cache(&self, version: &str) -> Result<PathBuf> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("conftest-");
        let scratch = match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .context("create download directory")?;

        let url = self.source.archive_url(version);
        self.log.info(&format!("Downloading conftest from: {url}"));
        let archive_path = self.source.download(&url, scratch.path())?;
        self.log
            .info(&format!("Downloaded to: {}", archive_path.display()));

        let extract_dir = scratch.path().join("extract");
        std::fs::create_dir_all(&extract_dir)
            .with_context(|| format!("create {}", extract_dir.display()))?;
        archive::extract_tar_gz(&archive_path, &extract_dir)?;
        self.log
            .info(&format!("Extracted to: {}", extract_dir.display()));

        let extracted = archive::locate_binary(&extract_dir, BINARY_NAME)?
            .ok_or_else(|| StepError::BinaryNotFound(extract_dir.clone()))?;
        make_executable(&extracted)?;

        let binary_dir = extracted
            .parent()
            .ok_or_else(|| anyhow!("{} has no parent directory", extracted.display()))?;
        // Storage may relocate the file, so the result is rebuilt from the cached directory.
        let cached_dir = self.cache.cache_dir(binary_dir, BINARY_NAME, version)?;
        let cached_binary = cached_dir.join(BINARY_NAME);
        self.log
            .info(&format!("Cached conftest at: {}", cached_binary.display()));
        Ok(cached_binary)
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let permission_error = |err: std::io::Error| StepError::Permission {
        path: path.to_path_buf(),
        reason: err.to_string(),
    };
    let mut permissions = std::fs::metadata(path)
        .map_err(permission_error)?
        .permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    std::fs::set_permissions(path, permissions).map_err(permission_error)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
