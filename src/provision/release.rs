//! Upstream release metadata and asset downloads.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::StepError;

pub(crate) const CONFTEST_REPO: &str = "open-policy-agent/conftest";
const API_BASE: &str = "https://api.github.com";
const DOWNLOAD_BASE: &str = "https://github.com";
const USER_AGENT: &str = "actions-terraform-conftest";
const PLATFORM: &str = "Linux_x86_64";

/// Where release versions and archives come from.
pub(crate) trait ReleaseSource {
    /// Newest published version, without the leading `v`.
    fn latest_version(&self) -> Result<String>;

    fn archive_url(&self, version: &str) -> String;

    /// Fetch `url` into `dest_dir`, returning the downloaded file.
    fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf>;
}

/// GitHub releases of the upstream repository.
#[derive(Debug, Clone)]
pub(crate) struct GithubReleases {
    token: Option<String>,
    api_base: String,
}

impl GithubReleases {
    pub(crate) fn new(token: Option<String>) -> Self {
        Self {
            token,
            api_base: API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.to_string();
        self
    }

    pub(crate) fn from_env() -> Self {
        Self::new(std::env::var("GITHUB_TOKEN").ok().filter(|token| !token.is_empty()))
    }
}

#[derive(Deserialize)]
struct Release {
    tag_name: String,
}

impl ReleaseSource for GithubReleases {
    fn latest_version(&self) -> Result<String> {
        let url = format!("{}/repos/{CONFTEST_REPO}/releases/latest", self.api_base);
        // Error statuses still carry a JSON body; it fails the tag_name parse below.
        let mut request = ureq::get(&url)
            .config()
            .http_status_as_error(false)
            .build()
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github.v3+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let mut response = request
            .call()
            .map_err(|err| StepError::VersionFetch(err.to_string()))?;
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|err| StepError::VersionFetch(err.to_string()))?;
        Ok(parse_release_tag(&body)?)
    }

    fn archive_url(&self, version: &str) -> String {
        archive_url(version)
    }

    fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        let file_name = url.rsplit('/').next().unwrap_or("download");
        let dest = dest_dir.join(file_name);
        let response = ureq::get(url)
            .header("User-Agent", USER_AGENT)
            .call()
            .with_context(|| format!("download {url}"))?;
        let mut reader = response.into_body().into_reader();
        let file = File::create(&dest).with_context(|| format!("create {}", dest.display()))?;
        let mut writer = BufWriter::new(file);
        std::io::copy(&mut reader, &mut writer).with_context(|| format!("download {url}"))?;
        writer
            .flush()
            .with_context(|| format!("write {}", dest.display()))?;
        Ok(dest)
    }
}

/// Release asset URL for the single supported platform.
pub(crate) fn archive_url(version: &str) -> String {
    format!(
        "{DOWNLOAD_BASE}/{CONFTEST_REPO}/releases/download/v{version}/conftest_{version}_{PLATFORM}.tar.gz"
    )
}

/// Pull `tag_name` out of a release metadata document.
pub(crate) fn parse_release_tag(body: &str) -> Result<String, StepError> {
    let release: Release =
        serde_json::from_str(body).map_err(|err| StepError::VersionParse(err.to_string()))?;
    Ok(super::normalize_version(&release.tag_name).to_string())
}
