//! Release feed lookup and platform asset selection.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

const METADATA_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
/// Upper bound on a downloaded asset.
const MAX_ASSET_BYTES: u64 = 512 * 1024 * 1024;

/// Name fragments that rule an asset out unless the target pattern contains them.
const SKIP_PATTERNS: &[&str] = &[
    "windows", "linux", "darwin", "checksum", ".sha256", ".md5", ".sig", ".asc",
];

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseInfo {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
}

/// Operating system and architecture in release-asset naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub os: String,
    pub arch: String,
}

impl Target {
    pub fn new(os: &str, arch: &str) -> Self {
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }

    /// The platform this binary was built for.
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        Self::new(os, arch)
    }

    /// `{os}_{arch}`, the fragment an asset name must contain.
    pub fn pattern(&self) -> String {
        format!("{}_{}", self.os, self.arch)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// Picks the first asset built for `target`.
///
/// Names are compared lower-cased. Assets mentioning another OS family, and
/// checksum or signature files, are skipped even if they contain the pattern.
pub fn select_asset<'a>(assets: &'a [ReleaseAsset], target: &Target) -> Option<&'a ReleaseAsset> {
    let pattern = target.pattern();

    assets.iter().find(|asset| {
        let name = asset.name.to_lowercase();
        let excluded = SKIP_PATTERNS
            .iter()
            .any(|skip| name.contains(skip) && !pattern.contains(skip));
        !excluded && name.contains(&pattern)
    })
}

fn user_agent() -> String {
    format!("proxy-manager/{}", env!("CARGO_PKG_VERSION"))
}

/// Fetches release metadata from `feed_url`.
pub fn fetch_latest_release(feed_url: &str) -> Result<ReleaseInfo> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(METADATA_TIMEOUT))
        .build()
        .into();

    let mut request = agent
        .get(feed_url)
        .header("User-Agent", user_agent())
        .header("Accept", "application/vnd.github+json");

    if let Ok(token) = std::env::var("GITHUB_TOKEN") {
        request = request.header("Authorization", format!("Bearer {}", token));
    }

    let body = request
        .call()
        .context("Failed to fetch release info")?
        .body_mut()
        .read_to_string()
        .context("Failed to read release response")?;

    serde_json::from_str(&body).context("Failed to parse release info")
}

/// Downloads an asset's bytes in full.
pub fn download_asset(url: &str) -> Result<Vec<u8>> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(DOWNLOAD_TIMEOUT))
        .build()
        .into();

    agent
        .get(url)
        .header("User-Agent", user_agent())
        .call()
        .with_context(|| format!("Failed to download {}", url))?
        .body_mut()
        .with_config()
        .limit(MAX_ASSET_BYTES)
        .read_to_vec()
        .context("Failed to read asset body")
}

#[cfg(test)]
#[path = "tests/release_tests.rs"]
mod tests;
