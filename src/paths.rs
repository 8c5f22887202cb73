//! Filesystem layout used by the manager.
//!
//! - `~/.local/share/proxy-manager/` - installed binary and generated proxy config
//! - `~/.cli-proxy-api/` - auth files written by the managed process
//! - `~/.config/proxy-manager/config.json` - user settings

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "proxy-manager";
const AUTH_DIR_NAME: &str = ".cli-proxy-api";
const PROXY_CONFIG_FILE: &str = "config.yaml";
const APP_CONFIG_FILE: &str = "config.json";

/// File name of the managed executable once installed.
#[cfg(windows)]
pub const BINARY_NAME: &str = "CLIProxyAPI.exe";
#[cfg(not(windows))]
pub const BINARY_NAME: &str = "CLIProxyAPI";

/// Locations of everything the manager reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerPaths {
    pub app_dir: PathBuf,
    pub auth_dir: PathBuf,
    pub binary_path: PathBuf,
    pub proxy_config_path: PathBuf,
}

impl ManagerPaths {
    /// Home-based layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        let app_dir = home.join(".local").join("share").join(APP_DIR_NAME);
        Ok(Self::layout(app_dir, home.join(AUTH_DIR_NAME)))
    }

    /// The same layout rooted at `root`, for tests and portable installs.
    pub fn under(root: &Path) -> Self {
        Self::layout(root.join(APP_DIR_NAME), root.join(AUTH_DIR_NAME))
    }

    fn layout(app_dir: PathBuf, auth_dir: PathBuf) -> Self {
        Self {
            binary_path: app_dir.join(BINARY_NAME),
            proxy_config_path: app_dir.join(PROXY_CONFIG_FILE),
            app_dir,
            auth_dir,
        }
    }

    /// Creates the app and auth directories if they don't exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.app_dir, &self.auth_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Directory the managed process runs in.
    pub fn working_dir(&self) -> &Path {
        self.binary_path.parent().unwrap_or(&self.app_dir)
    }
}

/// Returns the user settings path: `~/.config/proxy-manager/config.json`
pub fn app_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home
        .join(".config")
        .join(APP_DIR_NAME)
        .join(APP_CONFIG_FILE))
}
