//! Self-installation of the managed binary from the release feed.
//!
//! Stages, with the progress reported after each:
//! - fetch release metadata (0.1)
//! - pick the asset for this platform
//! - download it (0.6 once received, 0.7 once confirmed)
//! - unpack in a temp dir and swap the binary in (1.0)

pub mod archive;
pub mod release;

use crate::errors::{ManagerError, ManagerResult};
use crate::store::{LogLevel, StateStore};
use anyhow::Context;
use archive::InstallPayload;
use release::{ReleaseAsset, Target};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const PROGRESS_METADATA: f64 = 0.1;
pub const PROGRESS_RECEIVED: f64 = 0.6;
pub const PROGRESS_CONFIRMED: f64 = 0.7;
pub const PROGRESS_DONE: f64 = 1.0;

/// Inputs of one install run.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub feed_url: String,
    pub target: Target,
    pub destination: PathBuf,
    /// Parent of the scratch directory used while unpacking.
    pub work_dir: PathBuf,
}

/// Claims the single install slot; dropping the guard releases it.
///
/// The guard owns its store handle so it can move into the blocking task
/// that does the work.
pub struct InstallSlot {
    store: Arc<StateStore>,
}

impl InstallSlot {
    /// Fails with `InstallInProgress` if another install holds the slot.
    pub fn acquire(store: &Arc<StateStore>) -> ManagerResult<Self> {
        store.mutate(|s| {
            if s.state.installing {
                return Err(ManagerError::InstallInProgress);
            }
            s.state.installing = true;
            s.state.install_progress = 0.0;
            s.state.last_error = None;
            Ok(())
        })?;
        Ok(Self {
            store: Arc::clone(store),
        })
    }
}

impl Drop for InstallSlot {
    fn drop(&mut self) {
        self.store.mutate(|s| s.state.installing = false);
    }
}

/// Runs every install stage. Blocking; call from a blocking context.
///
/// The caller must hold an [`InstallSlot`]. Any failure is recorded as the
/// last error and logged before it is returned.
pub fn run_install(store: &StateStore, request: &InstallRequest) -> ManagerResult<PathBuf> {
    store.append_log(LogLevel::Info, "Starting proxy binary download...");

    let result = install_stages(store, request);
    match &result {
        Ok(path) => store.append_log(
            LogLevel::Info,
            format!("Proxy binary installed to {}", path.display()),
        ),
        Err(e) => store.mutate(|s| s.record_error(e.to_string())),
    }
    result
}

fn install_stages(store: &StateStore, request: &InstallRequest) -> ManagerResult<PathBuf> {
    let release =
        release::fetch_latest_release(&request.feed_url).map_err(ManagerError::download)?;
    store.set_install_progress(PROGRESS_METADATA);
    store.append_log(
        LogLevel::Debug,
        format!(
            "Latest release {} has {} assets",
            release.tag_name,
            release.assets.len()
        ),
    );

    let asset = release::select_asset(&release.assets, &request.target).ok_or_else(|| {
        ManagerError::NoCompatibleAsset {
            target: request.target.to_string(),
        }
    })?;
    store.append_log(LogLevel::Info, format!("Found asset: {}", asset.name));

    let bytes = release::download_asset(&asset.download_url).map_err(ManagerError::download)?;
    store.set_install_progress(PROGRESS_RECEIVED);
    if bytes.is_empty() {
        return Err(ManagerError::DownloadFailed {
            message: format!("{} downloaded zero bytes", asset.name),
        });
    }
    store.set_install_progress(PROGRESS_CONFIRMED);

    unpack_and_install(&bytes, asset, &request.destination, &request.work_dir)
        .map_err(ManagerError::extract)?;
    store.set_install_progress(PROGRESS_DONE);
    Ok(request.destination.clone())
}

/// Prefix of the scratch directory created under `work_dir` for each install.
pub const SCRATCH_PREFIX: &str = "proxy-manager-install-";

/// Writes `bytes` into a fresh scratch dir under `work_dir`, extracts the
/// executable and installs it.
///
/// The scratch dir is removed when this returns, whatever the outcome.
pub fn unpack_and_install(
    bytes: &[u8],
    asset: &ReleaseAsset,
    destination: &Path,
    work_dir: &Path,
) -> anyhow::Result<()> {
    let workspace = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir_in(work_dir)
        .with_context(|| format!("Failed to create temp directory in {}", work_dir.display()))?;

    let file_name = Path::new(&asset.name)
        .file_name()
        .context("Asset has no file name")?;
    let downloaded = workspace.path().join(file_name);
    std::fs::write(&downloaded, bytes)
        .with_context(|| format!("Failed to write {}", downloaded.display()))?;

    let extract_dir = workspace.path().join("extracted");
    std::fs::create_dir(&extract_dir).context("Failed to create extraction directory")?;

    let candidate =
        InstallPayload::classify(downloaded, &asset.name).extract_candidate(&extract_dir)?;
    archive::install_binary(&candidate, destination)
}

#[cfg(test)]
#[path = "tests/install_tests.rs"]
mod tests;
