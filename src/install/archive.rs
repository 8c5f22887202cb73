//! Unpacking downloaded release payloads and installing the executable.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Executable names recognised inside archives (compared case-insensitively).
pub const BINARY_NAMES: &[&str] = &[
    "CLIProxyAPI",
    "cli-proxy-api",
    "cli-proxy-api-plus",
    "proxy",
];

const EXECUTABLE_BITS: u32 = 0o111;

/// A downloaded release asset, classified by how it must be unpacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallPayload {
    /// The asset is the executable itself.
    Raw(PathBuf),
    TarGz(PathBuf),
    Zip(PathBuf),
}

impl InstallPayload {
    /// Classifies the file at `path` by the release asset's name.
    pub fn classify(path: PathBuf, asset_name: &str) -> Self {
        let name = asset_name.to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            InstallPayload::TarGz(path)
        } else if name.ends_with(".zip") {
            InstallPayload::Zip(path)
        } else {
            InstallPayload::Raw(path)
        }
    }

    /// Unpacks into `dest` and returns the path of the executable to install.
    pub fn extract_candidate(&self, dest: &Path) -> Result<PathBuf> {
        match self {
            InstallPayload::Raw(path) => Ok(path.clone()),
            InstallPayload::TarGz(path) => extract_tar_gz(path, dest),
            InstallPayload::Zip(path) => extract_zip(path, dest),
        }
    }
}

/// Tracks the best executable seen while walking an archive.
///
/// A name match beats the executable-bit fallback regardless of order;
/// within each kind the first entry wins.
#[derive(Default)]
struct CandidatePicker {
    by_name: Option<PathBuf>,
    by_mode: Option<PathBuf>,
}

impl CandidatePicker {
    fn consider(&mut self, extracted: &Path, mode: Option<u32>) {
        let Some(file_name) = extracted.file_name().and_then(|n| n.to_str()) else {
            return;
        };

        if self.by_name.is_none() && is_known_binary_name(file_name) {
            self.by_name = Some(extracted.to_path_buf());
        }

        let executable = mode.is_some_and(|m| m & EXECUTABLE_BITS != 0);
        if self.by_mode.is_none() && executable && !file_name.ends_with(".sh") {
            self.by_mode = Some(extracted.to_path_buf());
        }
    }

    fn finish(self) -> Result<PathBuf> {
        match self.by_name.or(self.by_mode) {
            Some(path) => Ok(path),
            None => bail!("could not find binary in archive"),
        }
    }
}

fn is_known_binary_name(file_name: &str) -> bool {
    let stem = file_name.strip_suffix(".exe").unwrap_or(file_name);
    BINARY_NAMES.iter().any(|name| stem.eq_ignore_ascii_case(name))
}

fn extract_tar_gz(archive_path: &Path, dest: &Path) -> Result<PathBuf> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    let mut picker = CandidatePicker::default();

    for entry in archive.entries().context("Failed to read tar archive")? {
        let mut entry = entry.context("Corrupt tar entry")?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let raw = entry.path().context("Invalid tar entry path")?.into_owned();
        let Some(relative) = enclosed_tar_path(&raw) else {
            tracing::debug!("Skipping tar entry outside extraction dir: {}", raw.display());
            continue;
        };
        let mode = entry.header().mode().ok();

        if !entry
            .unpack_in(dest)
            .with_context(|| format!("Failed to extract {}", relative.display()))?
        {
            continue;
        }
        picker.consider(&dest.join(&relative), mode);
    }

    picker.finish()
}

/// `path` reduced to its normal components, or `None` if it is absolute or
/// climbs out with `..`.
fn enclosed_tar_path(path: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) | Component::ParentDir => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<PathBuf> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file).context("Failed to read zip archive")?;
    let mut picker = CandidatePicker::default();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("Corrupt zip entry")?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut out = File::create(&target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("Failed to extract {}", target.display()))?;
        picker.consider(&target, entry.unix_mode());
    }

    picker.finish()
}

/// Installs `candidate` at `destination`.
///
/// The bytes are staged in a temp file next to `destination`, marked
/// executable and renamed over the old binary, so `destination` only ever
/// holds a complete executable.
pub fn install_binary(candidate: &Path, destination: &Path) -> Result<()> {
    let dir = destination
        .parent()
        .context("Install destination has no parent directory")?;
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut source = File::open(candidate)
        .with_context(|| format!("Failed to open {}", candidate.display()))?;
    let mut staged = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to stage binary in {}", dir.display()))?;
    io::copy(&mut source, staged.as_file_mut()).context("Failed to copy binary")?;
    staged.as_file().sync_all().context("Failed to flush staged binary")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(staged.path(), std::fs::Permissions::from_mode(0o755))
            .context("Failed to mark binary executable")?;
    }

    staged
        .persist(destination)
        .with_context(|| format!("Failed to replace {}", destination.display()))?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/archive_tests.rs"]
mod tests;
