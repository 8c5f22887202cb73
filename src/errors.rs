//! Error types for the proxy manager.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Errors returned by manager operations.
///
/// Lifecycle and install failures reach the caller. `NetworkUnavailable` is
/// only produced internally by the telemetry client and is always recovered
/// from with fallback data.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerError {
    /// `start` was called while the proxy is running.
    AlreadyRunning,
    /// `stop` was called while the proxy is stopped.
    NotRunning,
    /// The managed binary does not exist at the configured path.
    NotInstalled { path: PathBuf },
    /// The process could not be spawned or died during the grace interval.
    StartFailed { message: String },
    /// Another install is already in flight.
    InstallInProgress,
    /// The release has no asset for this platform.
    NoCompatibleAsset { target: String },
    /// Release metadata or asset bytes could not be fetched.
    DownloadFailed { message: String },
    /// The downloaded payload could not be unpacked or installed.
    ExtractFailed { message: String },
    /// The management endpoint is unreachable or answered badly.
    NetworkUnavailable { message: String },
    /// Configuration could not be read or written.
    Config { message: String },
}

impl Display for ManagerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "proxy server already running"),
            Self::NotRunning => write!(f, "proxy server not running"),
            Self::NotInstalled { path } => write!(
                f,
                "proxy binary not installed at {}; install it first",
                path.display()
            ),
            Self::StartFailed { message } => write!(f, "failed to start proxy server: {}", message),
            Self::InstallInProgress => write!(f, "an install is already in progress"),
            Self::NoCompatibleAsset { target } => {
                write!(f, "no compatible binary found for {}", target)
            }
            Self::DownloadFailed { message } => write!(f, "download failed: {}", message),
            Self::ExtractFailed { message } => write!(f, "install failed: {}", message),
            Self::NetworkUnavailable { message } => {
                write!(f, "management endpoint unavailable: {}", message)
            }
            Self::Config { message } => write!(f, "configuration error: {}", message),
        }
    }
}

impl std::error::Error for ManagerError {}

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

impl ManagerError {
    /// Wraps an `anyhow` chain as a download failure, keeping every cause.
    pub(crate) fn download(err: anyhow::Error) -> Self {
        Self::DownloadFailed {
            message: format!("{:#}", err),
        }
    }

    /// Wraps an `anyhow` chain as an extraction failure, keeping every cause.
    pub(crate) fn extract(err: anyhow::Error) -> Self {
        Self::ExtractFailed {
            message: format!("{:#}", err),
        }
    }

    /// Wraps an `anyhow` chain as a network failure, keeping every cause.
    pub(crate) fn network(err: anyhow::Error) -> Self {
        Self::NetworkUnavailable {
            message: format!("{:#}", err),
        }
    }

    pub(crate) fn config(err: anyhow::Error) -> Self {
        Self::Config {
            message: format!("{:#}", err),
        }
    }
}
