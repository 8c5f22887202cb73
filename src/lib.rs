//! Supervisor and state cache for a locally managed API proxy process.
//!
//! [`ProxyManager`] starts and stops the proxy binary, installs it from the
//! latest release, and keeps snapshots of the accounts, usage and log output
//! it reports.

pub mod config;
pub mod errors;
pub mod install;
pub mod manager;
pub mod paths;
pub mod store;
pub mod supervisor;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use config::AppConfig;
pub use errors::{ManagerError, ManagerResult};
pub use manager::{ProxyManager, RefreshHandle, DEFAULT_REFRESH_INTERVAL};
pub use paths::ManagerPaths;
pub use store::{LogEntry, LogLevel, ManagerState, ProxyStatus};
