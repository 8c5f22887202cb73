//! The public facade over the supervisor, telemetry and installer.

use crate::config::{generate_management_key, AppConfig, ProxyConfigFile};
use crate::errors::{ManagerError, ManagerResult};
use crate::install::release::Target;
use crate::install::{self, InstallRequest, InstallSlot};
use crate::paths::ManagerPaths;
use crate::store::{LogEntry, LogLevel, ManagerState, ProxyStatus, StateStore};
use crate::supervisor::{self, LaunchSpec, SupervisorTimings};
use crate::telemetry;
use crate::telemetry::api_client::{management_url, ManagementClient};
use crate::telemetry::quota::{DerivedQuotaProvider, QuotaProvider, QuotaRecord};
use crate::telemetry::types::{AccountRecord, UsageSnapshot};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Period of the background telemetry refresh.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Supervises one proxy process and caches what it reports.
///
/// All state lives in a shared [`StateStore`]; every getter returns an owned
/// snapshot. `start` and `stop` are serialized against each other.
pub struct ProxyManager {
    store: Arc<StateStore>,
    paths: ManagerPaths,
    management_key: String,
    quota_provider: Box<dyn QuotaProvider>,
    timings: SupervisorTimings,
    lifecycle: Mutex<()>,
}

impl ProxyManager {
    /// Creates the directories and writes a fresh proxy config.
    pub fn new(config: AppConfig, paths: ManagerPaths) -> ManagerResult<Self> {
        paths.ensure_dirs().map_err(ManagerError::config)?;
        let manager = Self {
            store: Arc::new(StateStore::new(config.clone())),
            paths,
            management_key: generate_management_key(),
            quota_provider: Box::new(DerivedQuotaProvider),
            timings: SupervisorTimings::default(),
            lifecycle: Mutex::new(()),
        };
        manager.write_proxy_config(&config)?;
        Ok(manager)
    }

    pub fn with_quota_provider(mut self, provider: impl QuotaProvider + 'static) -> Self {
        self.quota_provider = Box::new(provider);
        self
    }

    pub fn with_timings(mut self, timings: SupervisorTimings) -> Self {
        self.timings = timings;
        self
    }

    // Lifecycle

    pub async fn start(&self) -> ManagerResult<()> {
        let _guard = self.lifecycle.lock().await;
        let port = self.store.mutate(|s| {
            if !s.state.running {
                s.state.port = s.config.port;
            }
            s.state.port
        });
        let spec = LaunchSpec {
            program: self.paths.binary_path.clone(),
            args: vec![
                "-config".into(),
                self.paths.proxy_config_path.clone().into_os_string(),
            ],
            working_dir: self.paths.working_dir().to_path_buf(),
            port,
        };
        supervisor::start(&self.store, &spec, self.timings).await
    }

    pub async fn stop(&self) -> ManagerResult<()> {
        let _guard = self.lifecycle.lock().await;
        let port = self.store.status().port;
        supervisor::stop(&self.store, port, self.timings).await
    }

    pub fn is_binary_installed(&self) -> bool {
        self.paths.binary_path.is_file()
    }

    pub fn binary_path(&self) -> &Path {
        &self.paths.binary_path
    }

    pub fn paths(&self) -> &ManagerPaths {
        &self.paths
    }

    /// OpenAI-compatible endpoint served by the proxy.
    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}/v1", self.store.status().port)
    }

    pub fn management_url(&self) -> String {
        management_url(self.store.status().port)
    }

    // Installation

    /// Downloads the latest release for this platform and installs it.
    ///
    /// Fails immediately with `InstallInProgress` while another install runs.
    pub async fn install(&self) -> ManagerResult<PathBuf> {
        let slot = InstallSlot::acquire(&self.store)?;
        let request = InstallRequest {
            feed_url: self.store.config().release_feed_url,
            target: Target::current(),
            destination: self.paths.binary_path.clone(),
            work_dir: std::env::temp_dir(),
        };

        // The slot travels with the work, so abandoning this future does not
        // free it while the download is still running.
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let _slot = slot;
            install::run_install(&store, &request)
        })
        .await
        .unwrap_or_else(|e| {
            let err = ManagerError::DownloadFailed {
                message: format!("install task failed: {}", e),
            };
            self.store.mutate(|s| s.record_error(err.to_string()));
            Err(err)
        })
    }

    // Telemetry

    /// Refreshes and returns accounts. Never fails; see [`telemetry::refresh_accounts`].
    pub async fn fetch_accounts(&self) -> Vec<AccountRecord> {
        let store = Arc::clone(&self.store);
        let client = self.client();
        let auth_dir = self.paths.auth_dir.clone();
        match tokio::task::spawn_blocking(move || {
            telemetry::refresh_accounts(&store, client.as_ref(), &auth_dir)
        })
        .await
        {
            Ok(accounts) => accounts,
            Err(e) => {
                self.store
                    .append_log(LogLevel::Error, format!("Account refresh failed: {}", e));
                self.store.accounts()
            }
        }
    }

    /// Refreshes and returns usage. Never fails; see [`telemetry::refresh_usage`].
    pub async fn fetch_usage(&self) -> UsageSnapshot {
        let store = Arc::clone(&self.store);
        let client = self.client();
        match tokio::task::spawn_blocking(move || telemetry::refresh_usage(&store, client.as_ref()))
            .await
        {
            Ok(usage) => usage,
            Err(e) => {
                self.store
                    .append_log(LogLevel::Error, format!("Usage refresh failed: {}", e));
                self.store.usage()
            }
        }
    }

    /// One refresh tick: accounts always, usage only while running.
    pub async fn refresh(&self) {
        let running = self.store.status().running;
        self.fetch_accounts().await;
        if running {
            self.fetch_usage().await;
        }
    }

    /// Runs [`refresh`](Self::refresh) every `interval` until the handle is shut down.
    pub fn spawn_refresh_loop(self: &Arc<Self>, interval: Duration) -> RefreshHandle {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => manager.refresh().await,
                    _ = stop_rx.recv() => break,
                }
            }
        });
        RefreshHandle { stop_tx, task }
    }

    pub fn quotas(&self) -> Vec<QuotaRecord> {
        self.quota_provider.quotas(&self.store.accounts())
    }

    fn client(&self) -> Option<ManagementClient> {
        let status = self.store.status();
        status
            .running
            .then(|| ManagementClient::local(status.port, &self.management_key))
    }

    // Configuration

    pub fn config(&self) -> AppConfig {
        self.store.config()
    }

    /// Regenerates the proxy config and replaces the cached settings.
    ///
    /// A port change applies from the next `start`.
    pub fn update_config(&self, config: AppConfig) -> ManagerResult<()> {
        self.write_proxy_config(&config)?;
        self.store.mutate(|s| {
            if !s.state.running {
                s.state.port = config.port;
            }
            s.config = config;
            s.append_log(LogLevel::Info, "Configuration updated");
        });
        Ok(())
    }

    fn write_proxy_config(&self, config: &AppConfig) -> ManagerResult<()> {
        ProxyConfigFile::from_settings(config, &self.paths.auth_dir, &self.management_key)
            .write(&self.paths.proxy_config_path)
            .map_err(ManagerError::config)
    }

    // Snapshots

    pub fn status(&self) -> ProxyStatus {
        self.store.status()
    }

    pub fn state(&self) -> ManagerState {
        self.store.state()
    }

    pub fn accounts(&self) -> Vec<AccountRecord> {
        self.store.accounts()
    }

    pub fn usage(&self) -> UsageSnapshot {
        self.store.usage()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.store.logs()
    }

    pub fn install_progress(&self) -> f64 {
        self.store.install_progress()
    }

    pub fn is_installing(&self) -> bool {
        self.store.is_installing()
    }

    pub fn last_error(&self) -> Option<String> {
        self.store.last_error()
    }

    pub fn append_log(&self, level: LogLevel, message: impl Into<String>) {
        self.store.append_log(level, message);
    }

    pub fn clear_logs(&self) {
        self.store.clear_logs();
    }
}

/// Stops a loop started by [`ProxyManager::spawn_refresh_loop`].
///
/// Dropping the handle also ends the loop.
pub struct RefreshHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.task.await;
    }
}

#[cfg(test)]
#[path = "tests/manager_tests.rs"]
mod tests;
