//! Lock-guarded aggregate holding everything the manager knows.
//!
//! Every read hands back an owned snapshot and every write happens under the
//! single mutex. Callers that need a compound transition use [`StateStore::mutate`]
//! and append logs through [`Inner::append_log`] while the lock is held;
//! everyone else uses [`StateStore::append_log`], which takes the lock first.
//! Both paths share one implementation.

use crate::config::AppConfig;
use crate::telemetry::types::{AccountRecord, UsageSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Maximum number of log entries retained; older entries are evicted first.
pub const MAX_LOG_ENTRIES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Lifecycle and install state of the managed process.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerState {
    pub running: bool,
    pub port: u16,
    pub last_error: Option<String>,
    pub installing: bool,
    /// Install progress in `[0, 1]`.
    pub install_progress: f64,
}

impl ManagerState {
    fn new(port: u16) -> Self {
        Self {
            running: false,
            port,
            last_error: None,
            installing: false,
            install_progress: 0.0,
        }
    }
}

/// Status summary shown to UIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyStatus {
    pub running: bool,
    pub port: u16,
}

/// The store's view of a spawned process.
///
/// The exit waiter owns the child; the store only keeps its PID and a
/// receiver that flips to `true` once the waiter has cleared this handle.
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: u32,
    pub exited: watch::Receiver<bool>,
}

/// Bounded FIFO of log entries.
#[derive(Debug)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(MAX_LOG_ENTRIES)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Everything guarded by the store's mutex.
#[derive(Debug)]
pub struct Inner {
    pub state: ManagerState,
    pub config: AppConfig,
    pub process: Option<ProcessHandle>,
    /// Set while `stop` is tearing the process down, so the exit waiter
    /// reports the exit as requested rather than as a failure.
    pub stopping: bool,
    pub accounts: Vec<AccountRecord>,
    pub usage: UsageSnapshot,
    logs: LogBuffer,
}

impl Inner {
    /// Appends a log entry. The caller already holds the store lock.
    pub fn append_log(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!(target: "proxy", "{}", message),
            LogLevel::Info => tracing::info!(target: "proxy", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "proxy", "{}", message),
            LogLevel::Error => tracing::error!(target: "proxy", "{}", message),
        }
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
        });
    }

    /// Records a failure as both the last error and an error-level log entry.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.state.last_error = Some(message.clone());
        self.append_log(LogLevel::Error, message);
    }
}

pub struct StateStore {
    inner: Mutex<Inner>,
}

impl StateStore {
    pub fn new(config: AppConfig) -> Self {
        Self::with_log_capacity(config, MAX_LOG_ENTRIES)
    }

    pub(crate) fn with_log_capacity(config: AppConfig, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ManagerState::new(config.port),
                config,
                process: None,
                stopping: false,
                accounts: Vec::new(),
                usage: UsageSnapshot::empty(),
                logs: LogBuffer::with_capacity(capacity),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking writer leaves plain data behind; keep serving it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with exclusive access. Keep `f` short and free of I/O.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    /// Runs `f` with shared access and returns what it extracts.
    pub fn read<R>(&self, f: impl FnOnce(&Inner) -> R) -> R {
        let guard = self.lock();
        f(&guard)
    }

    /// Appends a log entry, taking the lock.
    pub fn append_log(&self, level: LogLevel, message: impl Into<String>) {
        self.lock().append_log(level, message);
    }

    pub fn clear_logs(&self) {
        self.lock().logs.clear();
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.read(|s| s.logs.snapshot())
    }

    pub fn log_count(&self) -> usize {
        self.read(|s| s.logs.len())
    }

    pub fn state(&self) -> ManagerState {
        self.read(|s| s.state.clone())
    }

    pub fn status(&self) -> ProxyStatus {
        self.read(|s| ProxyStatus {
            running: s.state.running,
            port: s.state.port,
        })
    }

    pub fn config(&self) -> AppConfig {
        self.read(|s| s.config.clone())
    }

    pub fn accounts(&self) -> Vec<AccountRecord> {
        self.read(|s| s.accounts.clone())
    }

    pub fn usage(&self) -> UsageSnapshot {
        self.read(|s| s.usage.clone())
    }

    pub fn last_error(&self) -> Option<String> {
        self.read(|s| s.state.last_error.clone())
    }

    pub fn is_installing(&self) -> bool {
        self.read(|s| s.state.installing)
    }

    pub fn install_progress(&self) -> f64 {
        self.read(|s| s.state.install_progress)
    }

    pub fn set_install_progress(&self, progress: f64) {
        self.mutate(|s| s.state.install_progress = progress.clamp(0.0, 1.0));
    }

    /// Whether a process handle is currently registered.
    pub fn has_process(&self) -> bool {
        self.read(|s| s.process.is_some())
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
