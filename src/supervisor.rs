//! Lifecycle control for the managed process.
//!
//! `start` spawns the process with three background tasks (stdout reader,
//! stderr reader, exit waiter) that talk to the rest of the manager only
//! through the [`StateStore`]. `stop` asks politely, escalates after a
//! timeout and then sweeps anything still holding the proxy port.

use crate::errors::{ManagerError, ManagerResult};
use crate::store::{LogLevel, ProcessHandle, StateStore};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

/// Time the process gets to prove it stayed up after spawning.
pub const DEFAULT_START_GRACE: Duration = Duration::from_millis(1500);

/// Time the process gets to exit after SIGTERM before it is killed.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait for the exit waiter after a forced kill.
const KILL_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorTimings {
    pub start_grace: Duration,
    pub stop_timeout: Duration,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            start_grace: DEFAULT_START_GRACE,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// Everything needed to launch the managed process once.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: PathBuf,
    pub port: u16,
}

/// Spawns the process and waits out the grace interval.
///
/// The caller serializes `start` and `stop`.
pub async fn start(
    store: &Arc<StateStore>,
    spec: &LaunchSpec,
    timings: SupervisorTimings,
) -> ManagerResult<()> {
    store.mutate(|s| {
        if s.state.running || s.process.is_some() {
            return Err(ManagerError::AlreadyRunning);
        }
        Ok(())
    })?;

    if !spec.program.is_file() {
        let err = ManagerError::NotInstalled {
            path: spec.program.clone(),
        };
        store.append_log(LogLevel::Error, err.to_string());
        return Err(err);
    }

    store.mutate(|s| {
        s.state.last_error = None;
        s.stopping = false;
        s.append_log(
            LogLevel::Info,
            format!("Starting proxy server on port {}", spec.port),
        );
    });

    let mut child = match Command::new(&spec.program)
        .args(&spec.args)
        .current_dir(&spec.working_dir)
        .env("TERM", "xterm-256color")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let err = ManagerError::StartFailed {
                message: e.to_string(),
            };
            store.mutate(|s| s.record_error(err.to_string()));
            return Err(err);
        }
    };

    let Some(pid) = child.id() else {
        let err = ManagerError::StartFailed {
            message: "process exited before its PID could be read".to_string(),
        };
        store.mutate(|s| s.record_error(err.to_string()));
        return Err(err);
    };

    let (exit_tx, exit_rx) = watch::channel(false);
    store.mutate(|s| {
        s.process = Some(ProcessHandle {
            pid,
            exited: exit_rx,
        })
    });

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, store.clone(), LogLevel::Debug));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, store.clone(), LogLevel::Warn));
    }

    let waiter_store = store.clone();
    tokio::spawn(async move {
        let result = child.wait().await;
        waiter_store.mutate(|s| {
            // A later run may own the handle by now; leave its state alone.
            if s.process.as_ref().map(|h| h.pid) != Some(pid) {
                s.append_log(
                    LogLevel::Debug,
                    format!("Previous proxy process {} exited", pid),
                );
                return;
            }
            let requested = s.stopping;
            s.state.running = false;
            s.process = None;
            match result {
                Ok(status) if status.success() => {
                    s.append_log(LogLevel::Info, "Proxy process exited");
                }
                Ok(status) if requested => {
                    s.append_log(LogLevel::Info, format!("Proxy process exited ({})", status));
                }
                Ok(status) => s.record_error(format!("Proxy exited with error: {}", status)),
                Err(e) => s.record_error(format!("Failed to wait for proxy process: {}", e)),
            }
        });
        let _ = exit_tx.send(true);
    });

    tokio::time::sleep(timings.start_grace).await;

    // Check liveness and publish in one critical section so the exit waiter can't
    // slip in between and leave `running` set without a handle.
    let started = store.mutate(|s| {
        let alive = s
            .process
            .as_ref()
            .is_some_and(|h| !*h.exited.borrow() && is_process_alive(h.pid));
        if alive {
            s.state.running = true;
            s.append_log(LogLevel::Info, "Proxy server started successfully");
        } else {
            s.record_error("Process failed to start");
        }
        alive
    });

    if started {
        Ok(())
    } else {
        Err(ManagerError::StartFailed {
            message: "process exited during startup".to_string(),
        })
    }
}

/// Terminates the process, then clears anything else bound to its port.
///
/// The caller serializes `start` and `stop`.
pub async fn stop(store: &StateStore, port: u16, timings: SupervisorTimings) -> ManagerResult<()> {
    let handle = store.mutate(|s| {
        if !s.state.running {
            return Err(ManagerError::NotRunning);
        }
        s.stopping = true;
        s.append_log(LogLevel::Info, "Stopping proxy server");
        Ok(s.process.as_ref().map(|h| (h.pid, h.exited.clone())))
    })?;

    if let Some((pid, mut exited)) = handle {
        terminate(pid);
        let graceful = tokio::time::timeout(timings.stop_timeout, exited.wait_for(|done| *done))
            .await
            .is_ok();
        if !graceful {
            force_kill(pid);
            store.append_log(LogLevel::Warn, "Force killed proxy process");
            let _ = tokio::time::timeout(KILL_WAIT, exited.wait_for(|done| *done)).await;
        }
    }

    let swept = tokio::task::spawn_blocking(move || kill_processes_on_port(port))
        .await
        .unwrap_or_default();
    if !swept.is_empty() {
        store.append_log(
            LogLevel::Warn,
            format!("Killed orphaned processes on port {}: {:?}", port, swept),
        );
    }

    store.mutate(|s| {
        s.state.running = false;
        s.process = None;
        s.stopping = false;
        s.append_log(LogLevel::Info, "Proxy server stopped");
    });
    Ok(())
}

async fn forward_lines<R>(stream: R, store: Arc<StateStore>, level: LogLevel)
where
    R: AsyncRead + Unpin,
{
    // Reads until EOF; the pipe must stay drained or the process gets SIGPIPE.
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if !line.is_empty() {
                    store.append_log(level, line);
                }
            }
            Err(e) => {
                tracing::debug!("Stopped reading proxy output: {}", e);
                break;
            }
        }
    }
}

/// Zero-signal liveness check.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn is_process_alive(pid: u32) -> bool {
    std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH"])
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::unistd::Pid;

    if let Err(e) = nix::sys::signal::kill(Pid::from_raw(pid as i32), signal) {
        tracing::debug!("Failed to send {} to {}: {}", signal, pid, e);
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    send_signal(pid, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(unix)]
fn force_kill(pid: u32) {
    send_signal(pid, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(not(unix))]
fn terminate(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .output();
}

#[cfg(not(unix))]
fn force_kill(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .output();
}

/// Kills every process other than this one listening on `port`.
///
/// Best effort: returns the PIDs signalled, or nothing if `lsof` is absent.
#[cfg(unix)]
pub fn kill_processes_on_port(port: u16) -> Vec<u32> {
    if which::which("lsof").is_err() {
        return Vec::new();
    }
    let output = match std::process::Command::new("lsof")
        .args(["-ti", &format!("tcp:{}", port), "-sTCP:LISTEN"])
        .output()
    {
        Ok(output) => output,
        Err(_) => return Vec::new(),
    };

    let own_pid = std::process::id();
    let pids = parse_pid_list(&String::from_utf8_lossy(&output.stdout));
    pids.into_iter()
        .filter(|pid| *pid != own_pid)
        .inspect(|pid| force_kill(*pid))
        .collect()
}

#[cfg(not(unix))]
pub fn kill_processes_on_port(_port: u16) -> Vec<u32> {
    Vec::new()
}

/// Parses whitespace-separated PIDs, ignoring anything that isn't one.
pub fn parse_pid_list(output: &str) -> Vec<u32> {
    output
        .split_whitespace()
        .filter_map(|token| token.parse().ok())
        .collect()
}

#[cfg(test)]
#[path = "tests/supervisor_tests.rs"]
mod tests;
