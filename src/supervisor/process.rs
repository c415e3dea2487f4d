//! Daemon process supervision
//!
//! A service key names at most one live daemon per node. The daemon runs in
//! its own process group, detached from the coordinator, so it outlives the
//! run that started it. A JSON pid record under the run directory lets a
//! later run find and stop it; the process start time in the record tells
//! the daemon apart from a later process that reused its pid.
//!
//! Before a launch, instances nobody recorded (the record was lost with a
//! tmpfs run directory, or the daemon was started by hand) are found in the
//! process table by executable name and final argument, the data directory.

use crate::common::{
    poll_until, service_file, validate_service_key, Error, PollPolicy, Result, SupervisorConfig,
};
use crate::coordinator::join::StartCommand;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::{Child, Command};

/// Start/stop control over one named daemon per service key.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Spawn the command; returns its pid.
    async fn start(&self, command: &StartCommand, service_key: &str) -> Result<u32>;

    /// Gracefully stop the instance under `service_key`, if any.
    async fn stop(&self, service_key: &str) -> Result<()>;

    fn is_running(&self, service_key: &str) -> Result<bool>;

    /// Replace whatever runs under `service_key` with a fresh instance.
    ///
    /// The prior instance is gone before the new one is spawned; if it will
    /// not stop, nothing new is started.
    async fn launch(&self, command: &StartCommand, service_key: &str) -> Result<u32> {
        self.stop(service_key).await?;
        self.start(command, service_key).await
    }
}

/// Persisted record of a started daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub started_at: DateTime<Utc>,
    /// Kernel start time of `pid`, in clock ticks since boot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ticks: Option<u64>,
}

pub struct LocalSupervisor {
    run_dir: PathBuf,
    log_dir: PathBuf,
    stop_policy: PollPolicy,
    /// Children spawned by this process, reaped through their handles
    children: Mutex<HashMap<String, Child>>,
}

impl LocalSupervisor {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self::with_dirs(
            &config.run_dir,
            &config.log_dir,
            PollPolicy::bounded(config.stop_poll_interval(), config.stop_max_attempts),
        )
    }

    pub fn with_dirs(run_dir: &Path, log_dir: &Path, stop_policy: PollPolicy) -> Self {
        Self {
            run_dir: run_dir.to_path_buf(),
            log_dir: log_dir.to_path_buf(),
            stop_policy,
            children: Mutex::new(HashMap::new()),
        }
    }

    pub fn log_path(&self, service_key: &str) -> PathBuf {
        service_file(&self.log_dir, service_key, "log")
    }

    fn record_path(&self, service_key: &str) -> PathBuf {
        service_file(&self.run_dir, service_key, "pid.json")
    }

    /// The pid record for `service_key`, if one was written.
    pub fn record(&self, service_key: &str) -> Result<Option<ProcessRecord>> {
        let path = self.record_path(service_key);
        match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "ignoring unreadable pid record: {}", e);
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_record(&self, service_key: &str, record: &ProcessRecord) -> Result<()> {
        std::fs::create_dir_all(&self.run_dir)?;
        let path = self.record_path(service_key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn clear_record(&self, service_key: &str) -> Result<()> {
        match std::fs::remove_file(self.record_path(service_key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Liveness of the recorded instance. Owned children are checked through
    /// their handle, anything else through the process table.
    fn alive(&self, service_key: &str, record: &ProcessRecord) -> bool {
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(child) = children.get_mut(service_key) {
            if child.id() == Some(record.pid) {
                return match child.try_wait() {
                    Ok(Some(status)) => {
                        tracing::debug!(service_key, %status, "supervised child exited");
                        children.remove(service_key);
                        false
                    }
                    Ok(None) => true,
                    Err(_) => pid_alive(record.pid, record.start_ticks),
                };
            }
        }
        pid_alive(record.pid, record.start_ticks)
    }

    /// SIGTERM `pid` on every check until it is gone or the stop policy runs
    /// out.
    async fn terminate(
        &self,
        service_key: &str,
        pid: u32,
        mut alive: impl FnMut() -> bool,
    ) -> Result<u32> {
        let outcome = poll_until(self.stop_policy, "prior instance exit", |_| {
            let running = alive();
            if running {
                send_term(pid);
            }
            async move {
                if running {
                    Err("still running")
                } else {
                    Ok(())
                }
            }
        })
        .await;

        match outcome {
            Ok((_, attempts)) => Ok(attempts),
            Err(Error::PollExhausted { attempts, .. }) => Err(Error::SupervisionTimeout {
                service_key: service_key.to_string(),
                pid,
                attempts,
            }),
            Err(e) => Err(e),
        }
    }

    /// Stop live instances of `command` that no record accounts for.
    async fn stop_unrecorded(&self, command: &StartCommand, service_key: &str) -> Result<()> {
        for (pid, ticks) in find_instances(command) {
            tracing::warn!(
                service_key,
                pid,
                program = %command.program.display(),
                "stopping unrecorded instance"
            );
            let attempts = self
                .terminate(service_key, pid, || pid_alive(pid, Some(ticks)))
                .await?;
            tracing::info!(service_key, pid, attempts, "unrecorded instance stopped");
        }
        Ok(())
    }
}

#[async_trait]
impl Supervisor for LocalSupervisor {
    async fn start(&self, command: &StartCommand, service_key: &str) -> Result<u32> {
        validate_service_key(service_key)?;
        std::fs::create_dir_all(&self.log_dir)?;

        let log_path = self.log_path(service_key);
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        writeln!(
            log,
            "=== {} starting {}: {}",
            Utc::now().to_rfc3339(),
            service_key,
            command
        )?;
        let stderr = log.try_clone()?;

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: command.program.display().to_string(),
                source,
            })?;

        let pid = child.id().ok_or_else(|| {
            Error::Other(format!("{} exited before its pid was read", service_key))
        })?;

        self.write_record(
            service_key,
            &ProcessRecord {
                pid,
                program: command.program.clone(),
                args: command.args.clone(),
                started_at: Utc::now(),
                start_ticks: start_ticks(pid),
            },
        )?;
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(service_key.to_string(), child);

        tracing::info!(service_key, pid, log = %log_path.display(), "daemon started");
        Ok(pid)
    }

    async fn stop(&self, service_key: &str) -> Result<()> {
        validate_service_key(service_key)?;
        let Some(record) = self.record(service_key)? else {
            tracing::debug!(service_key, "no prior instance recorded");
            return Ok(());
        };
        if !self.alive(service_key, &record) {
            tracing::debug!(service_key, pid = record.pid, "recorded instance is not running");
            return self.clear_record(service_key);
        }

        tracing::info!(service_key, pid = record.pid, "stopping prior instance");
        let attempts = self
            .terminate(service_key, record.pid, || self.alive(service_key, &record))
            .await?;
        tracing::info!(service_key, pid = record.pid, attempts, "prior instance stopped");
        self.clear_record(service_key)
    }

    fn is_running(&self, service_key: &str) -> Result<bool> {
        validate_service_key(service_key)?;
        Ok(match self.record(service_key)? {
            Some(record) => self.alive(service_key, &record),
            None => false,
        })
    }

    /// Stop the recorded instance, then any unrecorded instance of the same
    /// daemon, then start a fresh one.
    async fn launch(&self, command: &StartCommand, service_key: &str) -> Result<u32> {
        self.stop(service_key).await?;
        self.stop_unrecorded(command, service_key).await?;
        self.start(command, service_key).await
    }
}

fn send_term(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        tracing::debug!(pid, "SIGTERM failed: {}", std::io::Error::last_os_error());
    }
}

fn proc_available() -> bool {
    Path::new("/proc/self/stat").exists()
}

/// Fields of `/proc/<pid>/stat` after the parenthesised command name,
/// starting with the state (field 3).
fn stat_fields(pid: u32) -> Option<Vec<String>> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    let (_, rest) = stat.rsplit_once(')')?;
    Some(rest.split_whitespace().map(str::to_string).collect())
}

/// Kernel start time of `pid` (field 22 of its stat line), stable across
/// `exec`.
pub fn start_ticks(pid: u32) -> Option<u64> {
    stat_fields(pid)?.get(22 - 3)?.parse().ok()
}

/// Is `pid` a live (non-zombie) process that started at `expected_start`?
///
/// Without a recorded start time only liveness is checked.
pub fn pid_alive(pid: u32, expected_start: Option<u64>) -> bool {
    if !proc_available() {
        return signal_zero(pid);
    }

    let Some(fields) = stat_fields(pid) else {
        return false;
    };
    if matches!(fields.first().map(String::as_str), Some("Z" | "X" | "x")) {
        return false;
    }

    match expected_start {
        Some(expected) => {
            fields.get(22 - 3).and_then(|f| f.parse::<u64>().ok()) == Some(expected)
        }
        None => true,
    }
}

/// Live processes other than ourselves whose executable name and final
/// argument match `command`, with their start times.
fn find_instances(command: &StartCommand) -> Vec<(u32, u64)> {
    let (Some(name), Some(last)) = (command.program.file_name(), command.args.last()) else {
        return Vec::new();
    };
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };

    let me = std::process::id();
    let mut found = Vec::new();
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        if pid == me {
            continue;
        }
        let Ok(cmdline) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        let argv: Vec<&[u8]> = cmdline
            .split(|b| *b == 0)
            .filter(|arg| !arg.is_empty())
            .collect();
        let (Some(argv0), Some(final_arg)) = (argv.first(), argv.last()) else {
            continue;
        };
        if argv.len() < 2 || *final_arg != last.as_bytes() {
            continue;
        }
        let argv0 = Path::new(std::str::from_utf8(argv0).unwrap_or_default());
        if argv0.file_name() != Some(name) {
            continue;
        }
        if let Some(ticks) = start_ticks(pid) {
            if pid_alive(pid, Some(ticks)) {
                found.push((pid, ticks));
            }
        }
    }
    found
}

fn signal_zero(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 only checks for existence and permission.
    unsafe { libc::kill(pid, 0) == 0 }
}
