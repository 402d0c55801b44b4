//! Native process supervisor.
//!
//! Owns every process this invocation started: spawns them with captured
//! output, records their pid on disk, watches for exit and stops them with
//! SIGINT followed by SIGKILL. Processes started by another invocation are
//! discovered through their pid file.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::time;
use tracing::{info, warn};

use super::lock::LockFile;
use super::logfile::{LogSink, Stream};
use super::pidfile::PidFile;
use super::signal::{self, Signal};
use super::StateDir;
use crate::domain::ServiceName;
use crate::error::SupervisorError;
use crate::port::BackendEvent;

/// How long a SIGINT gets before SIGKILL.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);
/// How long to wait for a killed process to be reaped.
const KILL_WAIT: Duration = Duration::from_secs(5);
const LIVENESS_POLL: Duration = Duration::from_millis(100);

/// How to launch one service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Added on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitDetail {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitDetail {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "killed by signal {signal}"),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Last observed status of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Stopping,
    Stopped,
    Failed { exit: ExitDetail },
}

/// Registry entry for a process owned by this invocation.
#[derive(Debug)]
pub struct ProcessRecord {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub log_path: PathBuf,
    pub status: ProcessStatus,
    exited: watch::Receiver<Option<ExitDetail>>,
    lock: Option<LockFile>,
}

/// Reconciled view of a service for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ProcessState {
    Running { pid: u32, owned: bool },
    Stopped,
    Failed { exit: ExitDetail },
    Absent,
}

type Registry = Arc<RwLock<HashMap<ServiceName, ProcessRecord>>>;

/// Starts, watches and stops service processes.
pub struct ProcessSupervisor {
    state: StateDir,
    registry: Registry,
    grace: Duration,
    events_tx: UnboundedSender<BackendEvent>,
    events_rx: Mutex<Option<UnboundedReceiver<BackendEvent>>>,
}

impl ProcessSupervisor {
    pub fn new(state: StateDir) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            state,
            registry: Arc::new(RwLock::new(HashMap::new())),
            grace: DEFAULT_STOP_GRACE,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    #[must_use]
    pub fn state_dir(&self) -> &StateDir {
        &self.state
    }

    /// Crash notifications. Only the first caller gets the receiver.
    pub fn take_events(&self) -> Option<UnboundedReceiver<BackendEvent>> {
        self.events_rx.lock().take()
    }

    /// Spawn `spec` as `service`. Returns the new pid.
    pub async fn start(
        &self,
        service: &ServiceName,
        spec: &ProcessSpec,
    ) -> Result<u32, SupervisorError> {
        if let ProcessState::Running { pid, .. } = self.state(service) {
            return Err(SupervisorError::AlreadyRunning {
                service: service.clone(),
                pid,
            });
        }

        let lock = LockFile::acquire(service, &self.state.lock_path(service))?;
        let log_path = self.state.log_path(service);
        let sink = LogSink::create(&log_path)
            .await
            .map_err(|source| SupervisorError::LogFile {
                path: log_path.clone(),
                source,
            })?;

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            service: service.clone(),
            source,
        })?;
        let Some(pid) = child.id() else {
            return Err(SupervisorError::NotRunning(service.clone()));
        };

        let pid_file = PidFile::new(self.state.pid_path(service));
        if let Err(err) = pid_file.write(pid) {
            let _ = child.start_kill();
            return Err(err);
        }

        if let Some(stdout) = child.stdout.take() {
            sink.pump(stdout, Stream::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            sink.pump(stderr, Stream::Stderr);
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        self.registry.write().insert(
            service.clone(),
            ProcessRecord {
                pid,
                started_at: Utc::now(),
                log_path: log_path.clone(),
                status: ProcessStatus::Running,
                exited: exit_rx,
                lock: Some(lock),
            },
        );

        let registry = Arc::clone(&self.registry);
        let events = self.events_tx.clone();
        let watched = service.clone();
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ExitDetail::from_status(status),
                Err(error) => {
                    warn!(service = %watched, error = %error, "failed to wait on process");
                    ExitDetail {
                        code: None,
                        signal: None,
                    }
                }
            };
            if pid_file.read() == Some(pid) {
                pid_file.remove();
            }

            let crashed = {
                let mut registry = registry.write();
                match registry.get_mut(&watched) {
                    Some(record) if record.pid == pid => {
                        record.lock = None;
                        let crashed = record.status != ProcessStatus::Stopping;
                        record.status = if crashed {
                            ProcessStatus::Failed { exit }
                        } else {
                            ProcessStatus::Stopped
                        };
                        crashed
                    }
                    _ => false,
                }
            };
            let _ = exit_tx.send(Some(exit));

            if crashed {
                warn!(service = %watched, pid, %exit, "process exited unexpectedly");
                let _ = events.send(BackendEvent::Crashed {
                    service: watched,
                    detail: exit.to_string(),
                });
            } else {
                info!(service = %watched, pid, %exit, "process stopped");
            }
        });

        info!(service = %service, pid, log = %log_path.display(), "process started");
        Ok(pid)
    }

    /// Stop `service`: SIGINT, wait out the grace period, then SIGKILL.
    pub async fn stop(&self, service: &ServiceName) -> Result<(), SupervisorError> {
        let owned = {
            let mut registry = self.registry.write();
            match registry.get_mut(service) {
                Some(record)
                    if matches!(
                        record.status,
                        ProcessStatus::Running | ProcessStatus::Stopping
                    ) =>
                {
                    record.status = ProcessStatus::Stopping;
                    Some((record.pid, record.exited.clone()))
                }
                _ => None,
            }
        };

        match owned {
            Some((pid, exited)) => self.stop_owned(service, pid, exited).await,
            None => self.stop_foreign(service).await,
        }
    }

    async fn stop_owned(
        &self,
        service: &ServiceName,
        pid: u32,
        mut exited: watch::Receiver<Option<ExitDetail>>,
    ) -> Result<(), SupervisorError> {
        info!(service = %service, pid, "sending SIGINT");
        signal::send(pid, Signal::Interrupt)?;
        if time::timeout(self.grace, exited.wait_for(Option::is_some))
            .await
            .is_ok()
        {
            return Ok(());
        }

        warn!(service = %service, pid, grace_secs = self.grace.as_secs(), "grace period expired; sending SIGKILL");
        signal::send(pid, Signal::Kill)?;
        if time::timeout(KILL_WAIT, exited.wait_for(Option::is_some))
            .await
            .is_ok()
        {
            return Ok(());
        }
        Err(SupervisorError::StopTimeout {
            service: service.clone(),
            pid,
            grace: self.grace,
        })
    }

    async fn stop_foreign(&self, service: &ServiceName) -> Result<(), SupervisorError> {
        let pid_file = PidFile::new(self.state.pid_path(service));
        let Some(pid) = pid_file.read().filter(|pid| signal::is_alive(*pid)) else {
            pid_file.remove();
            return Err(SupervisorError::NotRunning(service.clone()));
        };

        info!(service = %service, pid, "sending SIGINT to process from another invocation");
        signal::send(pid, Signal::Interrupt)?;
        if !wait_for_exit(pid, self.grace).await {
            warn!(service = %service, pid, "grace period expired; sending SIGKILL");
            signal::send(pid, Signal::Kill)?;
            if !wait_for_exit(pid, KILL_WAIT).await {
                return Err(SupervisorError::StopTimeout {
                    service: service.clone(),
                    pid,
                    grace: self.grace,
                });
            }
        }
        pid_file.remove();
        Ok(())
    }

    /// Current state, preferring the pid file and a liveness check over the
    /// in-memory registry.
    pub fn state(&self, service: &ServiceName) -> ProcessState {
        let registry = self.registry.read();
        let record = registry.get(service);

        if let Some(pid) = PidFile::new(self.state.pid_path(service)).read() {
            if signal::is_alive(pid) {
                let owned = record.is_some_and(|record| {
                    record.pid == pid && record.exited.borrow().is_none()
                });
                return ProcessState::Running { pid, owned };
            }
        }

        match record.map(|record| record.status) {
            Some(ProcessStatus::Failed { exit }) => ProcessState::Failed { exit },
            Some(ProcessStatus::Stopped | ProcessStatus::Stopping) => ProcessState::Stopped,
            // Exited between the pid file read and now; the watcher has not run yet.
            Some(ProcessStatus::Running) => {
                match record.and_then(|record| *record.exited.borrow()) {
                    Some(exit) => ProcessState::Failed { exit },
                    None => ProcessState::Stopped,
                }
            }
            None => ProcessState::Absent,
        }
    }

    /// Last observed registry status of a process this invocation owns.
    pub fn status(&self, service: &ServiceName) -> Option<ProcessStatus> {
        self.registry.read().get(service).map(|record| record.status)
    }

    /// Pid and start time of an owned process.
    pub fn record(&self, service: &ServiceName) -> Option<(u32, DateTime<Utc>)> {
        self.registry
            .read()
            .get(service)
            .map(|record| (record.pid, record.started_at))
    }

    pub fn log_path(&self, service: &ServiceName) -> PathBuf {
        self.registry
            .read()
            .get(service)
            .map_or_else(|| self.state.log_path(service), |record| record.log_path.clone())
    }

    /// Services this invocation has started and not yet seen stop.
    pub fn owned_running(&self) -> Vec<ServiceName> {
        self.registry
            .read()
            .iter()
            .filter(|(_, record)| record.status == ProcessStatus::Running)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

async fn wait_for_exit(pid: u32, within: Duration) -> bool {
    let deadline = time::Instant::now() + within;
    while time::Instant::now() < deadline {
        if !signal::is_alive(pid) {
            return true;
        }
        time::sleep(LIVENESS_POLL).await;
    }
    !signal::is_alive(pid)
}
