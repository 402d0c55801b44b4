use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::health::HealthPayload;
use crate::domain::service::ServiceName;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Why a single service could not be brought up or kept up.
///
/// Cloneable so that outcomes can carry the error that finalized them.
#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    #[error("{service} is unreachable: {reason}")]
    Unreachable { service: ServiceName, reason: String },

    #[error("{service} reported {}: {}", .payload.status, .payload.summary)]
    Unhealthy {
        service: ServiceName,
        payload: Box<HealthPayload>,
    },

    #[error("failed to start {service}: {reason}")]
    StartFailed { service: ServiceName, reason: String },

    #[error("{service} did not become ready within {}s{}", .timeout.as_secs(), .last_error.as_deref().map(|e| format!(" (last error: {e})")).unwrap_or_default())]
    ReadyTimeout {
        service: ServiceName,
        timeout: Duration,
        last_error: Option<String>,
    },

    #[error("unknown service: {0}")]
    UnknownService(ServiceName),

    #[error("failed to stop {service}: {reason}")]
    StopFailed { service: ServiceName, reason: String },
}

impl ServiceError {
    /// The structured health payload, when the service was contacted.
    #[must_use]
    pub fn payload(&self) -> Option<&HealthPayload> {
        match self {
            Self::Unhealthy { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// Name of the service the error refers to.
    #[must_use]
    pub fn service(&self) -> &ServiceName {
        match self {
            Self::Unreachable { service, .. }
            | Self::Unhealthy { service, .. }
            | Self::StartFailed { service, .. }
            | Self::ReadyTimeout { service, .. }
            | Self::StopFailed { service, .. } => service,
            Self::UnknownService(service) => service,
        }
    }
}

/// Errors raised by the native process supervisor.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to spawn {service}: {source}")]
    Spawn {
        service: ServiceName,
        #[source]
        source: std::io::Error,
    },

    #[error("{service} is already running (pid {pid})")]
    AlreadyRunning { service: ServiceName, pid: u32 },

    #[error("{service} is being started by another invocation (pid {owner})")]
    Locked { service: ServiceName, owner: u32 },

    #[error("lock file {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pid file {path}: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("{service} (pid {pid}) did not exit after {}s", .grace.as_secs())]
    StopTimeout {
        service: ServiceName,
        pid: u32,
        grace: Duration,
    },

    #[error("{0} is not running")]
    NotRunning(ServiceName),

    #[error("process signalling is not supported on this platform")]
    UnsupportedPlatform,
}

/// Errors raised while driving the external container engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("container engine unavailable: {0}")]
    Unavailable(String),

    #[error("`{command}` failed (exit {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("host port {port} is already in use")]
    PortUnavailable { port: u16 },

    #[error("container {name} is not running after start ({status})")]
    NotRunning { name: String, status: String },

    #[error("container {name} already exists and is not managed by stackctl")]
    Unmanaged { name: String },

    #[error("container {name} has no host binding for port {container_port}")]
    MissingBinding { name: String, container_port: u16 },

    #[error("image pull failed: {0}")]
    Pull(String),

    #[error("unexpected engine output: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stop failures collected across a teardown.
#[derive(Debug, Default)]
pub struct StopErrors(pub Vec<ServiceError>);

impl StopErrors {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for StopErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join("; "))
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("cannot schedule {} (dependency cycle or missing dependency)", join_names(.services))]
    Unschedulable { services: Vec<ServiceName> },

    #[error("teardown failed for {} service(s): {0}", .0.len())]
    Teardown(StopErrors),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;

fn join_names(names: &[ServiceName]) -> String {
    names
        .iter()
        .map(ServiceName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
