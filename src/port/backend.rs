//! Service backend port.
//!
//! The scheduler drives every service through the same three operations
//! (check health, start locally, wait until ready) without knowing whether
//! the service is an OS process or a container. Stop and runtime state are
//! used by teardown and status reporting.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

use crate::domain::{HealthPayload, ServiceDefinition, ServiceName};
use crate::error::ServiceError;

/// Which mechanism realizes "start a service".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Process,
    Container,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process => write!(f, "process"),
            Self::Container => write!(f, "container"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "process" | "native" => Ok(Self::Process),
            "container" | "docker" => Ok(Self::Container),
            other => Err(format!("unknown backend '{other}' (expected process or container)")),
        }
    }
}

/// A successful health observation.
#[derive(Debug, Clone, Default)]
pub struct HealthCheck {
    /// Structured payload, for services that report one.
    pub payload: Option<HealthPayload>,
    /// Set when the service is usable but reported non-healthy components.
    pub degraded_reason: Option<String>,
}

impl HealthCheck {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn with_payload(payload: HealthPayload) -> Self {
        Self {
            payload: Some(payload),
            degraded_reason: None,
        }
    }

    #[must_use]
    pub fn degraded(mut self, reason: impl Into<String>) -> Self {
        self.degraded_reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded_reason.is_some()
    }
}

/// Inputs shared by every probe in a run.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    /// Endpoint of the API server.
    pub endpoint: Url,
    /// Endpoint is not on this host, so nothing can be started.
    pub remote: bool,
    /// Health components whose failure makes the server unusable.
    pub required_components: HashSet<String>,
}

impl ProbeContext {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            remote: false,
            required_components: HashSet::from(["database".to_string()]),
        }
    }

    #[must_use]
    pub fn remote(mut self, remote: bool) -> Self {
        self.remote = remote;
        self
    }

    #[must_use]
    pub fn require_component(mut self, name: impl Into<String>) -> Self {
        self.required_components.insert(name.into());
        self
    }
}

/// Observed runtime state of a service's process or container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RuntimeState {
    Running { id: String },
    Stopped,
    Failed { detail: String },
    Absent,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running { id } => write!(f, "running ({id})"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed { detail } => write!(f, "failed ({detail})"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

/// Something a backend noticed outside of any orchestrator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// A service that was running exited without being asked to.
    Crashed { service: ServiceName, detail: String },
}

/// Strategy realizing service lifecycle operations.
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Observe the service once. `Ok` means healthy or degraded-but-usable.
    async fn check_health(
        &self,
        def: &ServiceDefinition,
        ctx: &ProbeContext,
    ) -> Result<HealthCheck, ServiceError>;

    /// Start the service on this host.
    async fn start_local(&self, def: &ServiceDefinition) -> Result<(), ServiceError>;

    /// Poll until the service is ready or `timeout` elapses.
    async fn wait_ready(
        &self,
        def: &ServiceDefinition,
        ctx: &ProbeContext,
        timeout: Duration,
    ) -> Result<HealthCheck, ServiceError>;

    async fn stop(&self, def: &ServiceDefinition) -> Result<(), ServiceError>;

    async fn runtime_state(&self, def: &ServiceDefinition) -> RuntimeState;

    /// Hand out the backend's event stream. Only the first caller gets it.
    fn take_events(&self) -> Option<UnboundedReceiver<BackendEvent>> {
        None
    }
}
