//! [`ServiceBackend`] over the native process supervisor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

use super::logfile;
use super::supervisor::{ProcessSpec, ProcessState, ProcessSupervisor};
use crate::adapter::http::{local_url, HealthClient};
use crate::application::HealthPoller;
use crate::domain::{ReadinessProbe, ServiceDefinition, ServiceName};
use crate::error::{ServiceError, SupervisorError};
use crate::port::{
    BackendEvent, BackendKind, HealthCheck, ProbeContext, RuntimeState, ServiceBackend,
};

/// Runs services as child processes of this invocation.
pub struct ProcessBackend {
    supervisor: Arc<ProcessSupervisor>,
    specs: HashMap<ServiceName, ProcessSpec>,
    health: HealthClient,
    poller: HealthPoller,
}

impl ProcessBackend {
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        specs: HashMap<ServiceName, ProcessSpec>,
        health: HealthClient,
        poller: HealthPoller,
    ) -> Self {
        Self {
            supervisor,
            specs,
            health,
            poller,
        }
    }

    #[must_use]
    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    fn not_running(def: &ServiceDefinition, reason: impl Into<String>) -> ServiceError {
        ServiceError::Unreachable {
            service: def.name.clone(),
            reason: reason.into(),
        }
    }

    /// A process this invocation started has already died.
    fn exited(&self, def: &ServiceDefinition) -> Result<(), ServiceError> {
        match self.supervisor.state(&def.name) {
            ProcessState::Failed { exit } => Err(ServiceError::StartFailed {
                service: def.name.clone(),
                reason: format!("process exited during startup ({exit})"),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ServiceBackend for ProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Process
    }

    async fn check_health(
        &self,
        def: &ServiceDefinition,
        ctx: &ProbeContext,
    ) -> Result<HealthCheck, ServiceError> {
        match &def.probe {
            ReadinessProbe::Http {
                path,
                structured: true,
            } => {
                self.health
                    .payload(&def.name, &ctx.endpoint, path, ctx)
                    .await
            }
            ReadinessProbe::Http {
                path,
                structured: false,
            } => {
                let port = def
                    .port
                    .ok_or_else(|| Self::not_running(def, "no port configured"))?;
                let base = local_url(&def.name, port)?;
                self.health.probe(&def.name, &base, path).await
            }
            ReadinessProbe::Liveness => match self.supervisor.state(&def.name) {
                ProcessState::Running { .. } => Ok(HealthCheck::healthy()),
                state => Err(Self::not_running(def, format!("process is {}", describe(&state)))),
            },
            ReadinessProbe::LogPattern(pattern) => match self.supervisor.state(&def.name) {
                ProcessState::Running { .. } => {
                    let log_path = self.supervisor.log_path(&def.name);
                    if logfile::contains(&log_path, pattern) {
                        Ok(HealthCheck::healthy())
                    } else {
                        Err(Self::not_running(
                            def,
                            format!("waiting for '{pattern}' in {}", log_path.display()),
                        ))
                    }
                }
                state => Err(Self::not_running(def, format!("process is {}", describe(&state)))),
            },
        }
    }

    async fn start_local(&self, def: &ServiceDefinition) -> Result<(), ServiceError> {
        let spec = self
            .specs
            .get(&def.name)
            .ok_or_else(|| ServiceError::StartFailed {
                service: def.name.clone(),
                reason: "no command configured".into(),
            })?;

        match self.supervisor.start(&def.name, spec).await {
            Ok(_) => Ok(()),
            Err(SupervisorError::AlreadyRunning { pid, .. }) => {
                info!(service = %def.name, pid, "process already running; waiting for readiness");
                Ok(())
            }
            Err(err) => Err(ServiceError::StartFailed {
                service: def.name.clone(),
                reason: err.to_string(),
            }),
        }
    }

    async fn wait_ready(
        &self,
        def: &ServiceDefinition,
        ctx: &ProbeContext,
        timeout: Duration,
    ) -> Result<HealthCheck, ServiceError> {
        self.poller
            .within(timeout, || async {
                match self.exited(def) {
                    Ok(()) => self.check_health(def, ctx).await,
                    Err(err) => Err(err),
                }
            })
            .await
            .map_err(|err| err.into_service_error(&def.name, timeout))
    }

    async fn stop(&self, def: &ServiceDefinition) -> Result<(), ServiceError> {
        match self.supervisor.stop(&def.name).await {
            Ok(()) | Err(SupervisorError::NotRunning(_)) => Ok(()),
            Err(err) => Err(ServiceError::StopFailed {
                service: def.name.clone(),
                reason: err.to_string(),
            }),
        }
    }

    async fn runtime_state(&self, def: &ServiceDefinition) -> RuntimeState {
        match self.supervisor.state(&def.name) {
            ProcessState::Running { pid, .. } => RuntimeState::Running {
                id: format!("pid {pid}"),
            },
            ProcessState::Stopped => RuntimeState::Stopped,
            ProcessState::Failed { exit } => RuntimeState::Failed {
                detail: exit.to_string(),
            },
            ProcessState::Absent => RuntimeState::Absent,
        }
    }

    fn take_events(&self) -> Option<UnboundedReceiver<BackendEvent>> {
        self.supervisor.take_events()
    }
}

fn describe(state: &ProcessState) -> String {
    match state {
        ProcessState::Running { pid, .. } => format!("running (pid {pid})"),
        ProcessState::Stopped => "stopped".into(),
        ProcessState::Failed { exit } => format!("failed ({exit})"),
        ProcessState::Absent => "not running".into(),
    }
}
