//! [`ServiceBackend`] that runs services as containers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::supervisor::ContainerSupervisor;
use crate::adapter::http::{local_url, HealthClient};
use crate::application::HealthPoller;
use crate::domain::{ContainerRunSpec, ReadinessProbe, ServiceDefinition, ServiceName};
use crate::error::ServiceError;
use crate::port::{
    BackendKind, ContainerEngine, ContainerInfo, HealthCheck, ProbeContext, RuntimeState,
    ServiceBackend,
};

/// Lines of container output searched for a readiness pattern.
const LOG_SCAN_LINES: usize = 500;

pub struct ContainerBackend<E: ContainerEngine> {
    supervisor: Arc<ContainerSupervisor<E>>,
    specs: HashMap<ServiceName, ContainerRunSpec>,
    health: HealthClient,
    poller: HealthPoller,
}

impl<E: ContainerEngine> ContainerBackend<E> {
    pub fn new(
        supervisor: Arc<ContainerSupervisor<E>>,
        specs: HashMap<ServiceName, ContainerRunSpec>,
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
    pub fn supervisor(&self) -> &Arc<ContainerSupervisor<E>> {
        &self.supervisor
    }

    fn spec(&self, def: &ServiceDefinition) -> Option<&ContainerRunSpec> {
        self.specs.get(&def.name)
    }

    fn unreachable(def: &ServiceDefinition, reason: impl Into<String>) -> ServiceError {
        ServiceError::Unreachable {
            service: def.name.clone(),
            reason: reason.into(),
        }
    }

    async fn inspect(&self, def: &ServiceDefinition) -> Result<Option<ContainerInfo>, ServiceError> {
        let Some(spec) = self.spec(def) else {
            return Ok(None);
        };
        self.supervisor
            .inspect(&spec.name)
            .await
            .map_err(|err| Self::unreachable(def, err.to_string()))
    }

    /// Host URL of the service's first published port.
    async fn published_url(&self, def: &ServiceDefinition) -> Result<Option<Url>, ServiceError> {
        let Some(container_port) = self
            .spec(def)
            .and_then(|spec| spec.ports.first())
            .map(|port| port.container_port)
        else {
            return Ok(None);
        };

        let cached = self.supervisor.bindings(&def.name).and_then(|bindings| {
            bindings
                .iter()
                .find(|binding| binding.container_port == container_port)
                .map(|binding| binding.host_port)
        });
        let host_port = match cached {
            Some(port) => Some(port),
            None => self
                .inspect(def)
                .await?
                .filter(|info| info.running)
                .and_then(|info| info.host_port(container_port)),
        };

        host_port
            .map(|port| local_url(&def.name, port))
            .transpose()
    }

    async fn require_running(&self, def: &ServiceDefinition) -> Result<ContainerInfo, ServiceError> {
        match self.inspect(def).await? {
            Some(info) if info.running => Ok(info),
            Some(info) => Err(Self::unreachable(def, format!("container is {}", info.status))),
            None => Err(Self::unreachable(def, "no container")),
        }
    }

    /// The container was started and has since stopped.
    async fn exited(&self, def: &ServiceDefinition) -> Result<(), ServiceError> {
        match self.inspect(def).await? {
            Some(info) if !info.running && info.status == "exited" => {
                Err(ServiceError::StartFailed {
                    service: def.name.clone(),
                    reason: format!(
                        "container exited during startup (exit code {})",
                        info.exit_code.unwrap_or_default()
                    ),
                })
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<E: ContainerEngine + 'static> ServiceBackend for ContainerBackend<E> {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
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
                let base = if ctx.remote {
                    ctx.endpoint.clone()
                } else {
                    self.published_url(def)
                        .await?
                        .unwrap_or_else(|| ctx.endpoint.clone())
                };
                self.health.payload(&def.name, &base, path, ctx).await
            }
            ReadinessProbe::Http {
                path,
                structured: false,
            } => {
                let base = match self.published_url(def).await? {
                    Some(url) => url,
                    None => {
                        let port = def
                            .port
                            .ok_or_else(|| Self::unreachable(def, "no port published"))?;
                        local_url(&def.name, port)?
                    }
                };
                self.health.probe(&def.name, &base, path).await
            }
            ReadinessProbe::Liveness => {
                self.require_running(def).await?;
                Ok(HealthCheck::healthy())
            }
            ReadinessProbe::LogPattern(pattern) => {
                let info = self.require_running(def).await?;
                let lines = self
                    .supervisor
                    .logs(&info.name, LOG_SCAN_LINES)
                    .await
                    .map_err(|err| Self::unreachable(def, err.to_string()))?;
                if lines.iter().any(|line| line.contains(pattern.as_str())) {
                    Ok(HealthCheck::healthy())
                } else {
                    Err(Self::unreachable(
                        def,
                        format!("waiting for '{pattern}' in container output"),
                    ))
                }
            }
        }
    }

    async fn start_local(&self, def: &ServiceDefinition) -> Result<(), ServiceError> {
        let spec = self.spec(def).ok_or_else(|| ServiceError::StartFailed {
            service: def.name.clone(),
            reason: "no image configured".into(),
        })?;

        self.supervisor
            .run(spec)
            .await
            .map(|_| ())
            .map_err(|err| ServiceError::StartFailed {
                service: def.name.clone(),
                reason: err.to_string(),
            })
    }

    async fn wait_ready(
        &self,
        def: &ServiceDefinition,
        ctx: &ProbeContext,
        timeout: Duration,
    ) -> Result<HealthCheck, ServiceError> {
        self.poller
            .within(timeout, || async {
                match self.exited(def).await {
                    Ok(()) => self.check_health(def, ctx).await,
                    Err(err) => Err(err),
                }
            })
            .await
            .map_err(|err| err.into_service_error(&def.name, timeout))
    }

    async fn stop(&self, def: &ServiceDefinition) -> Result<(), ServiceError> {
        let Some(spec) = self.spec(def) else {
            return Ok(());
        };
        self.supervisor
            .stop(&spec.name)
            .await
            .map_err(|err| ServiceError::StopFailed {
                service: def.name.clone(),
                reason: err.to_string(),
            })
    }

    async fn runtime_state(&self, def: &ServiceDefinition) -> RuntimeState {
        let Some(spec) = self.spec(def) else {
            return RuntimeState::Absent;
        };
        match self.supervisor.inspect(&spec.name).await {
            Ok(Some(info)) if info.running => RuntimeState::Running {
                id: short_id(&info.id).to_string(),
            },
            Ok(Some(info)) => match info.exit_code {
                Some(code) if code != 0 => RuntimeState::Failed {
                    detail: format!("exit code {code}"),
                },
                _ => RuntimeState::Stopped,
            },
            Ok(None) => RuntimeState::Absent,
            Err(err) => RuntimeState::Failed {
                detail: err.to_string(),
            },
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
