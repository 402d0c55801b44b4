//! Runtime wiring: configuration in, orchestrator and backend out.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapter::container::{ContainerBackend, ContainerSupervisor, DockerCli, PullReporter};
use crate::adapter::http::{HealthClient, PROBE_TIMEOUT};
use crate::adapter::process::{logfile, ProcessBackend, ProcessSupervisor, StateDir};
use crate::application::Orchestrator;
use crate::domain::container::{container_name, COMPONENT_LABEL};
use crate::domain::ServiceName;
use crate::error::{Error, Result, ServiceError, StopErrors};
use crate::infrastructure::config::Config;
use crate::port::{BackendKind, ServiceBackend};

/// Backend-specific handle kept next to the orchestrator for commands that
/// go past the [`ServiceBackend`] trait, such as reading logs.
pub enum BackendHandle {
    Process(Arc<ProcessSupervisor>),
    Container(Arc<ContainerSupervisor<DockerCli>>),
}

/// Everything one command invocation needs.
pub struct Stack {
    pub orchestrator: Orchestrator,
    pub handle: BackendHandle,
}

/// Build the orchestrator for `backend` from configuration.
///
/// `reporter` receives image pull progress when the container backend is used.
pub fn build_stack(
    config: &Config,
    backend: BackendKind,
    reporter: Box<dyn PullReporter>,
) -> Result<Stack> {
    let catalog = Arc::new(config.catalog(backend));
    let poller = config.poller();
    let health = HealthClient::new(PROBE_TIMEOUT)?;

    let (service_backend, handle): (Arc<dyn ServiceBackend>, BackendHandle) = match backend {
        BackendKind::Process => {
            let state = StateDir::new(config.state_dir());
            debug!(state_dir = %state.root().display(), "using process backend");
            let supervisor = Arc::new(ProcessSupervisor::new(state));
            let specs = config.process_specs(&catalog);
            (
                Arc::new(ProcessBackend::new(
                    Arc::clone(&supervisor),
                    specs,
                    health,
                    poller,
                )),
                BackendHandle::Process(supervisor),
            )
        }
        BackendKind::Container => {
            debug!(network = %config.stack.network, "using container backend");
            let supervisor = Arc::new(
                ContainerSupervisor::new(Arc::new(DockerCli::default()))
                    .with_network(config.stack.network.clone())
                    .with_reporter(reporter),
            );
            let specs = config.container_specs(&catalog);
            (
                Arc::new(ContainerBackend::new(
                    Arc::clone(&supervisor),
                    specs,
                    health,
                    poller,
                )),
                BackendHandle::Container(supervisor),
            )
        }
    };

    let orchestrator = Orchestrator::new(
        catalog,
        service_backend,
        config.orchestrator_settings(),
    );
    Ok(Stack {
        orchestrator,
        handle,
    })
}

impl Stack {
    /// Last `lines` lines of a service's output.
    pub async fn logs(&self, service: &ServiceName, lines: usize) -> Result<Vec<String>> {
        self.orchestrator.catalog().get(service)?;
        match &self.handle {
            BackendHandle::Process(supervisor) => {
                let path = supervisor.log_path(service);
                if !path.exists() {
                    return Ok(Vec::new());
                }
                Ok(logfile::tail(&path, lines)?)
            }
            BackendHandle::Container(supervisor) => {
                let name = container_name(service);
                if supervisor.inspect(&name).await?.is_none() {
                    return Ok(Vec::new());
                }
                Ok(supervisor.logs(&name, lines).await?)
            }
        }
    }

    /// Stop `services`, or every known service when empty. With the
    /// container backend, managed containers of services no longer in the
    /// catalog are removed too.
    pub async fn down(&self, services: &[ServiceName]) -> Result<Vec<ServiceName>> {
        let catalog = self.orchestrator.catalog();
        let targets: Vec<ServiceName> = if services.is_empty() {
            catalog.names().cloned().collect()
        } else {
            for name in services {
                catalog.get(name)?;
            }
            services.to_vec()
        };

        let mut errors = match self.orchestrator.teardown(&targets).await {
            Ok(()) => StopErrors::default(),
            Err(Error::Teardown(errors)) => errors,
            Err(err) => return Err(err),
        };

        if services.is_empty() {
            if let BackendHandle::Container(supervisor) = &self.handle {
                for info in supervisor.managed().await? {
                    let component = info.labels.get(COMPONENT_LABEL).cloned().unwrap_or_default();
                    if catalog.contains(&component) {
                        continue;
                    }
                    info!(container = %info.name, "removing orphaned container");
                    if let Err(err) = supervisor.stop(&info.name).await {
                        warn!(container = %info.name, error = %err, "failed to remove container");
                        errors.0.push(ServiceError::StopFailed {
                            service: ServiceName::from(component),
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(targets)
        } else {
            Err(Error::Teardown(errors))
        }
    }
}
