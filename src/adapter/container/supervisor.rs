//! Idempotent container lifecycle on top of a [`ContainerEngine`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::ports;
use super::progress::{PullProgress, PullReporter, SilentReporter};
use crate::domain::container::{COMPONENT_LABEL, MANAGED_LABEL};
use crate::domain::{ContainerRunSpec, ServiceName};
use crate::error::EngineError;
use crate::port::{ContainerEngine, ContainerInfo, PortBinding, PullEvent};

/// Network every managed container joins.
pub const DEFAULT_NETWORK: &str = "stackctl";
/// Grace period handed to `docker stop`.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// Result of bringing one container up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    pub id: String,
    pub bindings: Vec<PortBinding>,
    /// An existing container was kept instead of creating a new one.
    pub reused: bool,
}

impl RunningContainer {
    #[must_use]
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.bindings
            .iter()
            .find(|binding| binding.container_port == container_port)
            .map(|binding| binding.host_port)
    }
}

/// Brings containers up and down, remembering resolved port bindings.
pub struct ContainerSupervisor<E: ContainerEngine> {
    engine: Arc<E>,
    network: String,
    grace: Duration,
    bindings: DashMap<ServiceName, Vec<PortBinding>>,
    reporter: Mutex<Box<dyn PullReporter>>,
}

impl<E: ContainerEngine> ContainerSupervisor<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            network: DEFAULT_NETWORK.to_string(),
            grace: DEFAULT_STOP_GRACE,
            bindings: DashMap::new(),
            reporter: Mutex::new(Box::new(SilentReporter)),
        }
    }

    #[must_use]
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    #[must_use]
    pub fn with_reporter(self, reporter: Box<dyn PullReporter>) -> Self {
        *self.reporter.lock() = reporter;
        self
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Bindings recorded when this supervisor last brought `service` up.
    pub fn bindings(&self, service: &ServiceName) -> Option<Vec<PortBinding>> {
        self.bindings.get(service).map(|entry| entry.value().clone())
    }

    /// Create the managed network unless it already exists.
    pub async fn ensure_network(&self) -> Result<(), EngineError> {
        if self.engine.network_exists(&self.network).await? {
            return Ok(());
        }
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        info!(network = %self.network, "creating container network");
        self.engine.create_network(&self.network, &labels).await
    }

    /// Pull `image` unless it is already cached.
    pub async fn ensure_image(&self, image: &str) -> Result<(), EngineError> {
        if self.engine.image_present(image).await? {
            debug!(image, "image already present");
            return Ok(());
        }

        let mut progress = PullProgress::default();
        let reporter = &self.reporter;
        let mut on_event = |event: PullEvent| {
            if let Some(snapshot) = progress.observe(&event, Instant::now()) {
                reporter.lock().update(image, &snapshot);
            }
        };
        let result = self.engine.pull(image, &mut on_event).await;

        match &result {
            Ok(()) => self.reporter.lock().finish(image, Ok(())),
            Err(err) => self.reporter.lock().finish(image, Err(&err.to_string())),
        }
        result
    }

    /// Bring the container for `spec` up and return its host bindings.
    ///
    /// A running container with the same name and image is reused. Any other
    /// managed container under that name is removed first; an unmanaged one
    /// is left alone and reported as [`EngineError::Unmanaged`].
    pub async fn run(&self, spec: &ContainerRunSpec) -> Result<RunningContainer, EngineError> {
        self.ensure_network().await?;

        if let Some(existing) = self.engine.inspect(&spec.name).await? {
            ensure_managed(&existing)?;
            if existing.running && existing.image == spec.image {
                let bindings = ports::resolve(spec, &existing)?;
                info!(container = %spec.name, id = %existing.id, "reusing running container");
                self.bindings.insert(spec.service.clone(), bindings.clone());
                return Ok(RunningContainer {
                    id: existing.id,
                    bindings,
                    reused: true,
                });
            }
            info!(
                container = %spec.name,
                status = %existing.status,
                image = %existing.image,
                "removing stale container"
            );
            self.engine.remove(&spec.name).await?;
        }

        if let Err(err) = self.ensure_image(&spec.image).await {
            // The run below reports the real failure if the image is missing.
            warn!(image = %spec.image, error = %err, "image pull failed");
        }

        let publish = ports::plan(spec, ports::port_is_free)?;
        let id = self.engine.run(spec, &publish, &self.network).await?;

        let info = self
            .engine
            .inspect(&spec.name)
            .await?
            .ok_or_else(|| EngineError::NotRunning {
                name: spec.name.clone(),
                status: "missing".into(),
            })?;
        if !info.running {
            return Err(EngineError::NotRunning {
                name: spec.name.clone(),
                status: exit_status(&info),
            });
        }

        let bindings = ports::resolve(spec, &info)?;
        info!(
            container = %spec.name,
            id = %id,
            ports = ?bindings.iter().map(|b| (b.container_port, b.host_port)).collect::<Vec<_>>(),
            "container started"
        );
        self.bindings.insert(spec.service.clone(), bindings.clone());
        Ok(RunningContainer {
            id,
            bindings,
            reused: false,
        })
    }

    /// Stop and remove a container. Missing containers are not an error.
    pub async fn stop(&self, name: &str) -> Result<(), EngineError> {
        let Some(info) = self.engine.inspect(name).await? else {
            debug!(container = name, "container already gone");
            return Ok(());
        };
        ensure_managed(&info)?;
        if info.running {
            self.engine.stop(name, self.grace).await?;
        }
        self.engine.remove(name).await?;
        if let Some(component) = info.labels.get(COMPONENT_LABEL) {
            self.bindings.remove(component.as_str());
        }
        info!(container = name, "container removed");
        Ok(())
    }

    pub async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, EngineError> {
        self.engine.inspect(name).await
    }

    pub async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>, EngineError> {
        self.engine.logs(name, tail).await
    }

    /// Every container this tool manages, running or not.
    pub async fn managed(&self) -> Result<Vec<ContainerInfo>, EngineError> {
        self.engine.list_labelled(MANAGED_LABEL, "true").await
    }
}

fn ensure_managed(info: &ContainerInfo) -> Result<(), EngineError> {
    if info.labels.get(MANAGED_LABEL).map(String::as_str) == Some("true") {
        Ok(())
    } else {
        Err(EngineError::Unmanaged {
            name: info.name.clone(),
        })
    }
}

fn exit_status(info: &ContainerInfo) -> String {
    match info.exit_code {
        Some(code) => format!("{}, exit code {code}", info.status),
        None => info.status.clone(),
    }
}
