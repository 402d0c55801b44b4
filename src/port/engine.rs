//! Container engine port.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::ContainerRunSpec;
use crate::error::EngineError;

/// Resolved host binding for one container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub protocol: String,
    pub host_ip: String,
    pub host_port: u16,
}

/// Port publication actually passed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    /// Bind the container port to this host port.
    Fixed { host_port: u16, container_port: u16 },
    /// Let the engine pick a free host port.
    Dynamic { container_port: u16 },
}

impl Publish {
    #[must_use]
    pub fn container_port(&self) -> u16 {
        match self {
            Self::Fixed { container_port, .. } | Self::Dynamic { container_port } => {
                *container_port
            }
        }
    }
}

/// Inspection result for one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    pub status: String,
    pub exit_code: Option<i64>,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<PortBinding>,
}

impl ContainerInfo {
    /// Host port bound to `container_port`, if any.
    #[must_use]
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|binding| binding.container_port == container_port)
            .map(|binding| binding.host_port)
    }
}

/// One progress message for a single image layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullEvent {
    pub layer: Option<String>,
    pub status: String,
    pub current: Option<u64>,
    pub total: Option<u64>,
}

/// Operations this tool needs from an external container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn network_exists(&self, name: &str) -> Result<bool, EngineError>;

    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), EngineError>;

    async fn image_present(&self, image: &str) -> Result<bool, EngineError>;

    /// Pull an image, reporting layer progress as it arrives.
    async fn pull(
        &self,
        image: &str,
        on_event: &mut (dyn FnMut(PullEvent) + Send),
    ) -> Result<(), EngineError>;

    /// `Ok(None)` when no container has this name.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, EngineError>;

    /// Create and start a detached container. Returns its id.
    async fn run(
        &self,
        spec: &ContainerRunSpec,
        publish: &[Publish],
        network: &str,
    ) -> Result<String, EngineError>;

    async fn stop(&self, name: &str, grace: Duration) -> Result<(), EngineError>;

    async fn remove(&self, name: &str) -> Result<(), EngineError>;

    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>, EngineError>;

    /// Containers carrying `label=value`, running or not.
    async fn list_labelled(&self, label: &str, value: &str)
        -> Result<Vec<ContainerInfo>, EngineError>;
}
