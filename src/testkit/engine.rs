//! In-memory [`ContainerEngine`].
//!
//! Containers, images and networks live in a map. Dynamic host ports are
//! handed out from the ephemeral range, so bindings are deterministic within
//! one engine.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::ContainerRunSpec;
use crate::error::EngineError;
use crate::port::{ContainerEngine, ContainerInfo, PortBinding, PullEvent, Publish};

/// First host port handed out for dynamic publications.
pub const FIRST_DYNAMIC_PORT: u16 = 49152;

#[derive(Debug, Default)]
struct State {
    networks: HashSet<String>,
    images: HashSet<String>,
    containers: BTreeMap<String, ContainerInfo>,
    logs: HashMap<String, Vec<String>>,
    next_port: u16,
    next_id: u64,
}

/// Fake engine with call counters.
#[derive(Debug)]
pub struct FakeEngine {
    state: Mutex<State>,
    fail_pulls: bool,
    exit_on_run: Option<i64>,
    runs: AtomicUsize,
    pulls: AtomicUsize,
    removes: AtomicUsize,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_port: FIRST_DYNAMIC_PORT,
                ..State::default()
            }),
            fail_pulls: false,
            exit_on_run: None,
            runs: AtomicUsize::new(0),
            pulls: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
        }
    }

    /// Mark `image` as already cached.
    #[must_use]
    pub fn with_image(self, image: &str) -> Self {
        self.state.lock().images.insert(image.to_string());
        self
    }

    /// Every pull fails.
    #[must_use]
    pub fn failing_pulls(mut self) -> Self {
        self.fail_pulls = true;
        self
    }

    /// Containers exit with `code` right after they are created.
    #[must_use]
    pub fn exiting_with(mut self, code: i64) -> Self {
        self.exit_on_run = Some(code);
        self
    }

    /// Put a container in place as if another invocation had created it.
    pub fn insert(&self, info: ContainerInfo) {
        self.state.lock().containers.insert(info.name.clone(), info);
    }

    /// Make a running container exit.
    pub fn exit(&self, name: &str, code: i64) {
        if let Some(info) = self.state.lock().containers.get_mut(name) {
            info.running = false;
            info.status = "exited".into();
            info.exit_code = Some(code);
        }
    }

    /// Append output lines to a container's log.
    pub fn log(&self, name: &str, lines: &[&str]) {
        self.state
            .lock()
            .logs
            .entry(name.to_string())
            .or_default()
            .extend(lines.iter().map(|line| (*line).to_string()));
    }

    pub fn container(&self, name: &str) -> Option<ContainerInfo> {
        self.state.lock().containers.get(name).cloned()
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.state.lock().networks.contains(name)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn network_exists(&self, name: &str) -> Result<bool, EngineError> {
        Ok(self.has_network(name))
    }

    async fn create_network(
        &self,
        name: &str,
        _labels: &BTreeMap<String, String>,
    ) -> Result<(), EngineError> {
        self.state.lock().networks.insert(name.to_string());
        Ok(())
    }

    async fn image_present(&self, image: &str) -> Result<bool, EngineError> {
        Ok(self.state.lock().images.contains(image))
    }

    async fn pull(
        &self,
        image: &str,
        on_event: &mut (dyn FnMut(PullEvent) + Send),
    ) -> Result<(), EngineError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if self.fail_pulls {
            return Err(EngineError::Pull(format!("manifest for {image} not found")));
        }
        for current in [0, 512, 1024] {
            on_event(PullEvent {
                layer: Some("layer0".into()),
                status: "Downloading".into(),
                current: Some(current),
                total: Some(1024),
            });
        }
        self.state.lock().images.insert(image.to_string());
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, EngineError> {
        Ok(self.container(name))
    }

    async fn run(
        &self,
        spec: &ContainerRunSpec,
        publish: &[Publish],
        network: &str,
    ) -> Result<String, EngineError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if !state.networks.contains(network) {
            return Err(EngineError::CommandFailed {
                command: "docker run".into(),
                code: Some(125),
                stderr: format!("network {network} not found"),
            });
        }
        if state.containers.contains_key(&spec.name) {
            return Err(EngineError::CommandFailed {
                command: "docker run".into(),
                code: Some(125),
                stderr: format!("container name \"/{}\" is already in use", spec.name),
            });
        }

        let mut ports = Vec::with_capacity(publish.len());
        for entry in publish {
            let host_port = match *entry {
                Publish::Fixed { host_port, .. } => host_port,
                Publish::Dynamic { .. } => {
                    let port = state.next_port;
                    state.next_port = state.next_port.wrapping_add(1);
                    port
                }
            };
            ports.push(PortBinding {
                container_port: entry.container_port(),
                protocol: "tcp".into(),
                host_ip: "0.0.0.0".into(),
                host_port,
            });
        }

        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);
        let (running, status, exit_code) = match self.exit_on_run {
            Some(code) => (false, "exited", Some(code)),
            None => (true, "running", None),
        };
        state.containers.insert(
            spec.name.clone(),
            ContainerInfo {
                id: id.clone(),
                name: spec.name.clone(),
                image: spec.image.clone(),
                running,
                status: status.into(),
                exit_code,
                labels: spec.labels.clone(),
                ports,
            },
        );
        Ok(id)
    }

    async fn stop(&self, name: &str, _grace: Duration) -> Result<(), EngineError> {
        match self.state.lock().containers.get_mut(name) {
            Some(info) => {
                info.running = false;
                info.status = "exited".into();
                info.exit_code = Some(0);
                Ok(())
            }
            None => Err(EngineError::CommandFailed {
                command: format!("docker stop {name}"),
                code: Some(1),
                stderr: format!("No such container: {name}"),
            }),
        }
    }

    async fn remove(&self, name: &str) -> Result<(), EngineError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.containers.remove(name);
        state.logs.remove(name);
        Ok(())
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>, EngineError> {
        let state = self.state.lock();
        if !state.containers.contains_key(name) {
            return Err(EngineError::CommandFailed {
                command: format!("docker logs {name}"),
                code: Some(1),
                stderr: format!("No such container: {name}"),
            });
        }
        let lines = state.logs.get(name).cloned().unwrap_or_default();
        let skip = lines.len().saturating_sub(tail);
        Ok(lines.into_iter().skip(skip).collect())
    }

    async fn list_labelled(
        &self,
        label: &str,
        value: &str,
    ) -> Result<Vec<ContainerInfo>, EngineError> {
        Ok(self
            .state
            .lock()
            .containers
            .values()
            .filter(|info| info.labels.get(label).map(String::as_str) == Some(value))
            .cloned()
            .collect())
    }
}
