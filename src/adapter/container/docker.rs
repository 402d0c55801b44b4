//! [`ContainerEngine`] backed by the `docker` command line.
//!
//! Image pulls go through the engine API with [`bollard`] so layer progress
//! can be reported; when the API is not reachable the pull falls back to
//! `docker pull`.

use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bollard::errors::Error as ApiError;
use bollard::image::CreateImageOptions;
use bollard::models::CreateImageInfo;
use bollard::Docker;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::ContainerRunSpec;
use crate::error::EngineError;
use crate::port::{ContainerEngine, ContainerInfo, PortBinding, Publish, PullEvent};

/// Drives the engine through its CLI, pulling images over the engine API.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    api: Option<Docker>,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    /// `binary` for engine commands. The API client honours `DOCKER_HOST`.
    pub fn new(binary: impl Into<String>) -> Self {
        let api = match Docker::connect_with_local_defaults() {
            Ok(api) => Some(api),
            Err(error) => {
                debug!(error = %error, "engine API client unavailable; pulls use the CLI");
                None
            }
        };
        Self {
            binary: binary.into(),
            api,
        }
    }

    async fn exec(&self, args: &[String]) -> Result<String, EngineError> {
        debug!(command = %self.describe(args), "running container engine command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|error| {
                if error.kind() == std::io::ErrorKind::NotFound {
                    EngineError::Unavailable(format!("`{}` not found on PATH", self.binary))
                } else {
                    EngineError::Io(error)
                }
            })?;

        if !output.status.success() {
            return Err(EngineError::CommandFailed {
                command: self.describe(args),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.binary, args.join(" "))
    }

    async fn pull_cli(&self, image: &str) -> Result<(), EngineError> {
        self.exec(&args(["pull", "--quiet", image])).await.map(|_| ())
    }

    async fn pull_api(
        api: &Docker,
        image: &str,
        on_event: &mut (dyn FnMut(PullEvent) + Send),
    ) -> Result<(), ApiPullError> {
        let options = CreateImageOptions {
            from_image: split_reference(image).0,
            tag: pull_tag(image),
            ..Default::default()
        };

        let mut stream = api.create_image(Some(options), None, None);
        let mut received = false;
        while let Some(item) = stream.next().await {
            match item {
                Ok(message) => {
                    if let Some(error) = message.error {
                        return Err(ApiPullError::Pull(EngineError::Pull(error)));
                    }
                    received = true;
                    on_event(pull_event(message));
                }
                Err(ApiError::DockerResponseServerError {
                    status_code,
                    message,
                }) => {
                    return Err(ApiPullError::Pull(EngineError::Pull(format!(
                        "{status_code}: {message}"
                    ))));
                }
                Err(ApiError::DockerStreamError { error }) => {
                    return Err(ApiPullError::Pull(EngineError::Pull(error)));
                }
                Err(error) if !received => return Err(ApiPullError::Connect(error)),
                Err(error) => return Err(ApiPullError::Pull(EngineError::Pull(error.to_string()))),
            }
        }
        Ok(())
    }
}

enum ApiPullError {
    /// The API could not be reached; the CLI may still work.
    Connect(ApiError),
    Pull(EngineError),
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn network_exists(&self, name: &str) -> Result<bool, EngineError> {
        let output = self
            .exec(&args([
                "network",
                "ls",
                "--filter",
                &format!("name=^{name}$"),
                "--format",
                "{{.Name}}",
            ]))
            .await?;
        Ok(output.lines().any(|line| line.trim() == name))
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), EngineError> {
        let mut command = args(["network", "create"]);
        for (key, value) in labels {
            command.push("--label".into());
            command.push(format!("{key}={value}"));
        }
        command.push(name.to_string());

        match self.exec(&command).await {
            Ok(_) => Ok(()),
            // Another invocation created it first.
            Err(EngineError::CommandFailed { stderr, .. }) if stderr.contains("already exists") => {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn image_present(&self, image: &str) -> Result<bool, EngineError> {
        match self
            .exec(&args(["image", "inspect", "--format", "{{.Id}}", image]))
            .await
        {
            Ok(_) => Ok(true),
            Err(EngineError::CommandFailed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn pull(
        &self,
        image: &str,
        on_event: &mut (dyn FnMut(PullEvent) + Send),
    ) -> Result<(), EngineError> {
        if let Some(api) = &self.api {
            match Self::pull_api(api, image, on_event).await {
                Ok(()) => return Ok(()),
                Err(ApiPullError::Pull(err)) => return Err(err),
                Err(ApiPullError::Connect(error)) => {
                    debug!(error = %error, "engine API unavailable; pulling via CLI");
                }
            }
        }

        info!(image, "pulling image");
        self.pull_cli(image).await
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, EngineError> {
        let output = match self.exec(&args(["container", "inspect", name])).await {
            Ok(output) => output,
            Err(EngineError::CommandFailed { stderr, .. })
                if stderr.to_ascii_lowercase().contains("no such") =>
            {
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        parse_inspect(&output)
    }

    async fn run(
        &self,
        spec: &ContainerRunSpec,
        publish: &[Publish],
        network: &str,
    ) -> Result<String, EngineError> {
        self.exec(&run_args(spec, publish, network)).await
    }

    async fn stop(&self, name: &str, grace: Duration) -> Result<(), EngineError> {
        self.exec(&args([
            "stop",
            "--time",
            &grace.as_secs().to_string(),
            name,
        ]))
        .await
        .map(|_| ())
    }

    async fn remove(&self, name: &str) -> Result<(), EngineError> {
        self.exec(&args(["rm", "--force", name])).await.map(|_| ())
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>, EngineError> {
        let output = Command::new(&self.binary)
            .args(["logs", "--timestamps", "--tail", &tail.to_string(), name])
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(EngineError::CommandFailed {
                command: format!("{} logs {name}", self.binary),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .chain(String::from_utf8_lossy(&output.stderr).lines())
            .map(str::to_string)
            .collect();
        // Both streams carry RFC 3339 timestamps.
        lines.sort();
        Ok(lines)
    }

    async fn list_labelled(
        &self,
        label: &str,
        value: &str,
    ) -> Result<Vec<ContainerInfo>, EngineError> {
        let names = self
            .exec(&args([
                "ps",
                "--all",
                "--filter",
                &format!("label={label}={value}"),
                "--format",
                "{{.Names}}",
            ]))
            .await?;

        let mut containers = Vec::new();
        for name in names.lines().map(str::trim).filter(|name| !name.is_empty()) {
            match self.inspect(name).await? {
                Some(info) => containers.push(info),
                None => warn!(container = name, "container vanished while listing"),
            }
        }
        Ok(containers)
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|item| (*item).to_string()).collect()
}

/// Arguments for `docker run`.
pub fn run_args(spec: &ContainerRunSpec, publish: &[Publish], network: &str) -> Vec<String> {
    let mut command = args(["run", "--detach", "--name", &spec.name, "--network", network]);
    for (key, value) in &spec.labels {
        command.push("--label".into());
        command.push(format!("{key}={value}"));
    }
    for (key, value) in &spec.env {
        command.push("--env".into());
        command.push(format!("{key}={value}"));
    }
    for bind in &spec.volumes {
        command.push("--volume".into());
        command.push(bind.clone());
    }
    for host in &spec.extra_hosts {
        command.push("--add-host".into());
        command.push(host.clone());
    }
    for port in publish {
        command.push("--publish".into());
        command.push(match port {
            Publish::Fixed {
                host_port,
                container_port,
            } => format!("{host_port}:{container_port}"),
            Publish::Dynamic { container_port } => container_port.to_string(),
        });
    }
    command.push(spec.image.clone());
    command.extend(spec.args.iter().cloned());
    command
}

/// Split `repo[:tag]` at the tag separator, ignoring registry ports.
/// Digest references are passed through whole.
pub fn split_reference(image: &str) -> (&str, Option<&str>) {
    if image.contains('@') {
        return (image, None);
    }
    let name_start = image.rfind('/').map_or(0, |slash| slash + 1);
    match image[name_start..].rfind(':') {
        Some(colon) => {
            let at = name_start + colon;
            (&image[..at], Some(&image[at + 1..]))
        }
        None => (image, None),
    }
}

/// Tag to request from the API. An empty tag pulls every tag of the
/// repository, so untagged names ask for `latest`.
fn pull_tag(image: &str) -> &str {
    match split_reference(image) {
        (_, Some(tag)) => tag,
        (_, None) if image.contains('@') => "",
        (_, None) => "latest",
    }
}

fn pull_event(message: CreateImageInfo) -> PullEvent {
    let (current, total) = message.progress_detail.map_or((None, None), |detail| {
        (
            detail.current.and_then(|n| u64::try_from(n).ok()),
            detail.total.and_then(|n| u64::try_from(n).ok()),
        )
    });
    PullEvent {
        layer: message.id,
        status: message.status.unwrap_or_default(),
        current,
        total,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedContainer {
    id: String,
    name: String,
    config: InspectedConfig,
    state: InspectedState,
    network_settings: InspectedNetwork,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedConfig {
    image: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedState {
    running: bool,
    status: String,
    #[serde(default)]
    exit_code: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedNetwork {
    #[serde(default)]
    ports: Option<HashMap<String, Option<Vec<InspectedBinding>>>>,
}

#[derive(Debug, Deserialize)]
struct InspectedBinding {
    #[serde(rename = "HostIp", default)]
    host_ip: String,
    #[serde(rename = "HostPort")]
    host_port: String,
}

/// Parse `docker container inspect` output for a single container.
pub fn parse_inspect(output: &str) -> Result<Option<ContainerInfo>, EngineError> {
    let containers: Vec<InspectedContainer> = serde_json::from_str(output)?;
    let Some(container) = containers.into_iter().next() else {
        return Ok(None);
    };

    let mut ports = Vec::new();
    for (key, bindings) in container.network_settings.ports.unwrap_or_default() {
        let (port, protocol) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
        let container_port: u16 = port
            .parse()
            .map_err(|_| EngineError::Parse(format!("invalid port key {key}")))?;
        for binding in bindings.unwrap_or_default() {
            let host_port: u16 = binding
                .host_port
                .parse()
                .map_err(|_| EngineError::Parse(format!("invalid host port {}", binding.host_port)))?;
            ports.push(PortBinding {
                container_port,
                protocol: protocol.to_string(),
                host_ip: binding.host_ip,
                host_port,
            });
        }
    }
    // IPv4 and IPv6 bindings of the same port share a host port; keep one.
    ports.sort_by(|a, b| {
        (a.container_port, &a.protocol, a.host_ip.contains(':'))
            .cmp(&(b.container_port, &b.protocol, b.host_ip.contains(':')))
    });
    ports.dedup_by(|a, b| a.container_port == b.container_port && a.protocol == b.protocol);

    Ok(Some(ContainerInfo {
        id: container.id,
        name: container.name.trim_start_matches('/').to_string(),
        image: container.config.image,
        running: container.state.running,
        status: container.state.status,
        exit_code: container.state.exit_code,
        labels: container.config.labels.unwrap_or_default(),
        ports,
    }))
}

#[cfg(test)]
mod tests {
    use bollard::models::ProgressDetail;

    use super::*;
    use crate::domain::PortSpec;

    const INSPECT: &str = r#"[{
        "Id": "4f2c9a",
        "Name": "/stackctl-server",
        "Config": {
            "Image": "stackctl/server:latest",
            "Labels": {"io.stackctl.managed": "true", "io.stackctl.component": "server"}
        },
        "State": {"Running": true, "Status": "running", "ExitCode": 0},
        "NetworkSettings": {
            "Ports": {
                "8080/tcp": [
                    {"HostIp": "0.0.0.0", "HostPort": "49153"},
                    {"HostIp": "::", "HostPort": "49153"}
                ],
                "9090/tcp": null
            }
        }
    }]"#;

    #[test]
    fn parses_inspect_output() {
        let info = parse_inspect(INSPECT).unwrap().unwrap();

        assert_eq!(info.name, "stackctl-server");
        assert_eq!(info.image, "stackctl/server:latest");
        assert!(info.running);
        assert_eq!(info.ports.len(), 1);
        assert_eq!(info.host_port(8080), Some(49153));
        assert_eq!(info.ports[0].host_ip, "0.0.0.0");
        assert_eq!(info.labels.get("io.stackctl.component").map(String::as_str), Some("server"));
    }

    #[test]
    fn empty_inspect_is_none() {
        assert!(parse_inspect("[]").unwrap().is_none());
    }

    #[test]
    fn run_args_include_network_labels_and_ports() {
        let spec = ContainerRunSpec::new("server", "stackctl/server:1.2")
            .port(PortSpec::fixed(8080, 8080))
            .env("RUST_LOG", "info")
            .args(["serve"]);
        let publish = [Publish::Fixed {
            host_port: 8080,
            container_port: 8080,
        }];

        let run = run_args(&spec, &publish, "stackctl");
        let joined = run.join(" ");

        assert!(joined.starts_with("run --detach --name stackctl-server --network stackctl"));
        assert!(joined.contains("--label io.stackctl.managed=true"));
        assert!(joined.contains("--env RUST_LOG=info"));
        assert!(joined.contains("--publish 8080:8080"));
        assert!(joined.ends_with("stackctl/server:1.2 serve"));
    }

    #[test]
    fn splits_references() {
        assert_eq!(split_reference("stackctl/server:1.2"), ("stackctl/server", Some("1.2")));
        assert_eq!(split_reference("localhost:5000/rag"), ("localhost:5000/rag", None));
        assert_eq!(split_reference("ollama/ollama"), ("ollama/ollama", None));
        assert_eq!(split_reference("a/b@sha256:abc"), ("a/b@sha256:abc", None));
    }

    #[test]
    fn untagged_pulls_ask_for_latest() {
        assert_eq!(pull_tag("ollama/ollama"), "latest");
        assert_eq!(pull_tag("ghcr.io/stackctl/rag:1.4.0"), "1.4.0");
        assert_eq!(pull_tag("localhost:5000/rag"), "latest");
        assert_eq!(pull_tag("a/b@sha256:abc"), "");
    }

    #[test]
    fn pull_messages_become_events() {
        let message = CreateImageInfo {
            id: Some("abc".into()),
            status: Some("Downloading".into()),
            progress_detail: Some(ProgressDetail {
                current: Some(10),
                total: Some(100),
            }),
            ..Default::default()
        };

        let event = pull_event(message);
        assert_eq!(event.layer.as_deref(), Some("abc"));
        assert_eq!(event.status, "Downloading");
        assert_eq!(event.current, Some(10));
        assert_eq!(event.total, Some(100));
    }

    #[test]
    fn status_only_messages_have_no_progress() {
        let message = CreateImageInfo {
            status: Some("Pulling from ollama/ollama".into()),
            ..Default::default()
        };

        let event = pull_event(message);
        assert!(event.layer.is_none());
        assert_eq!(event.current, None);
        assert_eq!(event.total, None);
    }
}
