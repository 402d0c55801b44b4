//! Description of a managed container.

use std::collections::BTreeMap;

use super::service::ServiceName;

/// Label carried by every container and network this tool creates.
pub const MANAGED_LABEL: &str = "io.stackctl.managed";
/// Label naming the service a container belongs to.
pub const COMPONENT_LABEL: &str = "io.stackctl.component";
/// Prefix of every managed container name.
pub const CONTAINER_PREFIX: &str = "stackctl-";
/// Host alias for reaching the invoking machine from a container.
pub const HOST_ALIAS: &str = "host.docker.internal";

/// One container port and the host port it should be reachable on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortSpec {
    pub container_port: u16,
    /// Preferred host port; `None` lets the engine choose one.
    pub host_port: Option<u16>,
}

impl PortSpec {
    pub fn fixed(host_port: u16, container_port: u16) -> Self {
        Self {
            container_port,
            host_port: Some(host_port),
        }
    }

    pub fn dynamic(container_port: u16) -> Self {
        Self {
            container_port,
            host_port: None,
        }
    }
}

/// Everything needed to create a container for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRunSpec {
    pub service: ServiceName,
    pub name: String,
    pub image: String,
    pub ports: Vec<PortSpec>,
    pub env: BTreeMap<String, String>,
    /// `host_path:container_path[:mode]` bind mounts.
    pub volumes: Vec<String>,
    /// `hostname:address` entries.
    pub extra_hosts: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub args: Vec<String>,
    /// Fail instead of falling back to dynamic ports.
    pub strict_ports: bool,
}

impl ContainerRunSpec {
    /// Spec for `service` running `image`, with the managed labels set and,
    /// on Linux, the host alias injected.
    pub fn new(service: impl Into<ServiceName>, image: impl Into<String>) -> Self {
        let service = service.into();
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(COMPONENT_LABEL.to_string(), service.to_string());

        let mut extra_hosts = Vec::new();
        if cfg!(target_os = "linux") {
            extra_hosts.push(format!("{HOST_ALIAS}:host-gateway"));
        }

        Self {
            name: container_name(&service),
            service,
            image: image.into(),
            ports: Vec::new(),
            env: BTreeMap::new(),
            volumes: Vec::new(),
            extra_hosts,
            labels,
            args: Vec::new(),
            strict_ports: false,
        }
    }

    #[must_use]
    pub fn port(mut self, port: PortSpec) -> Self {
        self.ports.push(port);
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn volume(mut self, bind: impl Into<String>) -> Self {
        self.volumes.push(bind.into());
        self
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
    pub fn strict_ports(mut self, strict: bool) -> Self {
        self.strict_ports = strict;
        self
    }
}

/// Fixed container name for a service.
pub fn container_name(service: &ServiceName) -> String {
    format!("{CONTAINER_PREFIX}{service}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_spec_is_labelled_and_named() {
        let spec = ContainerRunSpec::new("server", "stackctl/server:latest");

        assert_eq!(spec.name, "stackctl-server");
        assert_eq!(spec.labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
        assert_eq!(spec.labels.get(COMPONENT_LABEL).map(String::as_str), Some("server"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_specs_get_host_gateway_alias() {
        let spec = ContainerRunSpec::new("rag", "stackctl/rag:latest");
        assert_eq!(spec.extra_hosts, vec!["host.docker.internal:host-gateway"]);
    }
}
