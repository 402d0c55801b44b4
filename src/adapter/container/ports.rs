//! Host port planning and binding resolution.

use std::net::TcpListener;

use tracing::warn;

use crate::domain::ContainerRunSpec;
use crate::error::EngineError;
use crate::port::{ContainerInfo, PortBinding, Publish};

/// Whether nothing on this host is listening on `port`.
pub fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

/// Decide how each port of `spec` is published.
///
/// A preferred host port is used when free. Otherwise the engine picks one,
/// unless the spec asks for strict ports.
pub fn plan(
    spec: &ContainerRunSpec,
    is_free: impl Fn(u16) -> bool,
) -> Result<Vec<Publish>, EngineError> {
    spec.ports
        .iter()
        .map(|port| match port.host_port {
            Some(host_port) if is_free(host_port) => Ok(Publish::Fixed {
                host_port,
                container_port: port.container_port,
            }),
            Some(host_port) if spec.strict_ports => {
                Err(EngineError::PortUnavailable { port: host_port })
            }
            Some(host_port) => {
                warn!(
                    container = %spec.name,
                    host_port,
                    container_port = port.container_port,
                    "preferred host port in use; falling back to a dynamic port"
                );
                Ok(Publish::Dynamic {
                    container_port: port.container_port,
                })
            }
            None => Ok(Publish::Dynamic {
                container_port: port.container_port,
            }),
        })
        .collect()
}

/// Actual host bindings for every port `spec` publishes.
pub fn resolve(spec: &ContainerRunSpec, info: &ContainerInfo) -> Result<Vec<PortBinding>, EngineError> {
    spec.ports
        .iter()
        .map(|port| {
            info.ports
                .iter()
                .find(|binding| binding.container_port == port.container_port)
                .cloned()
                .ok_or_else(|| EngineError::MissingBinding {
                    name: spec.name.clone(),
                    container_port: port.container_port,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PortSpec;

    fn spec() -> ContainerRunSpec {
        ContainerRunSpec::new("server", "stackctl/server:latest")
            .port(PortSpec::fixed(8080, 8080))
            .port(PortSpec::dynamic(9090))
    }

    #[test]
    fn free_preferred_port_is_fixed() {
        let publish = plan(&spec(), |_| true).unwrap();
        assert_eq!(
            publish,
            vec![
                Publish::Fixed {
                    host_port: 8080,
                    container_port: 8080
                },
                Publish::Dynamic {
                    container_port: 9090
                },
            ]
        );
    }

    #[test]
    fn busy_preferred_port_falls_back_to_dynamic() {
        let publish = plan(&spec(), |_| false).unwrap();
        assert_eq!(
            publish[0],
            Publish::Dynamic {
                container_port: 8080
            }
        );
    }

    #[test]
    fn busy_port_is_an_error_when_strict() {
        let err = plan(&spec().strict_ports(true), |_| false).unwrap_err();
        assert!(matches!(err, EngineError::PortUnavailable { port: 8080 }));
    }

    #[test]
    fn bound_listener_port_is_not_free() {
        let listener = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!port_is_free(port));
    }
}
