//! Builders for domain values used across tests.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::application::{Catalog, Orchestrator, OrchestratorSettings};
use crate::domain::{
    HealthComponent, HealthPayload, HealthState, OrchestrationRequest, ReadinessProbe,
    ServiceDefinition,
};
use crate::port::ServiceBackend;

/// Local endpoint used by tests that do not care about the address.
pub const LOCAL_ENDPOINT: &str = "http://127.0.0.1:8080";

/// Request against [`LOCAL_ENDPOINT`].
pub fn local_request() -> OrchestrationRequest {
    request(LOCAL_ENDPOINT)
}

pub fn request(endpoint: &str) -> OrchestrationRequest {
    match Url::parse(endpoint) {
        Ok(url) => OrchestrationRequest::new(url),
        Err(err) => panic!("invalid test endpoint {endpoint}: {err}"),
    }
}

/// Plain service with a liveness probe and the given dependencies.
pub fn service(name: &str, deps: &[&str]) -> ServiceDefinition {
    deps.iter()
        .fold(ServiceDefinition::new(name), |def, dep| def.depends_on(*dep))
}

/// The standard server and rag wiring with short timeouts.
pub fn stack_catalog(server_timeout: Duration, rag_timeout: Duration) -> Catalog {
    Catalog::new([
        ServiceDefinition::new("server")
            .with_port(8080)
            .with_timeout(server_timeout)
            .with_probe(ReadinessProbe::Http {
                path: "/health".into(),
                structured: true,
            }),
        service("rag", &["server"]).with_timeout(rag_timeout),
        ServiceDefinition::new("runtime").with_port(11434),
    ])
}

/// Settings polling every `interval`, with `database` as the only required
/// component.
pub fn settings(interval: Duration) -> OrchestratorSettings {
    OrchestratorSettings {
        poll_interval: interval,
        ..OrchestratorSettings::default()
    }
}

pub fn orchestrator(catalog: Catalog, backend: Arc<dyn ServiceBackend>) -> Orchestrator {
    Orchestrator::new(
        Arc::new(catalog),
        backend,
        settings(Duration::from_millis(100)),
    )
}

pub fn component(name: &str, status: HealthState, message: &str) -> HealthComponent {
    HealthComponent {
        name: name.to_string(),
        status,
        message: message.to_string(),
        latency_ms: Some(1.0),
        details: None,
    }
}

/// Payload with the given aggregate status and components.
pub fn payload(status: HealthState, components: Vec<HealthComponent>) -> HealthPayload {
    let failing = components.iter().filter(|c| !c.is_healthy()).count();
    HealthPayload {
        status,
        summary: format!("{failing} of {} components not healthy", components.len()),
        components,
        seeds: Vec::new(),
        timestamp: None,
    }
}

/// Server whose database is fine but whose inference runtime is down.
pub fn runtime_down_payload() -> HealthPayload {
    payload(
        HealthState::Unhealthy,
        vec![
            component("database", HealthState::Healthy, "ok"),
            component("runtime", HealthState::Unhealthy, "connection refused"),
        ],
    )
}

/// Server whose database is down.
pub fn database_down_payload() -> HealthPayload {
    payload(
        HealthState::Unhealthy,
        vec![component("database", HealthState::Unhealthy, "connection refused")],
    )
}
