//! The set of known services and their static definitions.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::service::{RAG, RUNTIME, SERVER};
use crate::domain::{ReadinessProbe, ServiceDefinition, ServiceName};
use crate::error::ServiceError;

/// Default port of the API server.
pub const SERVER_PORT: u16 = 8080;
/// Default port of the inference runtime.
pub const RUNTIME_PORT: u16 = 11434;

/// Immutable registry of service definitions, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    services: BTreeMap<ServiceName, ServiceDefinition>,
}

impl Catalog {
    pub fn new(definitions: impl IntoIterator<Item = ServiceDefinition>) -> Self {
        Self {
            services: definitions
                .into_iter()
                .map(|def| (def.name.clone(), def))
                .collect(),
        }
    }

    /// The three services of the stack with their default wiring.
    pub fn standard() -> Self {
        Self::new([
            ServiceDefinition::new(RUNTIME)
                .with_port(RUNTIME_PORT)
                .with_timeout(Duration::from_secs(120))
                .with_probe(ReadinessProbe::Http {
                    path: "/api/version".into(),
                    structured: false,
                }),
            ServiceDefinition::new(SERVER)
                .with_port(SERVER_PORT)
                .with_timeout(Duration::from_secs(60))
                .with_probe(ReadinessProbe::Http {
                    path: "/health".into(),
                    structured: true,
                }),
            ServiceDefinition::new(RAG)
                .depends_on(SERVER)
                .with_timeout(Duration::from_secs(90))
                .with_probe(ReadinessProbe::LogPattern("worker ready".into())),
        ])
    }

    pub fn get(&self, name: &ServiceName) -> Result<&ServiceDefinition, ServiceError> {
        self.services
            .get(name)
            .ok_or_else(|| ServiceError::UnknownService(name.clone()))
    }

    /// Replace or add a definition.
    pub fn insert(&mut self, def: ServiceDefinition) {
        self.services.insert(def.name.clone(), def);
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ServiceDefinition> {
        self.services.get_mut(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &ServiceName> {
        self.services.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.values()
    }

    /// The service whose health endpoint reports the full payload.
    pub fn payload_reporter(&self) -> Option<&ServiceDefinition> {
        self.iter().find(|def| def.reports_payload())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_wires_rag_after_server() {
        let catalog = Catalog::standard();
        let rag = catalog.get(&ServiceName::from(RAG)).unwrap();

        assert_eq!(rag.dependencies, vec![ServiceName::from(SERVER)]);
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn server_reports_payload() {
        let catalog = Catalog::standard();
        assert_eq!(catalog.payload_reporter().unwrap().name.as_str(), SERVER);
    }

    #[test]
    fn unknown_service_is_an_error() {
        let catalog = Catalog::standard();
        let err = catalog.get(&ServiceName::from("frontend")).unwrap_err();
        assert!(matches!(err, ServiceError::UnknownService(name) if name.as_str() == "frontend"));
    }
}
