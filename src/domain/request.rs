//! Per-run orchestration request.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use url::Url;

use super::service::{RequirementLevel, ServiceName};

/// Hosts that count as the invoking machine.
const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1", "[::1]", "0.0.0.0"];

/// What the caller wants from one run.
#[derive(Debug, Clone)]
pub struct OrchestrationRequest {
    pub requirements: BTreeMap<ServiceName, RequirementLevel>,
    pub endpoint: Url,
    pub timeouts: HashMap<ServiceName, Duration>,
    pub verbose: bool,
}

impl OrchestrationRequest {
    pub fn new(endpoint: Url) -> Self {
        Self {
            requirements: BTreeMap::new(),
            endpoint,
            timeouts: HashMap::new(),
            verbose: false,
        }
    }

    #[must_use]
    pub fn require(mut self, name: impl Into<ServiceName>) -> Self {
        self.requirements
            .insert(name.into(), RequirementLevel::Required);
        self
    }

    #[must_use]
    pub fn optional(mut self, name: impl Into<ServiceName>) -> Self {
        self.requirements
            .insert(name.into(), RequirementLevel::Optional);
        self
    }

    #[must_use]
    pub fn with_level(mut self, name: impl Into<ServiceName>, level: RequirementLevel) -> Self {
        self.requirements.insert(name.into(), level);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, name: impl Into<ServiceName>, timeout: Duration) -> Self {
        self.timeouts.insert(name.into(), timeout);
        self
    }

    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Requirement level for a service; unlisted services are ignored.
    #[must_use]
    pub fn level(&self, name: &ServiceName) -> RequirementLevel {
        self.requirements.get(name).copied().unwrap_or_default()
    }

    /// Services managed this run, in name order.
    pub fn managed(&self) -> impl Iterator<Item = (&ServiceName, RequirementLevel)> {
        self.requirements
            .iter()
            .filter(|(_, level)| level.is_managed())
            .map(|(name, level)| (name, *level))
    }

    /// True when the endpoint points somewhere other than this host.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        match self.endpoint.host_str() {
            Some(host) => !LOCAL_HOSTS.contains(&host),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(endpoint: &str) -> OrchestrationRequest {
        OrchestrationRequest::new(Url::parse(endpoint).unwrap())
    }

    #[test]
    fn local_endpoints_are_not_remote() {
        assert!(!request("http://localhost:8080").is_remote());
        assert!(!request("http://127.0.0.1:8080").is_remote());
        assert!(!request("http://[::1]:8080").is_remote());
    }

    #[test]
    fn other_hosts_are_remote() {
        assert!(request("https://api.example.com").is_remote());
    }

    #[test]
    fn unlisted_services_are_ignored() {
        let req = request("http://localhost:8080")
            .require("server")
            .optional("rag")
            .with_level("runtime", RequirementLevel::Ignored);

        assert_eq!(req.level(&ServiceName::from("server")), RequirementLevel::Required);
        assert_eq!(req.level(&ServiceName::from("other")), RequirementLevel::Ignored);
        let managed: Vec<&str> = req.managed().map(|(name, _)| name.as_str()).collect();
        assert_eq!(managed, vec!["rag", "server"]);
    }
}
