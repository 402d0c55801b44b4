//! Service identity, requirement levels, and static service definitions.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name of the API server service.
pub const SERVER: &str = "server";
/// Name of the retrieval-augmented-generation worker.
pub const RAG: &str = "rag";
/// Name of the local inference runtime.
pub const RUNTIME: &str = "runtime";

/// Opaque service identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ServiceName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for ServiceName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Per-run policy controlling whether a service is started, awaited, and
/// allowed to fail the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementLevel {
    /// Not managed this run.
    #[default]
    Ignored,
    /// Started if needed; never blocks or fails the run.
    Optional,
    /// Blocks its stage and fails the run if it cannot become ready.
    Required,
}

impl RequirementLevel {
    #[must_use]
    pub fn is_managed(self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

impl fmt::Display for RequirementLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignored => write!(f, "ignored"),
            Self::Optional => write!(f, "optional"),
            Self::Required => write!(f, "required"),
        }
    }
}

impl FromStr for RequirementLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ignored" | "ignore" | "off" => Ok(Self::Ignored),
            "optional" => Ok(Self::Optional),
            "required" => Ok(Self::Required),
            other => Err(format!("unknown requirement level '{other}'")),
        }
    }
}

/// How readiness of a service is observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessProbe {
    /// HTTP GET against the service's health path. When `structured` is set
    /// the response body is the full health payload.
    Http { path: String, structured: bool },
    /// The service's process or container is alive.
    Liveness,
    /// A line matching the pattern appeared in the service's output.
    LogPattern(String),
}

/// Static description of a known service.
///
/// Immutable once the catalog is built and shared read-only across workers.
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    pub name: ServiceName,
    pub dependencies: Vec<ServiceName>,
    /// Whether this tool knows how to start the service on this host.
    pub local_start: bool,
    pub default_timeout: Duration,
    pub probe: ReadinessProbe,
    /// Local port the service listens on, when it has one.
    pub port: Option<u16>,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<ServiceName>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            local_start: true,
            default_timeout: Duration::from_secs(60),
            probe: ReadinessProbe::Liveness,
            port: None,
        }
    }

    #[must_use]
    pub fn depends_on(mut self, dependency: impl Into<ServiceName>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_probe(mut self, probe: ReadinessProbe) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn external(mut self) -> Self {
        self.local_start = false;
        self
    }

    /// True when this service's health endpoint returns the full payload.
    #[must_use]
    pub fn reports_payload(&self) -> bool {
        matches!(
            self.probe,
            ReadinessProbe::Http {
                structured: true,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirement_level_parses_case_insensitively() {
        assert_eq!(
            "Required".parse::<RequirementLevel>(),
            Ok(RequirementLevel::Required)
        );
        assert_eq!(
            "optional".parse::<RequirementLevel>(),
            Ok(RequirementLevel::Optional)
        );
        assert_eq!(
            "off".parse::<RequirementLevel>(),
            Ok(RequirementLevel::Ignored)
        );
        assert!("sometimes".parse::<RequirementLevel>().is_err());
    }

    #[test]
    fn only_ignored_is_unmanaged() {
        assert!(!RequirementLevel::Ignored.is_managed());
        assert!(RequirementLevel::Optional.is_managed());
        assert!(RequirementLevel::Required.is_managed());
    }

    #[test]
    fn definition_builder_collects_dependencies() {
        let def = ServiceDefinition::new(RAG)
            .depends_on(SERVER)
            .with_timeout(Duration::from_secs(5))
            .external();

        assert_eq!(def.dependencies, vec![ServiceName::from(SERVER)]);
        assert_eq!(def.default_timeout, Duration::from_secs(5));
        assert!(!def.local_start);
        assert!(!def.reports_payload());
    }
}
