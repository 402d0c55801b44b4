//! Health payload reported by the managed server's health endpoint.
//!
//! The payload is a wire contract: overall status, a free-text summary, and
//! two lists of sub-components (infrastructure components and background
//! seed tasks). [`HealthPayload::assess`] decides whether a non-healthy
//! payload still leaves the server usable for this run.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Status reported for the server or one of its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    /// Any status string this client does not recognise.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One named sub-component of the health payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthComponent {
    pub name: String,
    pub status: HealthState,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl HealthComponent {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// Structured self-report returned by the server's health endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthPayload {
    pub status: HealthState,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub components: Vec<HealthComponent>,
    #[serde(default)]
    pub seeds: Vec<HealthComponent>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Verdict on a health payload for the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    Healthy,
    /// Not healthy, but only because of components this run does not need.
    DegradedUsable { reasons: Vec<String> },
    Unhealthy,
}

impl HealthPayload {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }

    /// Components and seeds that are not reporting healthy.
    pub fn failing(&self) -> impl Iterator<Item = &HealthComponent> {
        self.components
            .iter()
            .chain(self.seeds.iter())
            .filter(|component| !component.is_healthy())
    }

    /// Decide whether the payload is usable given the set of component names
    /// this run cannot do without.
    ///
    /// Any number of failing components is tolerated as long as none of them
    /// is in `required`; a runtime and a vector store both down still leave
    /// the server usable for a run that requires neither. Seeds are
    /// background tasks and never make a payload unusable. A non-healthy
    /// aggregate with no failing component is unusable.
    #[must_use]
    pub fn assess(&self, required: &HashSet<String>) -> Assessment {
        if self.is_healthy() {
            return Assessment::Healthy;
        }

        let failing: Vec<&HealthComponent> = self.failing().collect();
        if failing.is_empty() {
            return Assessment::Unhealthy;
        }

        let blocking = self
            .components
            .iter()
            .filter(|component| !component.is_healthy())
            .any(|component| required.contains(&component.name));
        if blocking {
            return Assessment::Unhealthy;
        }

        let reasons = failing
            .iter()
            .map(|component| {
                if component.message.is_empty() {
                    format!("{} is {}", component.name, component.status)
                } else {
                    format!(
                        "{} is {}: {}",
                        component.name, component.status, component.message
                    )
                }
            })
            .collect();
        Assessment::DegradedUsable { reasons }
    }
}
