//! Per-service outcomes and the aggregated run report.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::health::HealthPayload;
use super::service::{RequirementLevel, ServiceName};
use crate::error::ServiceError;

/// Observed status of one service during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Unknown,
    Starting,
    Healthy,
    Degraded,
    Unhealthy,
    Failed,
}

impl ServiceStatus {
    /// True once the outcome can no longer change.
    #[must_use]
    pub fn is_final(self) -> bool {
        !matches!(self, Self::Unknown | Self::Starting)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unknown => "unknown",
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Result of driving one service through its lifecycle.
///
/// Created as `Starting` when the service is scheduled and finalized exactly
/// once by its own worker.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceOutcome {
    pub name: ServiceName,
    pub level: RequirementLevel,
    pub status: ServiceStatus,
    pub message: String,
    #[serde(skip)]
    pub error: Option<ServiceError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthPayload>,
}

impl ServiceOutcome {
    pub fn starting(name: ServiceName, level: RequirementLevel) -> Self {
        Self {
            name,
            level,
            status: ServiceStatus::Starting,
            message: "scheduled".into(),
            error: None,
            health: None,
        }
    }

    pub fn healthy(name: ServiceName, level: RequirementLevel, message: impl Into<String>) -> Self {
        Self {
            name,
            level,
            status: ServiceStatus::Healthy,
            message: message.into(),
            error: None,
            health: None,
        }
    }

    pub fn degraded(name: ServiceName, level: RequirementLevel, message: impl Into<String>) -> Self {
        Self {
            name,
            level,
            status: ServiceStatus::Degraded,
            message: message.into(),
            error: None,
            health: None,
        }
    }

    pub fn failed(name: ServiceName, level: RequirementLevel, error: ServiceError) -> Self {
        let health = error.payload().cloned();
        Self {
            name,
            level,
            status: ServiceStatus::Failed,
            message: error.to_string(),
            error: Some(error),
            health,
        }
    }

    /// Failure that was never attempted because the run already failed.
    pub fn aborted(name: ServiceName, level: RequirementLevel, reason: impl Into<String>) -> Self {
        Self {
            name,
            level,
            status: ServiceStatus::Failed,
            message: reason.into(),
            error: None,
            health: None,
        }
    }

    /// Optional service never scheduled because the run already failed.
    pub fn skipped(name: ServiceName, level: RequirementLevel, reason: impl Into<String>) -> Self {
        Self {
            name,
            level,
            status: ServiceStatus::Unknown,
            message: reason.into(),
            error: None,
            health: None,
        }
    }

    #[must_use]
    pub fn with_health(mut self, payload: HealthPayload) -> Self {
        self.health = Some(payload);
        self
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == ServiceStatus::Failed
    }
}

/// Aggregate verdict for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Failed,
}

impl OverallStatus {
    /// Aggregate individual outcomes.
    ///
    /// Any failed Required service fails the run. Optional failures and
    /// degraded services degrade it. Optional services still starting do not
    /// affect it.
    pub fn aggregate<'a>(outcomes: impl IntoIterator<Item = &'a ServiceOutcome>) -> Self {
        let mut overall = Self::Healthy;
        for outcome in outcomes {
            match (outcome.level, outcome.status) {
                (RequirementLevel::Required, ServiceStatus::Failed | ServiceStatus::Unhealthy) => {
                    return Self::Failed;
                }
                (_, ServiceStatus::Degraded | ServiceStatus::Failed | ServiceStatus::Unhealthy) => {
                    overall = Self::Degraded;
                }
                _ => {}
            }
        }
        overall
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Everything a caller needs once `Orchestrator::run` returns.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<ServiceOutcome>,
    pub health: Option<HealthPayload>,
    pub overall: OverallStatus,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl RunReport {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.overall != OverallStatus::Failed
    }

    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&ServiceOutcome> {
        self.outcomes.iter().find(|outcome| outcome.name.as_str() == name)
    }
}

fn serialize_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
}
