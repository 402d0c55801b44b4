//! Backend-agnostic types: service identities, requirement levels, health
//! payloads, outcomes and run requests.

pub mod container;
pub mod health;
pub mod outcome;
pub mod request;
pub mod service;

pub use container::{ContainerRunSpec, PortSpec};
pub use health::{Assessment, HealthComponent, HealthPayload, HealthState};
pub use outcome::{OverallStatus, RunReport, ServiceOutcome, ServiceStatus};
pub use request::OrchestrationRequest;
pub use service::{ReadinessProbe, RequirementLevel, ServiceDefinition, ServiceName};
