//! Events emitted while and after an orchestration run.

use crate::domain::{ServiceName, ServiceOutcome};

/// Progress reported on the orchestrator's event channel.
///
/// Optional services resolve after `run` has returned, so their outcomes only
/// ever arrive here.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    StageStarted {
        index: usize,
        services: Vec<ServiceName>,
    },
    /// A background (Optional) service reached its final outcome.
    ServiceResolved(ServiceOutcome),
    /// A running service exited without being asked to.
    ServiceCrashed { service: ServiceName, detail: String },
}
