//! Per-service lifecycle: check, start if needed, wait until ready.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::poller::HealthPoller;
use crate::domain::{RequirementLevel, ServiceDefinition, ServiceName, ServiceOutcome};
use crate::error::ServiceError;
use crate::port::{HealthCheck, ProbeContext, ServiceBackend};

/// Services started by this run, in start order.
pub type StartLedger = Arc<Mutex<Vec<ServiceName>>>;

/// Everything a worker needs to drive one service.
#[derive(Clone)]
pub struct Lifecycle {
    backend: Arc<dyn ServiceBackend>,
    probe: Arc<ProbeContext>,
    poller: HealthPoller,
    start_permits: Arc<Semaphore>,
    started: StartLedger,
}

impl Lifecycle {
    pub fn new(
        backend: Arc<dyn ServiceBackend>,
        probe: Arc<ProbeContext>,
        poller: HealthPoller,
        start_permits: Arc<Semaphore>,
        started: StartLedger,
    ) -> Self {
        Self {
            backend,
            probe,
            poller,
            start_permits,
            started,
        }
    }

    /// Drive `def` to a final outcome.
    ///
    /// Already-healthy services are never started. Failures finalize as
    /// `Failed` for Required services and `Degraded` for Optional ones.
    pub async fn drive(
        &self,
        def: &ServiceDefinition,
        level: RequirementLevel,
        timeout: Duration,
    ) -> ServiceOutcome {
        let name = &def.name;

        match self.backend.check_health(def, &self.probe).await {
            Ok(check) => {
                info!(service = %name, "already running");
                return resolved(def, level, check, "already running");
            }
            Err(err) => debug!(service = %name, error = %err, "initial health check failed"),
        }

        if self.probe.remote || !def.local_start {
            info!(service = %name, timeout_secs = timeout.as_secs(), "waiting for externally managed service");
            let polled = self
                .poller
                .within(timeout, || self.backend.check_health(def, &self.probe))
                .await;
            return match polled {
                Ok(check) => resolved(def, level, check, "reachable"),
                Err(err) => unresolved(def, level, err.into_service_error(name, timeout)),
            };
        }

        match self.start(def).await {
            Ok(()) => self.started.lock().push(name.clone()),
            Err(err) if level == RequirementLevel::Required => {
                return ServiceOutcome::failed(name.clone(), level, err);
            }
            Err(err) => {
                warn!(service = %name, error = %err, "optional service failed to start; still waiting for it");
            }
        }

        match self.backend.wait_ready(def, &self.probe, timeout).await {
            Ok(check) => {
                info!(service = %name, "ready");
                resolved(def, level, check, "started")
            }
            Err(err) => unresolved(def, level, err),
        }
    }

    async fn start(&self, def: &ServiceDefinition) -> Result<(), ServiceError> {
        // Only the start itself is bounded; readiness waits run freely.
        let _permit = self
            .start_permits
            .acquire()
            .await
            .map_err(|_| ServiceError::StartFailed {
                service: def.name.clone(),
                reason: "run is shutting down".into(),
            })?;
        info!(service = %def.name, backend = %self.backend.kind(), "starting");
        self.backend.start_local(def).await
    }
}

fn resolved(
    def: &ServiceDefinition,
    level: RequirementLevel,
    check: HealthCheck,
    message: &str,
) -> ServiceOutcome {
    let outcome = match &check.degraded_reason {
        Some(reason) => {
            warn!(service = %def.name, reason = %reason, "usable but degraded");
            ServiceOutcome::degraded(def.name.clone(), level, reason.clone())
        }
        None => ServiceOutcome::healthy(def.name.clone(), level, message),
    };
    match check.payload {
        Some(payload) => outcome.with_health(payload),
        None => outcome,
    }
}

fn unresolved(def: &ServiceDefinition, level: RequirementLevel, err: ServiceError) -> ServiceOutcome {
    if level == RequirementLevel::Required {
        return ServiceOutcome::failed(def.name.clone(), level, err);
    }
    warn!(service = %def.name, error = %err, "optional service not ready");
    let mut outcome = ServiceOutcome::degraded(def.name.clone(), level, err.to_string());
    outcome.health = err.payload().cloned();
    outcome.error = Some(err);
    outcome
}
