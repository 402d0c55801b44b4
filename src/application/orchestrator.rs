//! Orchestrator: the explicit context object for one CLI invocation.
//!
//! Holds the catalog, the selected backend, the outcome map for the current
//! run, the retained background tasks for Optional services and the event
//! channel they report on. Nothing here is process-global, so independent
//! orchestrators can run side by side in tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use super::catalog::Catalog;
use super::event::OrchestratorEvent;
use super::graph::{self, DependencyGraph, Stage};
use super::lifecycle::{Lifecycle, StartLedger};
use super::poller::{HealthPoller, DEFAULT_POLL_INTERVAL};
use super::scheduler::StageRunner;
use crate::domain::{
    HealthPayload, OrchestrationRequest, OverallStatus, RequirementLevel, RunReport,
    ServiceName, ServiceOutcome, ServiceStatus,
};
use crate::error::{Error, Result, ServiceError, StopErrors};
use crate::port::{BackendEvent, BackendKind, ProbeContext, RuntimeState, ServiceBackend};

/// Tunables for a run.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Maximum number of services starting at the same time.
    pub max_concurrency: usize,
    pub poll_interval: Duration,
    /// Health components the server cannot be usable without.
    pub required_components: Vec<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            poll_interval: DEFAULT_POLL_INTERVAL,
            required_components: vec!["database".to_string()],
        }
    }
}

/// Point-in-time view of one service for `status`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub name: ServiceName,
    pub runtime: RuntimeState,
    pub status: ServiceStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthPayload>,
}

/// Drives the stage scheduler and owns everything a run leaves behind.
pub struct Orchestrator {
    catalog: Arc<Catalog>,
    backend: Arc<dyn ServiceBackend>,
    settings: OrchestratorSettings,
    outcomes: Arc<DashMap<ServiceName, ServiceOutcome>>,
    background: Mutex<JoinSet<()>>,
    started: StartLedger,
    events_tx: UnboundedSender<OrchestratorEvent>,
    events_rx: Mutex<Option<UnboundedReceiver<OrchestratorEvent>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<Catalog>,
        backend: Arc<dyn ServiceBackend>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            catalog,
            backend,
            settings,
            outcomes: Arc::new(DashMap::new()),
            background: Mutex::new(JoinSet::new()),
            started: Arc::new(Mutex::new(Vec::new())),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            forwarder: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Take the event stream. Only the first caller receives it.
    pub fn take_events(&self) -> Option<UnboundedReceiver<OrchestratorEvent>> {
        self.events_rx.lock().take()
    }

    /// Probe inputs for a request: server components backing Required
    /// services are required too.
    pub fn probe_context(&self, request: &OrchestrationRequest) -> ProbeContext {
        let mut ctx = ProbeContext::new(request.endpoint.clone()).remote(request.is_remote());
        ctx.required_components = self
            .settings
            .required_components
            .iter()
            .cloned()
            .chain(
                request
                    .managed()
                    .filter(|(_, level)| *level == RequirementLevel::Required)
                    .map(|(name, _)| name.to_string()),
            )
            .collect::<HashSet<_>>();
        ctx
    }

    /// Plan stages without starting anything.
    pub fn plan(&self, request: &OrchestrationRequest) -> Result<Vec<Stage>> {
        DependencyGraph::plan(&self.catalog, request)
    }

    /// Bring up the requested services.
    ///
    /// Unknown services and unschedulable graphs fail before anything is
    /// started. Returns once every Required service has resolved; Optional
    /// services may still be starting in the background. Optional workers
    /// left over from a previous run are cancelled first.
    pub async fn run(&self, request: &OrchestrationRequest) -> Result<RunReport> {
        let started_at = Instant::now();
        let stages = self.plan(request)?;
        self.forward_backend_events();
        self.cancel_background().await;
        self.outcomes.clear();

        let probe = Arc::new(self.probe_context(request));
        let lifecycle = Lifecycle::new(
            Arc::clone(&self.backend),
            Arc::clone(&probe),
            HealthPoller::new(self.settings.poll_interval),
            Arc::new(Semaphore::new(self.settings.max_concurrency.max(1))),
            Arc::clone(&self.started),
        );

        if request.verbose {
            for stage in &stages {
                info!(stage = stage.index, services = ?stage.services, "planned stage");
            }
        }
        info!(
            stages = stages.len(),
            backend = %self.backend.kind(),
            endpoint = %request.endpoint,
            "orchestration started"
        );
        let runner = StageRunner {
            lifecycle,
            catalog: Arc::clone(&self.catalog),
            request,
            outcomes: Arc::clone(&self.outcomes),
            background: &self.background,
            events: self.events_tx.clone(),
        };
        let completed = runner.run(&stages).await;

        let outcomes = self.collect(request);
        let overall = OverallStatus::aggregate(&outcomes);
        let health = if completed {
            self.final_health(&probe).await
        } else {
            outcomes.iter().find_map(|outcome| outcome.health.clone())
        };

        let report = RunReport {
            outcomes,
            health,
            overall,
            elapsed: started_at.elapsed(),
        };
        info!(overall = %report.overall, elapsed_ms = report.elapsed.as_millis() as u64, "orchestration finished");
        Ok(report)
    }

    fn collect(&self, request: &OrchestrationRequest) -> Vec<ServiceOutcome> {
        request
            .managed()
            .filter_map(|(name, _)| self.outcomes.get(name).map(|entry| entry.value().clone()))
            .collect()
    }

    async fn final_health(&self, probe: &ProbeContext) -> Option<HealthPayload> {
        let reporter = self.catalog.payload_reporter()?;
        match self.backend.check_health(reporter, probe).await {
            Ok(check) => check.payload,
            Err(err) => {
                debug!(error = %err, "final health fetch failed");
                err.payload().cloned()
            }
        }
    }

    fn forward_backend_events(&self) {
        let mut forwarder = self.forwarder.lock();
        if forwarder.is_some() {
            return;
        }
        let Some(mut backend_events) = self.backend.take_events() else {
            return;
        };
        let events = self.events_tx.clone();
        *forwarder = Some(tokio::spawn(async move {
            while let Some(event) = backend_events.recv().await {
                match event {
                    BackendEvent::Crashed { service, detail } => {
                        warn!(service = %service, detail = %detail, "service crashed");
                        let _ = events.send(OrchestratorEvent::ServiceCrashed { service, detail });
                    }
                }
            }
        }));
    }

    /// Latest known outcome of one service.
    pub fn outcome(&self, name: &str) -> Option<ServiceOutcome> {
        self.outcomes.get(name).map(|entry| entry.value().clone())
    }

    pub fn outcomes(&self) -> Vec<ServiceOutcome> {
        let mut outcomes: Vec<ServiceOutcome> =
            self.outcomes.iter().map(|entry| entry.value().clone()).collect();
        outcomes.sort_by(|a, b| a.name.cmp(&b.name));
        outcomes
    }

    /// Number of Optional workers still running.
    #[must_use]
    pub fn pending_background(&self) -> usize {
        self.background.lock().len()
    }

    async fn cancel_background(&self) {
        let mut stale = std::mem::take(&mut *self.background.lock());
        if !stale.is_empty() {
            debug!(workers = stale.len(), "cancelling optional workers of the previous run");
            stale.shutdown().await;
        }
    }

    /// Wait for every Optional worker to resolve.
    pub async fn wait_background(&self) {
        let mut tasks = std::mem::take(&mut *self.background.lock());
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                if !err.is_cancelled() {
                    warn!(error = %err, "background worker panicked");
                }
            }
        }
    }

    /// Cancel Optional workers and stop forwarding backend events.
    pub fn shutdown(&self) {
        self.background.lock().abort_all();
        if let Some(forwarder) = self.forwarder.lock().take() {
            forwarder.abort();
        }
    }

    /// Services this orchestrator started, in start order.
    pub fn started_services(&self) -> Vec<ServiceName> {
        self.started.lock().clone()
    }

    /// Stop services, dependents first. Every service is attempted; all stop
    /// failures are reported together.
    pub async fn teardown(&self, services: &[ServiceName]) -> Result<()> {
        let mut errors = StopErrors::default();
        for name in graph::stop_order(&self.catalog, services) {
            let def = match self.catalog.get(&name) {
                Ok(def) => def,
                Err(err) => {
                    errors.0.push(err);
                    continue;
                }
            };
            info!(service = %name, "stopping");
            if let Err(err) = self.backend.stop(def).await {
                warn!(service = %name, error = %err, "stop failed");
                errors.0.push(err);
            }
        }
        self.started.lock().retain(|name| !services.contains(name));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Teardown(errors))
        }
    }

    /// Stop everything this orchestrator started.
    pub async fn teardown_started(&self) -> Result<()> {
        let started = self.started_services();
        self.teardown(&started).await
    }

    /// Runtime state and health of every catalog service.
    pub async fn snapshot(&self, endpoint: Url) -> Vec<ServiceSnapshot> {
        let mut probe = ProbeContext::new(endpoint);
        probe.required_components = self.settings.required_components.iter().cloned().collect();
        let mut snapshots = Vec::with_capacity(self.catalog.len());
        for def in self.catalog.iter() {
            let runtime = self.backend.runtime_state(def).await;
            let (status, message, health) = match self.backend.check_health(def, &probe).await {
                Ok(check) => match check.degraded_reason {
                    Some(reason) => (ServiceStatus::Degraded, reason, check.payload),
                    None => (ServiceStatus::Healthy, "healthy".to_string(), check.payload),
                },
                Err(err @ ServiceError::Unhealthy { .. }) => {
                    (ServiceStatus::Unhealthy, err.to_string(), err.payload().cloned())
                }
                Err(err) => {
                    let status = match runtime {
                        RuntimeState::Failed { .. } => ServiceStatus::Failed,
                        _ => ServiceStatus::Unknown,
                    };
                    (status, err.to_string(), None)
                }
            };
            snapshots.push(ServiceSnapshot {
                name: def.name.clone(),
                runtime,
                status,
                message,
                health,
            });
        }
        snapshots
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
