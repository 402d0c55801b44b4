//! Scripted [`ServiceBackend`] for orchestration tests.
//!
//! Each service follows a [`Script`]. Time is measured with
//! `tokio::time::Instant`, so tests under a paused clock run instantly while
//! still observing the scripted delays.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use crate::application::HealthPoller;
use crate::domain::{Assessment, HealthPayload, ServiceDefinition, ServiceName};
use crate::error::ServiceError;
use crate::port::{
    BackendEvent, BackendKind, HealthCheck, ProbeContext, RuntimeState, ServiceBackend,
};

/// How a fake service behaves.
#[derive(Debug, Clone)]
pub enum Script {
    /// Healthy before anything is started.
    AlreadyHealthy,
    /// Starts fine and becomes healthy this long after the start.
    HealthyAfter(Duration),
    /// Starts fine and never becomes healthy.
    NeverReady,
    /// `start_local` fails with this reason.
    StartFails(String),
    /// Serves this payload from the first check on; it is assessed like the
    /// real health endpoint.
    Reports(HealthPayload),
}

#[derive(Debug, Default)]
struct State {
    starts: Vec<ServiceName>,
    stops: Vec<ServiceName>,
    checks: HashMap<ServiceName, usize>,
    started_at: HashMap<ServiceName, Instant>,
    stopped: HashSet<ServiceName>,
}

/// In-memory backend following per-service scripts.
pub struct FakeBackend {
    scripts: HashMap<ServiceName, Script>,
    poller: HealthPoller,
    start_delay: Duration,
    stop_failures: HashSet<ServiceName>,
    state: Mutex<State>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    events_tx: UnboundedSender<BackendEvent>,
    events_rx: Mutex<Option<UnboundedReceiver<BackendEvent>>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            scripts: HashMap::new(),
            poller: HealthPoller::default(),
            start_delay: Duration::ZERO,
            stop_failures: HashSet::new(),
            state: Mutex::new(State::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    #[must_use]
    pub fn script(mut self, service: &str, script: Script) -> Self {
        self.scripts.insert(ServiceName::from(service), script);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poller = HealthPoller::new(interval);
        self
    }

    /// Every `start_local` call takes this long.
    #[must_use]
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    #[must_use]
    pub fn with_stop_failure(mut self, service: &str) -> Self {
        self.stop_failures.insert(ServiceName::from(service));
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Services passed to `start_local`, in call order.
    pub fn starts(&self) -> Vec<ServiceName> {
        self.state.lock().starts.clone()
    }

    /// Services passed to `stop`, in call order.
    pub fn stops(&self) -> Vec<ServiceName> {
        self.state.lock().stops.clone()
    }

    pub fn was_started(&self, service: &str) -> bool {
        self.state.lock().starts.iter().any(|name| name.as_str() == service)
    }

    /// Number of health checks made against `service`.
    pub fn checks(&self, service: &str) -> usize {
        self.state.lock().checks.get(service).copied().unwrap_or_default()
    }

    /// Highest number of `start_local` calls observed running at once.
    pub fn max_concurrent_starts(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Report that `service` exited on its own.
    pub fn crash(&self, service: &str, detail: &str) {
        let _ = self.events_tx.send(BackendEvent::Crashed {
            service: ServiceName::from(service),
            detail: detail.to_string(),
        });
    }

    fn script_for(&self, service: &ServiceName) -> Script {
        self.scripts
            .get(service)
            .cloned()
            .unwrap_or(Script::NeverReady)
    }

    fn unreachable(service: &ServiceName, reason: &str) -> ServiceError {
        ServiceError::Unreachable {
            service: service.clone(),
            reason: reason.to_string(),
        }
    }
}

fn assess(
    service: &ServiceName,
    payload: &HealthPayload,
    ctx: &ProbeContext,
) -> Result<HealthCheck, ServiceError> {
    match payload.assess(&ctx.required_components) {
        Assessment::Healthy => Ok(HealthCheck::with_payload(payload.clone())),
        Assessment::DegradedUsable { reasons } => {
            Ok(HealthCheck::with_payload(payload.clone()).degraded(reasons.join("; ")))
        }
        Assessment::Unhealthy => Err(ServiceError::Unhealthy {
            service: service.clone(),
            payload: Box::new(payload.clone()),
        }),
    }
}

#[async_trait]
impl ServiceBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Process
    }

    async fn check_health(
        &self,
        def: &ServiceDefinition,
        ctx: &ProbeContext,
    ) -> Result<HealthCheck, ServiceError> {
        let name = &def.name;
        let started_at = {
            let mut state = self.state.lock();
            *state.checks.entry(name.clone()).or_default() += 1;
            if state.stopped.contains(name) {
                return Err(Self::unreachable(name, "stopped"));
            }
            state.started_at.get(name).copied()
        };

        match self.script_for(name) {
            Script::AlreadyHealthy => Ok(HealthCheck::healthy()),
            Script::Reports(payload) => assess(name, &payload, ctx),
            Script::HealthyAfter(delay) => match started_at {
                Some(at) if at.elapsed() >= delay => Ok(HealthCheck::healthy()),
                Some(_) => Err(Self::unreachable(name, "still starting")),
                None => Err(Self::unreachable(name, "connection refused")),
            },
            Script::NeverReady | Script::StartFails(_) => {
                Err(Self::unreachable(name, "connection refused"))
            }
        }
    }

    async fn start_local(&self, def: &ServiceDefinition) -> Result<(), ServiceError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state.lock();
        state.starts.push(def.name.clone());
        if let Script::StartFails(reason) = self.script_for(&def.name) {
            return Err(ServiceError::StartFailed {
                service: def.name.clone(),
                reason,
            });
        }
        state.stopped.remove(&def.name);
        state.started_at.insert(def.name.clone(), Instant::now());
        Ok(())
    }

    async fn wait_ready(
        &self,
        def: &ServiceDefinition,
        ctx: &ProbeContext,
        timeout: Duration,
    ) -> Result<HealthCheck, ServiceError> {
        self.poller
            .within(timeout, || self.check_health(def, ctx))
            .await
            .map_err(|err| err.into_service_error(&def.name, timeout))
    }

    async fn stop(&self, def: &ServiceDefinition) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        state.stops.push(def.name.clone());
        if self.stop_failures.contains(&def.name) {
            return Err(ServiceError::StopFailed {
                service: def.name.clone(),
                reason: "scripted stop failure".into(),
            });
        }
        state.stopped.insert(def.name.clone());
        state.started_at.remove(&def.name);
        Ok(())
    }

    async fn runtime_state(&self, def: &ServiceDefinition) -> RuntimeState {
        let state = self.state.lock();
        if state.stopped.contains(&def.name) {
            return RuntimeState::Stopped;
        }
        if state.started_at.contains_key(&def.name)
            || matches!(self.script_for(&def.name), Script::AlreadyHealthy)
        {
            return RuntimeState::Running {
                id: format!("fake-{}", def.name),
            };
        }
        RuntimeState::Absent
    }

    fn take_events(&self) -> Option<UnboundedReceiver<BackendEvent>> {
        self.events_rx.lock().take()
    }
}
