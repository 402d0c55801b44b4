//! Stage execution with two-speed completion.
//!
//! Required members of a stage are joined before the next stage begins.
//! Optional members are handed to a retained background set and report
//! through the event channel.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::catalog::Catalog;
use super::event::OrchestratorEvent;
use super::graph::Stage;
use super::lifecycle::Lifecycle;
use crate::domain::{OrchestrationRequest, RequirementLevel, ServiceName, ServiceOutcome};

/// Shared state a stage run writes into.
pub(crate) struct StageRunner<'a> {
    pub lifecycle: Lifecycle,
    pub catalog: Arc<Catalog>,
    pub request: &'a OrchestrationRequest,
    pub outcomes: Arc<DashMap<ServiceName, ServiceOutcome>>,
    pub background: &'a Mutex<JoinSet<()>>,
    pub events: UnboundedSender<OrchestratorEvent>,
}

impl StageRunner<'_> {
    /// Run every stage in order. Returns `false` if a Required service failed.
    pub async fn run(&self, stages: &[Stage]) -> bool {
        for (position, stage) in stages.iter().enumerate() {
            if !self.run_stage(stage).await {
                self.skip_remaining(&stages[position + 1..]);
                return false;
            }
        }
        true
    }

    async fn run_stage(&self, stage: &Stage) -> bool {
        info!(stage = stage.index, services = ?stage.services, "starting stage");
        let _ = self.events.send(OrchestratorEvent::StageStarted {
            index: stage.index,
            services: stage.services.clone(),
        });

        let mut required = JoinSet::new();
        let mut pending = BTreeSet::new();

        for name in &stage.services {
            let level = self.request.level(name);
            let Ok(def) = self.catalog.get(name) else {
                continue;
            };
            let def = def.clone();
            let timeout = self
                .request
                .timeouts
                .get(name)
                .copied()
                .unwrap_or(def.default_timeout);
            self.outcomes
                .insert(name.clone(), ServiceOutcome::starting(name.clone(), level));

            let lifecycle = self.lifecycle.clone();
            match level {
                RequirementLevel::Required => {
                    pending.insert(name.clone());
                    required.spawn(async move { lifecycle.drive(&def, level, timeout).await });
                }
                RequirementLevel::Optional => {
                    let outcomes = Arc::clone(&self.outcomes);
                    let events = self.events.clone();
                    self.background.lock().spawn(async move {
                        let outcome = lifecycle.drive(&def, level, timeout).await;
                        info!(service = %outcome.name, status = %outcome.status, "optional service resolved");
                        outcomes.insert(outcome.name.clone(), outcome.clone());
                        let _ = events.send(OrchestratorEvent::ServiceResolved(outcome));
                    });
                }
                RequirementLevel::Ignored => {}
            }
        }

        let mut healthy = true;
        while let Some(joined) = required.join_next().await {
            match joined {
                Ok(outcome) => {
                    pending.remove(&outcome.name);
                    if outcome.is_failed() {
                        error!(service = %outcome.name, message = %outcome.message, "required service failed");
                        if healthy {
                            required.abort_all();
                        }
                        healthy = false;
                    }
                    self.outcomes.insert(outcome.name.clone(), outcome);
                }
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    error!(error = %err, "service worker panicked");
                    if healthy {
                        required.abort_all();
                    }
                    healthy = false;
                }
            }
        }

        // Cancelled or panicked workers never reported.
        for name in pending {
            self.outcomes.insert(
                name.clone(),
                ServiceOutcome::aborted(
                    name,
                    RequirementLevel::Required,
                    "aborted: another required service failed",
                ),
            );
        }
        healthy
    }

    fn skip_remaining(&self, stages: &[Stage]) {
        for name in stages.iter().flat_map(|stage| &stage.services) {
            let outcome = match self.request.level(name) {
                RequirementLevel::Required => ServiceOutcome::aborted(
                    name.clone(),
                    RequirementLevel::Required,
                    "skipped: an earlier required service failed",
                ),
                level => ServiceOutcome::skipped(
                    name.clone(),
                    level,
                    "skipped: an earlier required service failed",
                ),
            };
            warn!(service = %name, "not started");
            self.outcomes.insert(name.clone(), outcome);
        }
    }
}
