//! Orchestration core: health polling, stage planning, per-service lifecycle
//! and the orchestrator that ties them together.

pub mod catalog;
pub mod event;
pub mod graph;
pub mod lifecycle;
pub mod orchestrator;
pub mod poller;
mod scheduler;

pub use catalog::Catalog;
pub use event::OrchestratorEvent;
pub use graph::{DependencyGraph, Stage};
pub use orchestrator::{Orchestrator, OrchestratorSettings, ServiceSnapshot};
pub use poller::{HealthPoller, PollError, Retryable};
