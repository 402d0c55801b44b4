//! Trait seams between the orchestration core and its backends.

pub mod backend;
pub mod engine;

pub use backend::{
    BackendEvent, BackendKind, HealthCheck, ProbeContext, RuntimeState, ServiceBackend,
};
pub use engine::{ContainerEngine, ContainerInfo, PortBinding, Publish, PullEvent};
