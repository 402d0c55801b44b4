//! Container backend.

pub mod backend;
pub mod docker;
pub mod ports;
pub mod progress;
pub mod supervisor;

pub use backend::ContainerBackend;
pub use docker::DockerCli;
pub use progress::{format_bytes, ProgressSnapshot, PullProgress, PullReporter, SilentReporter};
pub use supervisor::{ContainerSupervisor, RunningContainer, DEFAULT_NETWORK};
