//! Native process backend.

pub mod backend;
pub mod lock;
pub mod logfile;
pub mod pidfile;
pub mod signal;
pub mod supervisor;

use std::path::{Path, PathBuf};

use crate::domain::ServiceName;

pub use backend::ProcessBackend;
pub use supervisor::{ExitDetail, ProcessSpec, ProcessState, ProcessStatus, ProcessSupervisor};

/// Layout of the per-user state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pid_path(&self, service: &ServiceName) -> PathBuf {
        self.root.join(format!("{service}.pid"))
    }

    pub fn lock_path(&self, service: &ServiceName) -> PathBuf {
        self.root.join(format!("{service}.lock"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn log_path(&self, service: &ServiceName) -> PathBuf {
        self.log_dir().join(format!("{service}.log"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_files_live_under_root() {
        let state = StateDir::new("/tmp/stackctl");
        let server = ServiceName::from("server");

        assert_eq!(state.pid_path(&server), PathBuf::from("/tmp/stackctl/server.pid"));
        assert_eq!(state.lock_path(&server), PathBuf::from("/tmp/stackctl/server.lock"));
        assert_eq!(
            state.log_path(&server),
            PathBuf::from("/tmp/stackctl/logs/server.log")
        );
    }
}
