//! `<state>/<service>.pid` files.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::SupervisorError;

/// A PID file for one service.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `pid` followed by a newline, atomically.
    pub fn write(&self, pid: u32) -> Result<(), SupervisorError> {
        let err = |source| SupervisorError::PidFile {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(err)?;
        }

        let temp_path = self.path.with_extension("pid.tmp");
        let cleanup_and_err = |source| {
            let _ = fs::remove_file(&temp_path);
            err(source)
        };
        let mut file = fs::File::create(&temp_path).map_err(err)?;
        writeln!(file, "{pid}").map_err(cleanup_and_err)?;
        file.sync_all().map_err(cleanup_and_err)?;
        fs::rename(&temp_path, &self.path).map_err(cleanup_and_err)?;
        Ok(())
    }

    /// Recorded pid, if the file exists and holds a number.
    #[must_use]
    pub fn read(&self) -> Option<u32> {
        let content = fs::read_to_string(&self.path).ok()?;
        content.trim().parse::<u32>().ok().filter(|pid| *pid != 0)
    }

    pub fn remove(&self) {
        match fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!(file = %self.path.display(), error = %error, "failed to remove pid file");
            }
            _ => {}
        }
    }
}
