//! Per-service start locks shared across CLI invocations.
//!
//! `<state>/<service>.lock` holds the pid of the invocation that owns the
//! service. A lock whose owner is gone is reclaimed.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::signal;
use crate::domain::ServiceName;
use crate::error::SupervisorError;

/// Held lock; removed from disk on drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    _file: File,
}

impl LockFile {
    /// Take the lock for `service`, reclaiming it if the recorded owner died.
    pub fn acquire(service: &ServiceName, path: &Path) -> Result<Self, SupervisorError> {
        let owner = std::process::id();
        match create(path, owner) {
            Ok(file) => {
                info!(service = %service, file = %path.display(), "acquired start lock");
                Ok(Self {
                    path: path.to_path_buf(),
                    _file: file,
                })
            }
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                reclaim(service, path)?;
                let file = create(path, owner).map_err(|source| lock_err(path, source))?;
                Ok(Self {
                    path: path.to_path_buf(),
                    _file: file,
                })
            }
            Err(source) => Err(lock_err(path, source)),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!(file = %self.path.display(), error = %error, "failed to remove lock file");
            }
            _ => {}
        }
    }
}

fn create(path: &Path, owner: u32) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    writeln!(file, "{owner}")?;
    file.sync_all()?;
    Ok(file)
}

fn reclaim(service: &ServiceName, path: &Path) -> Result<(), SupervisorError> {
    let owner = fs::read_to_string(path)
        .ok()
        .and_then(|content| content.trim().parse::<u32>().ok());

    if let Some(owner) = owner {
        if signal::is_alive(owner) {
            return Err(SupervisorError::Locked {
                service: service.clone(),
                owner,
            });
        }
        warn!(service = %service, owner, "reclaiming stale start lock");
    } else {
        warn!(service = %service, file = %path.display(), "reclaiming unreadable start lock");
    }

    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(lock_err(path, source)),
    }
}

fn lock_err(path: &Path, source: io::Error) -> SupervisorError {
    SupervisorError::Lock {
        path: path.to_path_buf(),
        source,
    }
}
