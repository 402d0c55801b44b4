//! Unix signal helpers.

use crate::error::SupervisorError;

/// Signals the supervisor sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Kill,
}

/// Whether a process with this pid exists.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs error checking only and delivers nothing.
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
pub fn send(pid: u32, signal: Signal) -> Result<(), SupervisorError> {
    let raw = match signal {
        Signal::Interrupt => libc::SIGINT,
        Signal::Kill => libc::SIGKILL,
    };
    let target = libc::pid_t::try_from(pid).map_err(|_| SupervisorError::Signal {
        pid,
        source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
    })?;
    // SAFETY: kill has no memory-safety preconditions.
    let result = unsafe { libc::kill(target, raw) };
    if result == 0 {
        return Ok(());
    }
    let source = std::io::Error::last_os_error();
    if source.raw_os_error() == Some(libc::ESRCH) {
        // Already gone.
        return Ok(());
    }
    Err(SupervisorError::Signal { pid, source })
}

#[cfg(not(unix))]
pub fn send(_pid: u32, _signal: Signal) -> Result<(), SupervisorError> {
    Err(SupervisorError::UnsupportedPlatform)
}
