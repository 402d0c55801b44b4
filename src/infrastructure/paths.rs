//! Path utilities for stackctl.
//!
//! Configuration lives under `~/.stackctl/`; runtime state (PID files, lock
//! files, service logs) under the platform state directory:
//! - `~/.stackctl/config.toml` - main configuration
//! - `$XDG_STATE_HOME/stackctl/` - state, falling back to `~/.stackctl/state/`

use std::path::PathBuf;

/// Returns the stackctl home directory (`~/.stackctl/`).
pub fn home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".stackctl")
}

/// Returns the default config file path (`~/.stackctl/config.toml`).
pub fn default_config_path() -> PathBuf {
    home_dir().join("config.toml")
}

/// Returns the default state directory.
pub fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .map(|dir| dir.join("stackctl"))
        .unwrap_or_else(|| home_dir().join("state"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_under_stackctl_dirs() {
        assert!(home_dir().to_string_lossy().contains(".stackctl"));
        assert!(default_config_path().ends_with(".stackctl/config.toml"));
        assert!(default_state_dir().to_string_lossy().contains("stackctl"));
    }
}
