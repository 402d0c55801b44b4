//! Logging configuration and initialization.

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl LoggingConfig {
    /// Raise the level for each `-v` given on the command line.
    #[must_use]
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        self.level = match verbose {
            0 => self.level,
            1 => "debug".into(),
            _ => "trace".into(),
        };
        self
    }

    /// Initialize the tracing subscriber. `RUST_LOG` takes precedence over
    /// the configured level. Logs go to stderr so stdout stays parseable.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        let result = match self.format.as_str() {
            "json" => fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init(),
            _ => fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init(),
        };
        // Already initialized, e.g. by a test harness.
        let _ = result;
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "pretty".into(),
        }
    }
}
