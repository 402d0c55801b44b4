//! Command-line surface: argument parsing, output, and one module per
//! subcommand. No scheduling logic lives here.

pub mod command;
pub mod down;
pub mod logs;
pub mod output;
pub mod progress;
pub mod status;
pub mod up;

use crate::error::{Error, Result, ServiceError};
use crate::infrastructure::config::Config;

pub use command::{Cli, Commands};

/// Everything requested is up (possibly degraded), or the command succeeded.
pub const EXIT_OK: i32 = 0;
/// A Required service failed, or a stop failed.
pub const EXIT_FAILED: i32 = 1;
/// Invalid configuration or arguments.
pub const EXIT_USAGE: i32 = 2;

/// Exit code for an error that escaped a command.
#[must_use]
pub fn exit_code(err: &Error) -> i32 {
    match err {
        Error::Config(_)
        | Error::Url(_)
        | Error::Unschedulable { .. }
        | Error::Service(ServiceError::UnknownService(_)) => EXIT_USAGE,
        _ => EXIT_FAILED,
    }
}

/// Run one subcommand and return its exit code.
pub async fn execute(command: Commands, config: &Config) -> Result<i32> {
    match command {
        Commands::Up(args) => up::execute(config, args).await,
        Commands::Down(args) => down::execute(config, args).await,
        Commands::Status(args) => status::execute(config, args).await,
        Commands::Logs(args) => logs::execute(config, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ServiceName;
    use crate::error::ConfigError;

    #[test]
    fn usage_errors_exit_with_two() {
        let unknown = Error::Service(ServiceError::UnknownService(ServiceName::from("db")));
        assert_eq!(exit_code(&unknown), EXIT_USAGE);

        let config = Error::Config(ConfigError::MissingField { field: "endpoint" });
        assert_eq!(exit_code(&config), EXIT_USAGE);

        let cycle = Error::Unschedulable {
            services: vec![ServiceName::from("a")],
        };
        assert_eq!(exit_code(&cycle), EXIT_USAGE);
    }

    #[test]
    fn runtime_errors_exit_with_one() {
        let err = Error::Io(std::io::Error::other("boom"));
        assert_eq!(exit_code(&err), EXIT_FAILED);
    }
}
