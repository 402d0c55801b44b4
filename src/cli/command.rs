//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::port::BackendKind;

/// Control plane for the local server, RAG worker and inference runtime.
#[derive(Parser, Debug)]
#[command(name = "stackctl")]
#[command(version)]
pub struct Cli {
    /// Configuration file [default: ~/.stackctl/config.toml]
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// JSON output for scripting
    #[arg(long, global = true)]
    pub json: bool,

    /// Decrease output verbosity
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase output verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start services and wait until they are ready
    Up(UpArgs),

    /// Stop services
    Down(DownArgs),

    /// Show backend state and health of every service
    Status(StatusArgs),

    /// Print the tail of a service log
    Logs(LogsArgs),
}

#[derive(Args, Debug, Default)]
pub struct BackendArg {
    /// Backend to use [process, container]
    #[arg(long)]
    pub backend: Option<BackendKind>,
}

/// Arguments for `stackctl up`.
#[derive(Args, Debug, Default)]
pub struct UpArgs {
    /// Services that must become ready
    #[arg(long, value_delimiter = ',', default_value = "server")]
    pub require: Vec<String>,

    /// Services started in the background without blocking
    #[arg(long, value_delimiter = ',')]
    pub optional: Vec<String>,

    /// Base URL of the API server
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Readiness timeout in seconds for every requested service
    #[arg(long)]
    pub timeout: Option<u64>,

    #[command(flatten)]
    pub backend: BackendArg,
}

/// Arguments for `stackctl down`.
#[derive(Args, Debug, Default)]
pub struct DownArgs {
    /// Services to stop [default: all]
    pub services: Vec<String>,

    #[command(flatten)]
    pub backend: BackendArg,
}

/// Arguments for `stackctl status`.
#[derive(Args, Debug, Default)]
pub struct StatusArgs {
    /// Base URL of the API server
    #[arg(long)]
    pub endpoint: Option<String>,

    #[command(flatten)]
    pub backend: BackendArg,
}

/// Arguments for `stackctl logs`.
#[derive(Args, Debug)]
pub struct LogsArgs {
    pub service: String,

    /// Number of lines
    #[arg(short = 'n', long, default_value_t = 50)]
    pub lines: usize,

    #[command(flatten)]
    pub backend: BackendArg,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn up_parses_lists_and_backend() {
        let cli = Cli::parse_from([
            "stackctl",
            "up",
            "--require",
            "server,rag",
            "--optional",
            "runtime",
            "--backend",
            "container",
            "--timeout",
            "5",
        ]);
        let Commands::Up(args) = cli.command else {
            panic!("expected up");
        };
        assert_eq!(args.require, vec!["server", "rag"]);
        assert_eq!(args.optional, vec!["runtime"]);
        assert_eq!(args.backend.backend, Some(BackendKind::Container));
        assert_eq!(args.timeout, Some(5));
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = Cli::parse_from(["stackctl", "status", "--json", "-vv"]);
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
    }
}
