use clap::Parser;
use stackctl::cli::output::{self, OutputConfig};
use stackctl::cli::{self, Cli, EXIT_USAGE};
use stackctl::infrastructure::config::Config;
use tracing::{debug, error};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    output::configure(OutputConfig::new(cli.json, cli.quiet, cli.verbose));

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            output::error(&format!("failed to load config: {e}"));
            std::process::exit(EXIT_USAGE);
        }
    };

    config.logging.clone().with_verbosity(cli.verbose).init();
    debug!(backend = %config.stack.backend, "stackctl starting");

    let code = match cli::execute(cli.command, &config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            output::error(&e.to_string());
            cli::exit_code(&e)
        }
    };
    std::process::exit(code);
}
