//! `stackctl down`.

use serde_json::json;

use super::command::DownArgs;
use super::output;
use super::{EXIT_FAILED, EXIT_OK};
use crate::adapter::container::SilentReporter;
use crate::domain::ServiceName;
use crate::error::{Error, Result};
use crate::infrastructure::bootstrap::build_stack;
use crate::infrastructure::config::Config;

/// Execute `down`. Every service is attempted; failures are listed together.
pub async fn execute(config: &Config, args: DownArgs) -> Result<i32> {
    let backend = args.backend.backend.unwrap_or(config.stack.backend);
    let stack = build_stack(config, backend, Box::new(SilentReporter))?;
    let services: Vec<ServiceName> = args
        .services
        .iter()
        .map(|name| ServiceName::from(name.trim()))
        .collect();

    let spinner = output::spinner("stopping services");
    match stack.down(&services).await {
        Ok(stopped) => {
            let names: Vec<&str> = stopped.iter().map(ServiceName::as_str).collect();
            if output::is_json() {
                spinner.finish_and_clear();
                output::json_output(json!({
                    "type": "down",
                    "payload": { "stopped": names, "errors": [] },
                }));
            } else {
                output::spinner_success(&spinner, &format!("stopped {}", names.join(", ")));
            }
            Ok(EXIT_OK)
        }
        Err(Error::Teardown(errors)) => {
            if output::is_json() {
                spinner.finish_and_clear();
                let messages: Vec<String> = errors.0.iter().map(ToString::to_string).collect();
                output::json_output(json!({
                    "type": "down",
                    "payload": { "errors": messages },
                }));
            } else {
                output::spinner_fail(
                    &spinner,
                    &format!("{} service(s) could not be stopped", errors.len()),
                );
                for err in &errors.0 {
                    output::error(&err.to_string());
                }
            }
            Ok(EXIT_FAILED)
        }
        Err(err) => {
            spinner.finish_and_clear();
            Err(err)
        }
    }
}
