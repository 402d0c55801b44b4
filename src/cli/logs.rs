//! `stackctl logs`.

use serde_json::json;

use super::command::LogsArgs;
use super::output;
use crate::adapter::container::SilentReporter;
use crate::domain::ServiceName;
use crate::error::Result;
use crate::infrastructure::bootstrap::build_stack;
use crate::infrastructure::config::Config;

pub async fn execute(config: &Config, args: LogsArgs) -> Result<i32> {
    let backend = args.backend.backend.unwrap_or(config.stack.backend);
    let stack = build_stack(config, backend, Box::new(SilentReporter))?;
    let service = ServiceName::from(args.service.trim());
    let lines = stack.logs(&service, args.lines).await?;

    if output::is_json() {
        output::json_output(json!({
            "type": "logs",
            "payload": { "service": service, "lines": lines },
        }));
        return Ok(super::EXIT_OK);
    }
    if lines.is_empty() {
        output::note(&format!("no output recorded for {service}"));
    }
    for line in lines {
        println!("{line}");
    }
    Ok(super::EXIT_OK)
}
