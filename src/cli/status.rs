//! `stackctl status`.

use serde_json::json;
use tabled::{Table, Tabled};
use url::Url;

use super::command::StatusArgs;
use super::output;
use crate::adapter::container::SilentReporter;
use crate::application::ServiceSnapshot;
use crate::domain::ServiceStatus;
use crate::error::{ConfigError, Result};
use crate::infrastructure::bootstrap::build_stack;
use crate::infrastructure::config::Config;

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Runtime")]
    runtime: String,
    #[tabled(rename = "Health")]
    status: String,
    #[tabled(rename = "Detail")]
    message: String,
}

fn row(snapshot: &ServiceSnapshot) -> SnapshotRow {
    let status = match snapshot.status {
        ServiceStatus::Healthy => output::positive(snapshot.status),
        ServiceStatus::Degraded => output::caution(snapshot.status),
        ServiceStatus::Failed | ServiceStatus::Unhealthy => output::negative(snapshot.status),
        _ => output::muted(snapshot.status),
    };
    SnapshotRow {
        service: snapshot.name.to_string(),
        runtime: snapshot.runtime.to_string(),
        status,
        message: snapshot.message.clone(),
    }
}

/// Execute `status`. Always succeeds once the stack is built; unhealthy
/// services are reported, not treated as errors.
pub async fn execute(config: &Config, args: StatusArgs) -> Result<i32> {
    let backend = args.backend.backend.unwrap_or(config.stack.backend);
    let endpoint = args
        .endpoint
        .as_deref()
        .unwrap_or(&config.stack.endpoint);
    let endpoint = Url::parse(endpoint).map_err(|err| ConfigError::InvalidValue {
        field: "endpoint",
        reason: err.to_string(),
    })?;

    let stack = build_stack(config, backend, Box::new(SilentReporter))?;
    let spinner = output::spinner("probing services");
    let snapshots = stack.orchestrator.snapshot(endpoint.clone()).await;
    spinner.finish_and_clear();

    if output::is_json() {
        output::json_output(json!({
            "type": "status",
            "payload": {
                "backend": backend,
                "endpoint": endpoint.as_str(),
                "services": snapshots,
            },
        }));
        return Ok(super::EXIT_OK);
    }

    output::header(env!("CARGO_PKG_VERSION"));
    output::field("backend", backend);
    output::field("endpoint", &endpoint);
    output::section("Services");
    let table = Table::new(snapshots.iter().map(row)).to_string();
    output::lines(&table);

    if let Some(health) = snapshots.iter().find_map(|snapshot| snapshot.health.as_ref()) {
        output::section("Health");
        output::field("status", health.status);
        for component in &health.components {
            output::field(
                &component.name,
                format!("{} {}", component.status, output::muted(&component.message)),
            );
        }
    }
    Ok(super::EXIT_OK)
}
