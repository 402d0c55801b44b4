//! `stackctl up`: bring the stack up and keep it running in the foreground.

use std::time::Duration;

use chrono::Local;
use serde_json::json;
use tabled::{Table, Tabled};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use url::Url;

use super::command::UpArgs;
use super::output;
use super::progress::TerminalPullReporter;
use super::{EXIT_FAILED, EXIT_OK};
use crate::application::{Orchestrator, OrchestratorEvent};
use crate::domain::{
    OrchestrationRequest, OverallStatus, RunReport, ServiceOutcome, ServiceStatus,
};
use crate::error::{ConfigError, Result};
use crate::infrastructure::bootstrap::build_stack;
use crate::infrastructure::config::Config;

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Detail")]
    message: String,
}

/// Build the orchestration request from command-line arguments.
pub fn request(config: &Config, args: &UpArgs) -> Result<OrchestrationRequest> {
    let endpoint = args
        .endpoint
        .as_deref()
        .unwrap_or(&config.stack.endpoint);
    let endpoint = Url::parse(endpoint).map_err(|err| ConfigError::InvalidValue {
        field: "endpoint",
        reason: err.to_string(),
    })?;

    let mut request = OrchestrationRequest::new(endpoint).verbose(output::verbosity() > 0);
    for name in &args.optional {
        request = request.optional(name.trim());
    }
    // Required wins when a service is listed twice.
    for name in &args.require {
        request = request.require(name.trim());
    }
    if let Some(secs) = args.timeout {
        if secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeout",
                reason: "must be greater than 0".into(),
            }
            .into());
        }
        let names: Vec<_> = request.managed().map(|(name, _)| name.clone()).collect();
        for name in names {
            request = request.with_timeout(name, Duration::from_secs(secs));
        }
    }
    Ok(request)
}

/// Execute `up`. Returns the process exit code.
pub async fn execute(config: &Config, args: UpArgs) -> Result<i32> {
    let backend = args.backend.backend.unwrap_or(config.stack.backend);
    let request = request(config, &args)?;
    let stack = build_stack(config, backend, Box::new(TerminalPullReporter::default()))?;
    let orchestrator = &stack.orchestrator;
    let mut events = orchestrator.take_events();

    output::header(env!("CARGO_PKG_VERSION"));
    output::field("backend", orchestrator.backend_kind());
    output::field("endpoint", &request.endpoint);
    for (index, stage) in orchestrator.plan(&request)?.iter().enumerate() {
        output::field(&format!("stage {}", index + 1), output::highlight(join(&stage.services)));
    }

    let spinner = output::spinner("starting services");
    let finished = {
        let run = orchestrator.run(&request);
        tokio::pin!(run);
        loop {
            tokio::select! {
                result = &mut run => break Some(result),
                Some(event) = next_event(&mut events) => {
                    if let OrchestratorEvent::StageStarted { services, .. } = &event {
                        let names: Vec<&str> = services.iter().map(|name| name.as_str()).collect();
                        spinner.set_message(format!("starting {}", names.join(", ")));
                    } else {
                        render_event(&event);
                    }
                }
                _ = tokio::signal::ctrl_c() => break None,
            }
        }
    };

    let report = match finished {
        Some(Ok(report)) => report,
        Some(Err(err)) => {
            output::spinner_fail(&spinner, "startup aborted");
            return Err(err);
        }
        None => {
            output::spinner_fail(&spinner, "interrupted");
            stop_started(orchestrator).await;
            return Ok(EXIT_FAILED);
        }
    };

    match report.overall {
        OverallStatus::Healthy => output::spinner_success(
            &spinner,
            &format!("stack ready in {:.1}s", report.elapsed.as_secs_f64()),
        ),
        OverallStatus::Degraded => output::spinner_success(
            &spinner,
            &format!("stack usable (degraded) in {:.1}s", report.elapsed.as_secs_f64()),
        ),
        OverallStatus::Failed => output::spinner_fail(&spinner, "stack failed to start"),
    }
    render_report(&report);

    if !report.succeeded() {
        stop_started(orchestrator).await;
        return Ok(EXIT_FAILED);
    }

    output::hint("press Ctrl-C to stop services started by this command");
    loop {
        tokio::select! {
            Some(event) = next_event(&mut events) => render_event(&event),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("shutdown signal received");
    stop_started(orchestrator).await;
    Ok(EXIT_OK)
}

async fn next_event(
    events: &mut Option<UnboundedReceiver<OrchestratorEvent>>,
) -> Option<OrchestratorEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

/// Best-effort teardown of everything this invocation started.
async fn stop_started(orchestrator: &Orchestrator) {
    orchestrator.shutdown();
    let started = orchestrator.started_services();
    if started.is_empty() {
        return;
    }
    let spinner = output::spinner("stopping services");
    match orchestrator.teardown(&started).await {
        Ok(()) => output::spinner_success(&spinner, &format!("stopped {}", join(&started))),
        Err(err) => {
            warn!(error = %err, "teardown incomplete");
            output::spinner_fail(&spinner, &err.to_string());
        }
    }
}

fn join(names: &[crate::domain::ServiceName]) -> String {
    names
        .iter()
        .map(|name| name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_event(event: &OrchestratorEvent) {
    let now = Local::now().format("%H:%M:%S").to_string();
    match event {
        OrchestratorEvent::StageStarted { index, services } => {
            output::event(&now, "stage", &format!("{} started: {}", index + 1, join(services)));
        }
        OrchestratorEvent::ServiceResolved(outcome) => {
            output::event(
                &now,
                outcome.name.as_str(),
                &format!("{}: {}", colored_status(outcome.status), outcome.message),
            );
        }
        OrchestratorEvent::ServiceCrashed { service, detail } => {
            output::warning(&format!("{now} {service} exited unexpectedly ({detail})"));
        }
    }
}

fn colored_status(status: ServiceStatus) -> String {
    match status {
        ServiceStatus::Healthy => output::positive(status),
        ServiceStatus::Degraded | ServiceStatus::Starting => output::caution(status),
        ServiceStatus::Failed | ServiceStatus::Unhealthy => output::negative(status),
        ServiceStatus::Unknown => output::muted(status),
    }
}

fn row(outcome: &ServiceOutcome) -> OutcomeRow {
    OutcomeRow {
        service: outcome.name.to_string(),
        level: outcome.level.to_string(),
        status: colored_status(outcome.status),
        message: outcome.message.clone(),
    }
}

fn render_report(report: &RunReport) {
    if output::is_json() {
        output::json_output(json!({
            "type": "report",
            "payload": report,
        }));
        return;
    }

    output::section("Services");
    let table = Table::new(report.outcomes.iter().map(row)).to_string();
    output::lines(&table);

    if let Some(health) = &report.health {
        output::section("Health");
        output::field("status", health.status);
        if !health.summary.is_empty() {
            output::field("summary", &health.summary);
        }
        for component in health.failing() {
            output::warning(&format!(
                "{} is {}: {}",
                component.name, component.status, component.message
            ));
        }
    }

    for outcome in report.outcomes.iter().filter(|o| !o.status.is_final()) {
        output::note(&format!("{} is still starting in the background", outcome.name));
    }
}
