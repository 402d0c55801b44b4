//! Orchestration behaviour against the scripted backend.
//!
//! Every test runs with a paused clock, so multi-second readiness waits
//! complete instantly while timeouts still fire in the right order.

mod support;

use std::sync::Arc;
use std::time::Duration;

use stackctl::application::{Catalog, Orchestrator, OrchestratorEvent, OrchestratorSettings};
use stackctl::domain::{OverallStatus, ServiceDefinition, ServiceName, ServiceStatus};
use stackctl::error::{Error, ServiceError};
use stackctl::testkit::domain::{
    database_down_payload, local_request, orchestrator, request, runtime_down_payload,
    service, stack_catalog,
};
use stackctl::testkit::{FakeBackend, Script};
use support::{drain, names, wait_for_event};
use tokio::time::Instant;

const POLL: Duration = Duration::from_millis(100);

fn catalog() -> Catalog {
    stack_catalog(Duration::from_secs(10), Duration::from_secs(90))
}

// ---------------------------------------------------------------------------
// Stage ordering
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn dependents_start_after_their_dependencies_are_ready() {
    let backend = FakeBackend::new()
        .with_poll_interval(POLL)
        .script("server", Script::HealthyAfter(Duration::from_secs(2)))
        .script("rag", Script::HealthyAfter(Duration::from_millis(500)))
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());
    let mut events = orch.take_events().unwrap();

    let report = orch
        .run(&local_request().require("server").require("rag"))
        .await
        .unwrap();

    assert_eq!(report.overall, OverallStatus::Healthy);
    assert_eq!(names(&backend.starts()), vec!["server", "rag"]);

    let stages: Vec<Vec<ServiceName>> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            OrchestratorEvent::StageStarted { services, .. } => Some(services),
            _ => None,
        })
        .collect();
    assert_eq!(stages.len(), 2);
    assert_eq!(names(&stages[0]), vec!["server"]);
    assert_eq!(names(&stages[1]), vec!["rag"]);
}

#[tokio::test(start_paused = true)]
async fn already_healthy_service_is_never_restarted() {
    let backend = FakeBackend::new()
        .script("server", Script::AlreadyHealthy)
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());

    let report = orch.run(&local_request().require("server")).await.unwrap();

    let server = report.outcome("server").unwrap();
    assert_eq!(server.status, ServiceStatus::Healthy);
    assert_eq!(server.message, "already running");
    assert!(backend.starts().is_empty());
    assert!(orch.started_services().is_empty());
}

#[tokio::test(start_paused = true)]
async fn start_concurrency_is_bounded() {
    let catalog = Catalog::new((0..6).map(|i| service(&format!("svc{i}"), &[])));
    let backend = (0..6)
        .fold(
            FakeBackend::new()
                .with_poll_interval(POLL)
                .with_start_delay(Duration::from_secs(1)),
            |backend, i| backend.script(&format!("svc{i}"), Script::HealthyAfter(Duration::ZERO)),
        )
        .into_arc();
    let settings = OrchestratorSettings {
        max_concurrency: 2,
        poll_interval: POLL,
        ..OrchestratorSettings::default()
    };
    let orch = Orchestrator::new(Arc::new(catalog), backend.clone(), settings);

    let mut req = local_request();
    for i in 0..6 {
        req = req.require(format!("svc{i}"));
    }
    let report = orch.run(&req).await.unwrap();

    assert_eq!(report.overall, OverallStatus::Healthy);
    assert_eq!(backend.starts().len(), 6);
    assert_eq!(backend.max_concurrent_starts(), 2);
}

// ---------------------------------------------------------------------------
// Required and Optional outcomes
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn required_ready_with_optional_still_starting_succeeds() {
    let backend = FakeBackend::new()
        .with_poll_interval(POLL)
        .script("server", Script::HealthyAfter(Duration::from_secs(1)))
        .script("rag", Script::HealthyAfter(Duration::from_secs(30)))
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());
    let mut events = orch.take_events().unwrap();

    let report = orch
        .run(&local_request().require("server").optional("rag"))
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(report.overall, OverallStatus::Healthy);
    assert_eq!(report.outcome("rag").unwrap().status, ServiceStatus::Starting);
    assert_eq!(orch.pending_background(), 1);

    let resolved = wait_for_event(&mut events, Duration::from_secs(120), |event| {
        matches!(event, OrchestratorEvent::ServiceResolved(outcome) if outcome.name.as_str() == "rag")
    })
    .await;
    let OrchestratorEvent::ServiceResolved(outcome) = resolved else {
        unreachable!()
    };
    assert_eq!(outcome.status, ServiceStatus::Healthy);
    assert_eq!(orch.outcome("rag").unwrap().status, ServiceStatus::Healthy);
}

#[tokio::test(start_paused = true)]
async fn run_returns_once_required_services_are_ready() {
    let backend = FakeBackend::new()
        .with_poll_interval(POLL)
        .script("server", Script::HealthyAfter(Duration::from_secs(2)))
        .script("rag", Script::NeverReady)
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());
    let started = Instant::now();

    let report = orch
        .run(&local_request().require("server").optional("rag"))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(report.succeeded());
    assert!(elapsed >= Duration::from_secs(2), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "returned after {elapsed:?}");
    assert!(backend.was_started("rag"));
    assert_eq!(orch.pending_background(), 1);

    orch.shutdown();
}

#[tokio::test(start_paused = true)]
async fn required_start_failure_fails_run_and_skips_later_stages() {
    let backend = FakeBackend::new()
        .script("server", Script::StartFails("binary not found".into()))
        .script("rag", Script::HealthyAfter(Duration::ZERO))
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());

    let report = orch
        .run(&local_request().require("server").require("rag"))
        .await
        .unwrap();

    assert_eq!(report.overall, OverallStatus::Failed);
    let server = report.outcome("server").unwrap();
    assert_eq!(server.status, ServiceStatus::Failed);
    assert!(matches!(server.error, Some(ServiceError::StartFailed { .. })));
    assert!(server.message.contains("binary not found"));

    let rag = report.outcome("rag").unwrap();
    assert_eq!(rag.status, ServiceStatus::Failed);
    assert!(rag.message.starts_with("skipped"));
    assert!(!backend.was_started("rag"));
}

#[tokio::test(start_paused = true)]
async fn required_ready_timeout_fails_run() {
    let backend = FakeBackend::new()
        .with_poll_interval(POLL)
        .script("server", Script::NeverReady)
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());
    let started = Instant::now();

    let report = orch
        .run(
            &local_request()
                .require("server")
                .with_timeout("server", Duration::from_secs(3)),
        )
        .await
        .unwrap();

    assert_eq!(report.overall, OverallStatus::Failed);
    let server = report.outcome("server").unwrap();
    match &server.error {
        Some(ServiceError::ReadyTimeout {
            timeout,
            last_error,
            ..
        }) => {
            assert_eq!(*timeout, Duration::from_secs(3));
            assert!(last_error.as_deref().unwrap_or_default().contains("connection refused"));
        }
        other => panic!("expected ReadyTimeout, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn failing_required_service_aborts_its_stage_siblings() {
    let catalog = Catalog::new([service("fast", &[]), service("slow", &[])]);
    let backend = FakeBackend::new()
        .with_poll_interval(POLL)
        .script("fast", Script::StartFails("exited with code 3".into()))
        .script("slow", Script::HealthyAfter(Duration::from_secs(30)))
        .into_arc();
    let orch = orchestrator(catalog, backend.clone());
    let started = Instant::now();

    let report = orch
        .run(&local_request().require("fast").require("slow"))
        .await
        .unwrap();

    assert_eq!(report.overall, OverallStatus::Failed);
    assert!(started.elapsed() < Duration::from_secs(1));
    let slow = report.outcome("slow").unwrap();
    assert_eq!(slow.status, ServiceStatus::Failed);
    assert!(slow.message.starts_with("aborted"));
}

#[tokio::test(start_paused = true)]
async fn optional_ready_timeout_degrades_without_failing() {
    let backend = FakeBackend::new()
        .with_poll_interval(POLL)
        .script("server", Script::AlreadyHealthy)
        .script("rag", Script::NeverReady)
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());

    let report = orch
        .run(
            &local_request()
                .require("server")
                .optional("rag")
                .with_timeout("rag", Duration::from_secs(2)),
        )
        .await
        .unwrap();
    assert!(report.succeeded());

    orch.wait_background().await;
    let rag = orch.outcome("rag").unwrap();
    assert_eq!(rag.status, ServiceStatus::Degraded);
    assert!(matches!(rag.error, Some(ServiceError::ReadyTimeout { .. })));
}

#[tokio::test(start_paused = true)]
async fn optional_start_failure_is_still_awaited_and_degrades() {
    let backend = FakeBackend::new()
        .with_poll_interval(POLL)
        .script("server", Script::AlreadyHealthy)
        .script("rag", Script::StartFails("no such file".into()))
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());

    let report = orch
        .run(
            &local_request()
                .require("server")
                .optional("rag")
                .with_timeout("rag", Duration::from_secs(1)),
        )
        .await
        .unwrap();
    orch.wait_background().await;

    assert_eq!(report.overall, OverallStatus::Healthy);
    assert_eq!(orch.outcome("rag").unwrap().status, ServiceStatus::Degraded);
    assert!(orch.started_services().is_empty());
}

#[tokio::test(start_paused = true)]
async fn second_run_cancels_optional_workers_of_the_first() {
    let backend = FakeBackend::new()
        .with_poll_interval(POLL)
        .script("server", Script::AlreadyHealthy)
        .script("rag", Script::NeverReady)
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());
    let mut events = orch.take_events().unwrap();

    orch.run(
        &local_request()
            .require("server")
            .optional("rag")
            .with_timeout("rag", Duration::from_secs(5)),
    )
    .await
    .unwrap();
    assert_eq!(orch.pending_background(), 1);

    let report = orch.run(&local_request().require("server")).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(orch.pending_background(), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(orch.outcome("rag").is_none());
    assert_eq!(orch.outcomes().len(), 1);
    assert!(!drain(&mut events)
        .iter()
        .any(|event| matches!(event, OrchestratorEvent::ServiceResolved(outcome) if outcome.name.as_str() == "rag")));
}

// ---------------------------------------------------------------------------
// Health payload assessment
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn server_degraded_only_by_runtime_is_usable() {
    let backend = FakeBackend::new()
        .script("server", Script::Reports(runtime_down_payload()))
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());

    let report = orch.run(&local_request().require("server")).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.overall, OverallStatus::Degraded);
    let server = report.outcome("server").unwrap();
    assert_eq!(server.status, ServiceStatus::Degraded);
    assert!(server.message.contains("runtime is unhealthy"));
    let health = report.health.as_ref().unwrap();
    assert_eq!(health.failing().count(), 1);
}

#[tokio::test(start_paused = true)]
async fn runtime_component_blocks_server_when_runtime_is_required() {
    let backend = FakeBackend::new()
        .with_poll_interval(POLL)
        .script("server", Script::Reports(runtime_down_payload()))
        .script("runtime", Script::AlreadyHealthy)
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());

    let report = orch
        .run(
            &local_request()
                .require("server")
                .require("runtime")
                .with_timeout("server", Duration::from_secs(1)),
        )
        .await
        .unwrap();

    assert_eq!(report.overall, OverallStatus::Failed);
    let server = report.outcome("server").unwrap();
    assert!(matches!(server.error, Some(ServiceError::Unhealthy { .. })));
    assert!(server.health.is_some());
}

#[tokio::test(start_paused = true)]
async fn database_down_fails_required_server_with_payload() {
    let backend = FakeBackend::new()
        .with_poll_interval(POLL)
        .script("server", Script::Reports(database_down_payload()))
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());

    let report = orch
        .run(
            &local_request()
                .require("server")
                .with_timeout("server", Duration::from_secs(2)),
        )
        .await
        .unwrap();

    assert_eq!(report.overall, OverallStatus::Failed);
    let health = report.health.as_ref().unwrap();
    assert_eq!(health.components[0].name, "database");
}

// ---------------------------------------------------------------------------
// Remote and external services
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn remote_endpoint_is_only_polled() {
    let backend = FakeBackend::new()
        .with_poll_interval(POLL)
        .script("server", Script::NeverReady)
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());

    let report = orch
        .run(
            &request("https://api.example.com")
                .require("server")
                .with_timeout("server", Duration::from_secs(2)),
        )
        .await
        .unwrap();

    assert_eq!(report.overall, OverallStatus::Failed);
    assert!(backend.starts().is_empty());
    assert!(backend.checks("server") > 1);
}

#[tokio::test(start_paused = true)]
async fn external_service_is_polled_until_reachable() {
    let catalog = Catalog::new([ServiceDefinition::new("server").external()]);
    let backend = FakeBackend::new()
        .script("server", Script::AlreadyHealthy)
        .into_arc();
    let orch = orchestrator(catalog, backend.clone());

    let report = orch.run(&local_request().require("server")).await.unwrap();

    assert_eq!(report.overall, OverallStatus::Healthy);
    assert!(backend.starts().is_empty());
}

// ---------------------------------------------------------------------------
// Planning errors
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn unknown_service_fails_before_anything_starts() {
    let backend = FakeBackend::new().into_arc();
    let orch = orchestrator(catalog(), backend.clone());

    let err = orch
        .run(&local_request().require("server").require("frontend"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Service(ServiceError::UnknownService(_))));
    assert_eq!(backend.checks("server"), 0);
}

#[tokio::test(start_paused = true)]
async fn dependency_cycle_is_unschedulable() {
    let catalog = Catalog::new([service("a", &["b"]), service("b", &["a"])]);
    let backend = FakeBackend::new().into_arc();
    let orch = orchestrator(catalog, backend.clone());

    let err = orch
        .run(&local_request().require("a").require("b"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Unschedulable { .. }));
    assert!(backend.starts().is_empty());
}

// ---------------------------------------------------------------------------
// Teardown and crash reporting
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn teardown_stops_dependents_first_and_collects_errors() {
    let backend = FakeBackend::new()
        .with_poll_interval(POLL)
        .script("server", Script::HealthyAfter(Duration::ZERO))
        .script("rag", Script::HealthyAfter(Duration::ZERO))
        .with_stop_failure("server")
        .with_stop_failure("rag")
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());
    orch.run(&local_request().require("server").require("rag"))
        .await
        .unwrap();
    assert_eq!(names(&orch.started_services()), vec!["server", "rag"]);

    let err = orch.teardown_started().await.unwrap_err();

    match err {
        Error::Teardown(errors) => assert_eq!(errors.len(), 2),
        other => panic!("expected Teardown, got {other:?}"),
    }
    assert_eq!(names(&backend.stops()), vec!["rag", "server"]);
}

#[tokio::test(start_paused = true)]
async fn teardown_succeeds_when_every_stop_succeeds() {
    let backend = FakeBackend::new()
        .with_poll_interval(POLL)
        .script("server", Script::HealthyAfter(Duration::ZERO))
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());
    orch.run(&local_request().require("server")).await.unwrap();

    orch.teardown_started().await.unwrap();

    assert!(orch.started_services().is_empty());
    assert_eq!(names(&backend.stops()), vec!["server"]);
}

#[tokio::test(start_paused = true)]
async fn backend_crash_is_forwarded_as_event() {
    let backend = FakeBackend::new()
        .script("server", Script::AlreadyHealthy)
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());
    let mut events = orch.take_events().unwrap();
    orch.run(&local_request().require("server")).await.unwrap();

    backend.crash("server", "exit code 137");

    let crashed = wait_for_event(&mut events, Duration::from_secs(1), |event| {
        matches!(event, OrchestratorEvent::ServiceCrashed { .. })
    })
    .await;
    match crashed {
        OrchestratorEvent::ServiceCrashed { service, detail } => {
            assert_eq!(service.as_str(), "server");
            assert_eq!(detail, "exit code 137");
        }
        other => panic!("expected crash, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Status snapshots
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn snapshot_reports_every_catalog_service() {
    let backend = FakeBackend::new()
        .script("server", Script::Reports(runtime_down_payload()))
        .into_arc();
    let orch = orchestrator(catalog(), backend.clone());

    let snapshots = orch
        .snapshot(url::Url::parse("http://127.0.0.1:8080").unwrap())
        .await;

    assert_eq!(snapshots.len(), 3);
    let server = snapshots.iter().find(|s| s.name.as_str() == "server").unwrap();
    assert_eq!(server.status, ServiceStatus::Degraded);
    assert!(server.health.is_some());
    let rag = snapshots.iter().find(|s| s.name.as_str() == "rag").unwrap();
    assert_eq!(rag.status, ServiceStatus::Unknown);
}
