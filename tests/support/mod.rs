#![allow(dead_code)]

use std::time::Duration;

use stackctl::application::OrchestratorEvent;
use stackctl::domain::ServiceName;
use tokio::sync::mpsc::UnboundedReceiver;

/// Receive events until `matches` accepts one, failing after `within`.
pub async fn wait_for_event(
    events: &mut UnboundedReceiver<OrchestratorEvent>,
    within: Duration,
    matches: impl Fn(&OrchestratorEvent) -> bool,
) -> OrchestratorEvent {
    let found = tokio::time::timeout(within, async {
        while let Some(event) = events.recv().await {
            if matches(&event) {
                return Some(event);
            }
        }
        None
    })
    .await;
    match found {
        Ok(Some(event)) => event,
        Ok(None) => panic!("event channel closed before the expected event"),
        Err(_) => panic!("expected event did not arrive within {within:?}"),
    }
}

/// Everything already queued on the channel.
pub fn drain(events: &mut UnboundedReceiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub fn names(services: &[ServiceName]) -> Vec<&str> {
    services.iter().map(ServiceName::as_str).collect()
}

/// Write an executable shell script into `dir`.
#[cfg(unix)]
pub fn script(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod script");
    path
}
