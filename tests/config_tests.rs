use std::fs;
use std::time::Duration;

use stackctl::domain::{ReadinessProbe, ServiceName};
use stackctl::error::{ConfigError, Error};
use stackctl::infrastructure::config::Config;
use stackctl::port::BackendKind;
use tempfile::TempDir;

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, contents).expect("write config");
    path
}

#[test]
fn explicit_config_file_is_loaded() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
        [stack]
        endpoint = "http://127.0.0.1:18080"
        poll_interval_ms = 200
        required_components = ["database", "vector_store"]

        [services.server]
        command = "./target/release/server"
        port = 18080
        timeout_secs = 45

        [services.rag]
        command = "python"
        args = ["-m", "rag.worker"]
        ready_pattern = "worker ready"
        "#,
    );

    let config = Config::load(Some(&path)).unwrap();

    assert_eq!(config.endpoint().unwrap().port(), Some(18080));
    assert_eq!(config.poll_interval(), Duration::from_millis(200));
    assert_eq!(
        config.orchestrator_settings().required_components,
        vec!["database", "vector_store"]
    );

    let catalog = config.catalog(BackendKind::Process);
    let server = catalog.get(&ServiceName::from("server")).unwrap();
    assert_eq!(server.port, Some(18080));
    assert_eq!(server.default_timeout, Duration::from_secs(45));
    assert!(server.reports_payload());

    let rag = catalog.get(&ServiceName::from("rag")).unwrap();
    assert!(rag.local_start);
    assert_eq!(rag.probe, ReadinessProbe::LogPattern("worker ready".into()));

    let specs = config.process_specs(&catalog);
    assert_eq!(specs[&ServiceName::from("rag")].args, vec!["-m", "rag.worker"]);
}

#[test]
fn missing_explicit_config_file_is_an_error() {
    let dir = TempDir::new().unwrap();

    let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();

    assert!(matches!(err, Error::Config(ConfigError::ReadFile { .. })));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[stack\nendpoint = ");

    let err = Config::load(Some(&path)).unwrap_err();

    assert!(matches!(err, Error::Config(ConfigError::Parse(_))));
}

#[test]
fn conflicting_readiness_settings_are_rejected() {
    let err = Config::parse_toml(
        r#"
        [services.server]
        health_path = "/health"
        ready_pattern = "listening"
        "#,
    )
    .unwrap_err();

    assert!(err.to_string().contains("ready_pattern"));
}

#[test]
fn unknown_service_keys_are_rejected() {
    let err = Config::parse_toml("[services.server]\nimage_tag = \"1.0\"").unwrap_err();

    assert!(matches!(err, Error::Config(ConfigError::Parse(_))));
}

#[test]
fn unknown_log_format_is_rejected() {
    let err = Config::parse_toml("[logging]\nformat = \"xml\"").unwrap_err();

    assert!(err.to_string().contains("format"));
}

#[test]
fn container_backend_marks_imageless_services_external() {
    let config = Config::parse_toml(
        r#"
        [services.indexer]
        command = "./indexer"
        "#,
    )
    .unwrap();

    let catalog = config.catalog(BackendKind::Container);

    assert!(!catalog.get(&ServiceName::from("indexer")).unwrap().local_start);
    assert!(catalog.get(&ServiceName::from("server")).unwrap().local_start);
    assert!(!config
        .container_specs(&catalog)
        .contains_key("indexer"));
}

#[test]
fn pinned_image_reference_keeps_its_tag() {
    let config = Config::parse_toml(
        r#"
        [stack]
        image_tag = "2.0"

        [services.runtime]
        image = "registry.local:5000/ollama/ollama:0.3.12"
        "#,
    )
    .unwrap();

    let catalog = config.catalog(BackendKind::Container);
    let specs = config.container_specs(&catalog);

    assert_eq!(
        specs[&ServiceName::from("runtime")].image,
        "registry.local:5000/ollama/ollama:0.3.12"
    );
    assert_eq!(
        specs[&ServiceName::from("server")].image,
        "ghcr.io/stackctl/server:2.0"
    );
}
