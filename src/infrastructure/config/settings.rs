//! Application configuration loading and validation.
//!
//! Provides the main [`Config`] struct. Configuration is read from an optional
//! TOML file and then overridden by `STACKCTL_*` environment variables.
//!
//! # Example
//!
//! ```no_run
//! use stackctl::infrastructure::config::settings::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None)?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use super::logging::LoggingConfig;
use super::service::ServiceConfig;
use crate::adapter::process::ProcessSpec;
use crate::application::{Catalog, HealthPoller, OrchestratorSettings};
use crate::domain::container::container_name;
use crate::domain::service::{RUNTIME, SERVER};
use crate::domain::{ContainerRunSpec, PortSpec, ServiceDefinition, ServiceName};
use crate::error::{ConfigError, Result};
use crate::infrastructure::paths;
use crate::port::BackendKind;

/// Environment variable overriding the target endpoint.
pub const ENV_ENDPOINT: &str = "STACKCTL_ENDPOINT";
/// Environment variable selecting the backend.
pub const ENV_BACKEND: &str = "STACKCTL_BACKEND";
/// Environment variable overriding the state directory.
pub const ENV_STATE_DIR: &str = "STACKCTL_STATE_DIR";
/// Environment variable setting the image tag of every service.
pub const ENV_IMAGE_TAG: &str = "STACKCTL_IMAGE_TAG";
/// Injected into managed services: where the API server listens.
pub const ENV_SERVER_URL: &str = "STACKCTL_SERVER_URL";
/// Injected into managed services: where the inference runtime listens.
pub const ENV_RUNTIME_URL: &str = "STACKCTL_RUNTIME_URL";

/// `[stack]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StackConfig {
    /// Base URL of the API server.
    pub endpoint: String,
    pub backend: BackendKind,
    /// Where PID files, lock files, and logs are kept.
    pub state_dir: Option<PathBuf>,
    pub max_concurrency: usize,
    pub poll_interval_ms: u64,
    /// Fail instead of using dynamic host ports when a preferred one is busy.
    pub strict_ports: bool,
    /// Container network name.
    pub network: String,
    /// Tag applied to every image without its own.
    pub image_tag: Option<String>,
    /// Health components the server is not usable without.
    pub required_components: Vec<String>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".into(),
            backend: BackendKind::default(),
            state_dir: None,
            max_concurrency: 4,
            poll_interval_ms: 1000,
            strict_ports: false,
            network: crate::adapter::container::DEFAULT_NETWORK.into(),
            image_tag: None,
            required_components: vec!["database".into()],
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub stack: StackConfig,

    /// Logging and tracing configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-service settings keyed by service name.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

impl Config {
    /// Parse configuration from TOML content without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML content is malformed or validation fails.
    #[allow(clippy::result_large_err)]
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`, or from the default location when
    /// `None`, then apply environment overrides.
    ///
    /// An explicit path must exist. A missing default file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the TOML content is
    /// malformed, or validation fails.
    #[allow(clippy::result_large_err)]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::read(path)?,
            None => {
                let default = paths::default_config_path();
                if default.exists() {
                    Self::read(&default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    #[allow(clippy::result_large_err)]
    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(ConfigError::Parse)?;
        Ok(config)
    }

    /// Apply `STACKCTL_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has an invalid value.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> std::result::Result<(), ConfigError> {
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.stack.endpoint = endpoint;
        }
        if let Some(backend) = lookup(ENV_BACKEND) {
            self.stack.backend = backend
                .parse()
                .map_err(|reason| ConfigError::InvalidValue {
                    field: "backend",
                    reason,
                })?;
        }
        if let Some(dir) = lookup(ENV_STATE_DIR) {
            self.stack.state_dir = Some(PathBuf::from(dir));
        }
        if let Some(tag) = lookup(ENV_IMAGE_TAG) {
            self.stack.image_tag = Some(tag);
        }

        let mut names: Vec<String> = Catalog::standard()
            .names()
            .map(ToString::to_string)
            .collect();
        names.extend(self.services.keys().cloned());
        names.sort();
        names.dedup();
        for name in names {
            if let Some(tag) = lookup(&service_tag_var(&name)) {
                self.services.entry(name).or_default().tag = Some(tag);
            }
        }
        Ok(())
    }

    /// Validate configuration values.
    #[allow(clippy::result_large_err)]
    fn validate(&self) -> Result<()> {
        if self.stack.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "endpoint" }.into());
        }
        Url::parse(&self.stack.endpoint).map_err(|err| ConfigError::InvalidValue {
            field: "endpoint",
            reason: err.to_string(),
        })?;
        if self.stack.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrency",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.stack.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.stack.network.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "network" }.into());
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::InvalidValue {
                field: "format",
                reason: format!("expected pretty or json, got '{}'", self.logging.format),
            }
            .into());
        }
        for (name, service) in &self.services {
            service.validate(name)?;
        }
        Ok(())
    }

    /// Parsed target endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid URL.
    pub fn endpoint(&self) -> Result<Url> {
        Ok(Url::parse(&self.stack.endpoint)?)
    }

    /// Configured state directory, or the per-user default.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.stack
            .state_dir
            .clone()
            .unwrap_or_else(paths::default_state_dir)
    }

    #[must_use]
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_concurrency: self.stack.max_concurrency,
            poll_interval: self.poll_interval(),
            required_components: self.stack.required_components.clone(),
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.stack.poll_interval_ms)
    }

    #[must_use]
    pub fn poller(&self) -> HealthPoller {
        HealthPoller::new(self.poll_interval())
    }

    fn service(&self, name: &str) -> ServiceConfig {
        self.services.get(name).cloned().unwrap_or_default()
    }

    /// Service catalog for `backend`: the standard services with their
    /// overrides plus any additional configured services. Services the
    /// backend has no way to start are marked external.
    #[must_use]
    pub fn catalog(&self, backend: BackendKind) -> Catalog {
        let mut catalog = Catalog::standard();
        for name in self.services.keys() {
            if !catalog.contains(name) {
                catalog.insert(ServiceDefinition::new(name.as_str()));
            }
        }

        let definitions: Vec<ServiceDefinition> = catalog.iter().cloned().collect();
        for def in definitions {
            let config = self.service(def.name.as_str());
            let mut def = config.apply(def);
            let startable = match backend {
                BackendKind::Process => config.command(def.name.as_str()).is_some(),
                BackendKind::Container => config
                    .image_reference(def.name.as_str(), self.stack.image_tag.as_deref())
                    .is_some(),
            };
            if !startable {
                def = def.external();
            }
            catalog.insert(def);
        }
        catalog
    }

    /// Commands for the process backend, with the service URLs injected.
    #[must_use]
    pub fn process_specs(&self, catalog: &Catalog) -> HashMap<ServiceName, ProcessSpec> {
        let runtime_url = catalog
            .get(&ServiceName::from(RUNTIME))
            .ok()
            .and_then(|def| def.port)
            .map(|port| format!("http://127.0.0.1:{port}"));

        catalog
            .iter()
            .filter_map(|def| {
                let config = self.service(def.name.as_str());
                let (program, args) = config.command(def.name.as_str())?;
                let mut spec = ProcessSpec::new(program)
                    .args(args)
                    .env(ENV_SERVER_URL, self.stack.endpoint.clone());
                if let Some(url) = &runtime_url {
                    spec = spec.env(ENV_RUNTIME_URL, url.clone());
                }
                for (key, value) in &config.env {
                    spec = spec.env(key.clone(), value.clone());
                }
                if let Some(dir) = &config.working_dir {
                    spec = spec.working_dir(dir.clone());
                }
                Some((def.name.clone(), spec))
            })
            .collect()
    }

    /// Container specs for the container backend. Services reach each other
    /// by container name on the managed network.
    #[must_use]
    pub fn container_specs(&self, catalog: &Catalog) -> HashMap<ServiceName, ContainerRunSpec> {
        let internal_url = |name: &str| {
            let def = catalog.get(&ServiceName::from(name)).ok()?;
            let port = self.service(name).container_port(def)?;
            Some(format!("http://{}:{port}", container_name(&def.name)))
        };
        let server_url = internal_url(SERVER);
        let runtime_url = internal_url(RUNTIME);

        catalog
            .iter()
            .filter_map(|def| {
                let config = self.service(def.name.as_str());
                let image = config
                    .image_reference(def.name.as_str(), self.stack.image_tag.as_deref())?;
                let mut spec = ContainerRunSpec::new(def.name.clone(), image)
                    .args(config.args.clone())
                    .strict_ports(self.stack.strict_ports);
                if let Some(container_port) = config.container_port(def) {
                    spec = spec.port(match def.port {
                        Some(host_port) => PortSpec::fixed(host_port, container_port),
                        None => PortSpec::dynamic(container_port),
                    });
                }
                if let Some(url) = &server_url {
                    spec = spec.env(ENV_SERVER_URL, url.clone());
                }
                if let Some(url) = &runtime_url {
                    spec = spec.env(ENV_RUNTIME_URL, url.clone());
                }
                for (key, value) in &config.env {
                    spec = spec.env(key.clone(), value.clone());
                }
                for bind in &config.volumes {
                    spec = spec.volume(bind.clone());
                }
                Some((def.name.clone(), spec))
            })
            .collect()
    }

    /// Initialize logging with the configured settings.
    pub fn init_logging(&self) {
        self.logging.init();
    }
}

/// `STACKCTL_<SERVICE>_IMAGE_TAG` for a service name.
pub fn service_tag_var(name: &str) -> String {
    let upper: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("STACKCTL_{upper}_IMAGE_TAG")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ReadinessProbe;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse_toml("").unwrap();
        assert_eq!(config.stack.backend, BackendKind::Process);
        assert_eq!(config.stack.max_concurrency, 4);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.stack.required_components, vec!["database"]);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn parses_all_sections() {
        let config = Config::parse_toml(
            r#"
            [stack]
            endpoint = "http://10.0.0.5:9000"
            backend = "container"
            max_concurrency = 2
            poll_interval_ms = 250
            strict_ports = true

            [logging]
            level = "debug"
            format = "json"

            [services.server]
            command = "./server"
            args = ["--port", "9000"]
            port = 9000
            timeout_secs = 30

            [services.rag]
            ready_pattern = "rag up"
            "#,
        )
        .unwrap();

        assert_eq!(config.stack.backend, BackendKind::Container);
        assert!(config.stack.strict_ports);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.logging.format, "json");

        let catalog = config.catalog(BackendKind::Process);
        let server = catalog.get(&ServiceName::from(SERVER)).unwrap();
        assert_eq!(server.port, Some(9000));
        assert_eq!(server.default_timeout, Duration::from_secs(30));
        assert!(server.local_start);

        let rag = catalog.get(&ServiceName::from("rag")).unwrap();
        assert_eq!(rag.probe, ReadinessProbe::LogPattern("rag up".into()));
        // No command for rag with the process backend.
        assert!(!rag.local_start);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::parse_toml("[stack]\nendpoit = \"x\"").unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Config(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let err = Config::parse_toml("[stack]\nendpoint = \"not a url\"").unwrap_err();
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(Config::parse_toml("[stack]\nmax_concurrency = 0").is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                (ENV_ENDPOINT, "https://stack.example.com"),
                (ENV_BACKEND, "docker"),
                (ENV_STATE_DIR, "/tmp/state"),
                (ENV_IMAGE_TAG, "1.0"),
                ("STACKCTL_RAG_IMAGE_TAG", "1.1"),
            ]))
            .unwrap();

        assert_eq!(config.stack.endpoint, "https://stack.example.com");
        assert_eq!(config.stack.backend, BackendKind::Container);
        assert_eq!(config.state_dir(), PathBuf::from("/tmp/state"));

        let catalog = config.catalog(BackendKind::Container);
        let specs = config.container_specs(&catalog);
        assert_eq!(specs[&ServiceName::from(SERVER)].image, "ghcr.io/stackctl/server:1.0");
        assert_eq!(specs[&ServiceName::from("rag")].image, "ghcr.io/stackctl/rag:1.1");
    }

    #[test]
    fn invalid_backend_override_is_rejected() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[(ENV_BACKEND, "vm")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "backend", .. }));
    }

    #[test]
    fn process_specs_inject_service_urls() {
        let config = Config::parse_toml(
            r#"
            [services.server]
            command = "./server"
            working_dir = "/srv"
            env = { RUST_LOG = "info" }
            "#,
        )
        .unwrap();
        let catalog = config.catalog(BackendKind::Process);
        let specs = config.process_specs(&catalog);

        let server = &specs[&ServiceName::from(SERVER)];
        assert_eq!(server.program, "./server");
        assert_eq!(server.working_dir.as_deref(), Some(Path::new("/srv")));
        assert_eq!(server.env.get(ENV_SERVER_URL).map(String::as_str), Some("http://127.0.0.1:8080"));
        assert_eq!(
            server.env.get(ENV_RUNTIME_URL).map(String::as_str),
            Some("http://127.0.0.1:11434")
        );
        assert_eq!(server.env.get("RUST_LOG").map(String::as_str), Some("info"));

        // The runtime ships a default command.
        assert_eq!(specs[&ServiceName::from(RUNTIME)].program, "ollama");
        assert!(!specs.contains_key("rag"));
    }

    #[test]
    fn container_specs_use_network_names_and_ports() {
        let config = Config::parse_toml(
            r#"
            [services.server]
            port = 18080
            container_port = 8080
            "#,
        )
        .unwrap();
        let catalog = config.catalog(BackendKind::Container);
        let specs = config.container_specs(&catalog);

        let server = &specs[&ServiceName::from(SERVER)];
        assert_eq!(server.ports, vec![PortSpec::fixed(18080, 8080)]);
        let rag = &specs[&ServiceName::from("rag")];
        assert!(rag.ports.is_empty());
        assert_eq!(
            rag.env.get(ENV_SERVER_URL).map(String::as_str),
            Some("http://stackctl-server:8080")
        );
    }

    #[test]
    fn extra_services_join_the_catalog() {
        let config = Config::parse_toml(
            r#"
            [services.indexer]
            command = "./indexer"
            depends_on = ["server"]
            "#,
        )
        .unwrap();
        let catalog = config.catalog(BackendKind::Process);
        let indexer = catalog.get(&ServiceName::from("indexer")).unwrap();
        assert_eq!(indexer.dependencies, vec![ServiceName::from(SERVER)]);
        assert_eq!(indexer.probe, ReadinessProbe::Liveness);
    }

    #[test]
    fn tag_variable_names() {
        assert_eq!(service_tag_var("rag"), "STACKCTL_RAG_IMAGE_TAG");
        assert_eq!(service_tag_var("vector-db"), "STACKCTL_VECTOR_DB_IMAGE_TAG");
    }
}
