//! Per-service configuration (`[services.<name>]`).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::service::{RAG, RUNTIME, SERVER};
use crate::domain::{ReadinessProbe, ServiceDefinition};
use crate::error::ConfigError;

/// Settings for one service. Every field is optional; unset fields keep the
/// built-in defaults of the known services.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Program to run with the process backend.
    pub command: Option<String>,
    /// Arguments for `command`, or the container command with the container
    /// backend.
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Host port the service listens on.
    pub port: Option<u16>,
    /// Image repository for the container backend.
    pub image: Option<String>,
    pub tag: Option<String>,
    /// Port inside the container; defaults to `port`.
    pub container_port: Option<u16>,
    /// `host:container[:mode]` bind mounts.
    pub volumes: Vec<String>,
    pub timeout_secs: Option<u64>,
    /// HTTP readiness path.
    pub health_path: Option<String>,
    /// Output line that signals readiness.
    pub ready_pattern: Option<String>,
    pub depends_on: Option<Vec<String>>,
}

impl ServiceConfig {
    /// Reject values that cannot describe a runnable service.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "timeout_secs",
                reason: format!("{name}: must be greater than 0"),
            });
        }
        if self.port == Some(0) || self.container_port == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "port",
                reason: format!("{name}: must be greater than 0"),
            });
        }
        if self.health_path.is_some() && self.ready_pattern.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "ready_pattern",
                reason: format!("{name}: set either health_path or ready_pattern, not both"),
            });
        }
        if let Some(path) = &self.health_path {
            if !path.starts_with('/') {
                return Err(ConfigError::InvalidValue {
                    field: "health_path",
                    reason: format!("{name}: must start with '/'"),
                });
            }
        }
        if self.command.as_deref().is_some_and(|command| command.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "command",
                reason: format!("{name}: must not be empty"),
            });
        }
        Ok(())
    }

    /// Apply these settings on top of a definition.
    pub fn apply(&self, mut def: ServiceDefinition) -> ServiceDefinition {
        if let Some(port) = self.port {
            def.port = Some(port);
        }
        if let Some(secs) = self.timeout_secs {
            def.default_timeout = Duration::from_secs(secs);
        }
        if let Some(path) = &self.health_path {
            let structured = matches!(def.probe, ReadinessProbe::Http { structured: true, .. });
            def.probe = ReadinessProbe::Http {
                path: path.clone(),
                structured,
            };
        }
        if let Some(pattern) = &self.ready_pattern {
            def.probe = ReadinessProbe::LogPattern(pattern.clone());
        }
        if let Some(dependencies) = &self.depends_on {
            def.dependencies = dependencies.iter().map(|dep| dep.as_str().into()).collect();
        }
        def
    }

    /// Image reference with its tag resolved: the service tag, then the
    /// stack-wide tag, then `latest`. References that already carry a tag
    /// or digest are kept.
    pub fn image_reference(&self, name: &str, stack_tag: Option<&str>) -> Option<String> {
        let image = self
            .image
            .clone()
            .or_else(|| default_image(name).map(str::to_string))?;
        let last = image.rsplit('/').next().unwrap_or(&image);
        if image.contains('@') || last.contains(':') {
            return Some(image);
        }
        let tag = self.tag.as_deref().or(stack_tag).unwrap_or("latest");
        Some(format!("{image}:{tag}"))
    }

    /// Command for the process backend.
    pub fn command(&self, name: &str) -> Option<(String, Vec<String>)> {
        match &self.command {
            Some(command) => Some((command.clone(), self.args.clone())),
            None => default_command(name).map(|(program, args)| {
                (
                    program.to_string(),
                    args.iter().map(|arg| (*arg).to_string()).collect(),
                )
            }),
        }
    }

    /// Container port the service listens on.
    pub fn container_port(&self, def: &ServiceDefinition) -> Option<u16> {
        self.container_port.or(def.port)
    }
}

/// Built-in image of a known service.
pub fn default_image(name: &str) -> Option<&'static str> {
    match name {
        SERVER => Some("ghcr.io/stackctl/server"),
        RAG => Some("ghcr.io/stackctl/rag"),
        RUNTIME => Some("ollama/ollama"),
        _ => None,
    }
}

/// Built-in command of a known service, when it ships as a host binary.
pub fn default_command(name: &str) -> Option<(&'static str, &'static [&'static str])> {
    match name {
        RUNTIME => Some(("ollama", &["serve"])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_reference_resolves_tags_in_order() {
        let mut config = ServiceConfig::default();
        assert_eq!(
            config.image_reference(SERVER, None).as_deref(),
            Some("ghcr.io/stackctl/server:latest")
        );
        assert_eq!(
            config.image_reference(SERVER, Some("1.4")).as_deref(),
            Some("ghcr.io/stackctl/server:1.4")
        );

        config.tag = Some("edge".into());
        assert_eq!(
            config.image_reference(SERVER, Some("1.4")).as_deref(),
            Some("ghcr.io/stackctl/server:edge")
        );
    }

    #[test]
    fn explicit_tag_in_image_wins() {
        let config = ServiceConfig {
            image: Some("localhost:5000/rag:dev".into()),
            tag: Some("ignored".into()),
            ..ServiceConfig::default()
        };
        assert_eq!(
            config.image_reference(RAG, None).as_deref(),
            Some("localhost:5000/rag:dev")
        );
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        let config = ServiceConfig {
            image: Some("localhost:5000/rag".into()),
            ..ServiceConfig::default()
        };
        assert_eq!(
            config.image_reference(RAG, Some("2")).as_deref(),
            Some("localhost:5000/rag:2")
        );
    }

    #[test]
    fn unknown_service_without_image_has_none() {
        assert!(ServiceConfig::default().image_reference("worker", None).is_none());
    }

    #[test]
    fn apply_keeps_structured_flag_when_path_changes() {
        let def = ServiceDefinition::new(SERVER).with_probe(ReadinessProbe::Http {
            path: "/health".into(),
            structured: true,
        });
        let config = ServiceConfig {
            health_path: Some("/api/health".into()),
            timeout_secs: Some(5),
            ..ServiceConfig::default()
        };

        let def = config.apply(def);
        assert_eq!(
            def.probe,
            ReadinessProbe::Http {
                path: "/api/health".into(),
                structured: true
            }
        );
        assert_eq!(def.default_timeout, Duration::from_secs(5));
    }

    #[test]
    fn rejects_conflicting_probes() {
        let config = ServiceConfig {
            health_path: Some("/health".into()),
            ready_pattern: Some("ready".into()),
            ..ServiceConfig::default()
        };
        assert!(matches!(
            config.validate("rag"),
            Err(ConfigError::InvalidValue {
                field: "ready_pattern",
                ..
            })
        ));
    }

    #[test]
    fn rejects_zero_timeout() {
        let config = ServiceConfig {
            timeout_secs: Some(0),
            ..ServiceConfig::default()
        };
        assert!(config.validate("server").is_err());
    }
}
