//! HTTP health probing shared by both backends.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::domain::{Assessment, HealthPayload, ServiceName};
use crate::error::ServiceError;
use crate::port::{HealthCheck, ProbeContext};

/// Per-request timeout for health probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Thin reqwest wrapper for health endpoints.
#[derive(Debug, Clone)]
pub struct HealthClient {
    client: Client,
}

impl HealthClient {
    /// Client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// GET a path that reports the structured health payload and assess it.
    pub async fn payload(
        &self,
        service: &ServiceName,
        base: &Url,
        path: &str,
        ctx: &ProbeContext,
    ) -> Result<HealthCheck, ServiceError> {
        let url = endpoint_url(service, base, path)?;
        debug!(service = %service, url = %url, "fetching health payload");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| unreachable(service, &err))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| unreachable(service, &err))?;

        let payload: HealthPayload =
            serde_json::from_str(&body).map_err(|err| ServiceError::Unreachable {
                service: service.clone(),
                reason: format!("HTTP {status} with unreadable health payload: {err}"),
            })?;

        match payload.assess(&ctx.required_components) {
            Assessment::Healthy => Ok(HealthCheck::with_payload(payload)),
            Assessment::DegradedUsable { reasons } => {
                Ok(HealthCheck::with_payload(payload).degraded(reasons.join("; ")))
            }
            Assessment::Unhealthy => Err(ServiceError::Unhealthy {
                service: service.clone(),
                payload: Box::new(payload),
            }),
        }
    }

    /// GET a plain endpoint; any 2xx response counts as healthy.
    pub async fn probe(
        &self,
        service: &ServiceName,
        base: &Url,
        path: &str,
    ) -> Result<HealthCheck, ServiceError> {
        let url = endpoint_url(service, base, path)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| unreachable(service, &err))?;

        if response.status().is_success() {
            Ok(HealthCheck::healthy())
        } else {
            Err(ServiceError::Unreachable {
                service: service.clone(),
                reason: format!("HTTP {}", response.status()),
            })
        }
    }
}

/// Append `path` to `base`, keeping any path prefix the base already has.
pub fn endpoint_url(service: &ServiceName, base: &Url, path: &str) -> Result<Url, ServiceError> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|err| ServiceError::Unreachable {
        service: service.clone(),
        reason: format!("invalid health URL {joined}: {err}"),
    })
}

/// `http://127.0.0.1:<port>` for a service listening on this host.
pub fn local_url(service: &ServiceName, port: u16) -> Result<Url, ServiceError> {
    Url::parse(&format!("http://127.0.0.1:{port}")).map_err(|err| ServiceError::Unreachable {
        service: service.clone(),
        reason: format!("invalid local URL for port {port}: {err}"),
    })
}

fn unreachable(service: &ServiceName, err: &reqwest::Error) -> ServiceError {
    let reason = if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        "connection refused".to_string()
    } else {
        err.to_string()
    };
    ServiceError::Unreachable {
        service: service.clone(),
        reason,
    }
}
