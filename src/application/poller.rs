//! Retry-until-ready primitive shared by every readiness check.

use std::future::Future;
use std::time::Duration;

use tokio::time::{self, Instant};

use crate::domain::ServiceName;
use crate::error::ServiceError;

/// Default pause between probe attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors that decide whether polling should keep going.
pub trait Retryable {
    fn is_retryable(&self) -> bool {
        true
    }
}

impl Retryable for ServiceError {
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ServiceError::StartFailed { .. } | ServiceError::UnknownService(_)
        )
    }
}

impl Retryable for String {}

/// Why polling stopped without success.
#[derive(Debug)]
pub enum PollError<E> {
    /// The deadline fired. Carries the last probe error, if any probe ran.
    Timeout { attempts: u32, last: Option<E> },
    /// The probe returned an error that will not go away by retrying.
    Aborted(E),
}

impl PollError<ServiceError> {
    /// Collapse into the service error reported for a failed wait.
    pub fn into_service_error(self, service: &ServiceName, timeout: Duration) -> ServiceError {
        match self {
            Self::Aborted(err) => err,
            Self::Timeout { last, .. } => match last {
                // An unhealthy payload is more useful than a bare timeout.
                Some(err @ ServiceError::Unhealthy { .. }) => err,
                last => ServiceError::ReadyTimeout {
                    service: service.clone(),
                    timeout,
                    last_error: last.map(|err| err.to_string()),
                },
            },
        }
    }
}

/// Calls a probe on a fixed interval until it succeeds or a deadline fires.
#[derive(Debug, Clone, Copy)]
pub struct HealthPoller {
    interval: Duration,
}

impl Default for HealthPoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl HealthPoller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `probe` until it returns `Ok` or `deadline` passes.
    ///
    /// The probe always runs at least once. A probe that is in flight when the
    /// deadline fires is cancelled.
    pub async fn until_ready<T, E, F, Fut>(
        &self,
        deadline: Instant,
        mut probe: F,
    ) -> Result<T, PollError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        let mut attempts = 0u32;
        let mut last = None;

        let polled = time::timeout_at(deadline, async {
            loop {
                attempts += 1;
                match probe().await {
                    Ok(value) => return Ok(value),
                    Err(err) if !err.is_retryable() => return Err(err),
                    Err(err) => last = Some(err),
                }
                time::sleep(self.interval).await;
            }
        })
        .await;

        match polled {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(PollError::Aborted(err)),
            Err(_) => {
                tracing::debug!(attempts, "poll deadline reached");
                Err(PollError::Timeout { attempts, last })
            }
        }
    }

    /// Convenience wrapper taking a timeout relative to now.
    pub async fn within<T, E, F, Fut>(
        &self,
        timeout: Duration,
        probe: F,
    ) -> Result<T, PollError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        self.until_ready(Instant::now() + timeout, probe).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_retries() {
        let calls = AtomicU32::new(0);
        let poller = HealthPoller::new(Duration::from_secs(1));

        let result: Result<u32, PollError<String>> = poller
            .within(Duration::from_secs(10), || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= 3 {
                    Ok(n)
                } else {
                    Err(format!("attempt {n}"))
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_with_last_error() {
        let poller = HealthPoller::new(Duration::from_secs(1));
        let started = Instant::now();

        let result: Result<(), PollError<String>> = poller
            .within(Duration::from_millis(3500), || async { Err("refused".to_string()) })
            .await;

        match result {
            Err(PollError::Timeout { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last.as_deref(), Some("refused"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_millis(3500));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let poller = HealthPoller::default();

        let result: Result<(), PollError<ServiceError>> = poller
            .within(Duration::from_secs(30), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::StartFailed {
                    service: ServiceName::from("server"),
                    reason: "exited".into(),
                })
            })
            .await;

        assert!(matches!(result, Err(PollError::Aborted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timeout_becomes_ready_timeout() {
        let err: PollError<ServiceError> = PollError::Timeout {
            attempts: 2,
            last: Some(ServiceError::Unreachable {
                service: ServiceName::from("rag"),
                reason: "connection refused".into(),
            }),
        };

        let converted = err.into_service_error(&ServiceName::from("rag"), Duration::from_secs(5));

        match converted {
            ServiceError::ReadyTimeout { last_error, .. } => {
                assert!(last_error.unwrap().contains("connection refused"));
            }
            other => panic!("expected ReadyTimeout, got {other:?}"),
        }
    }
}
