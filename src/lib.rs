//! stackctl - control plane for a local multi-service application stack.
//!
//! Brings up an API server, a retrieval-augmented-generation worker and a
//! local inference runtime in dependency order, as OS processes or as
//! containers, and reports which of them became ready.
//!
//! # Modules
//!
//! - [`domain`] - Service names, requirement levels, outcomes, health payloads
//! - [`port`] - Backend and container engine traits
//! - [`application`] - Health poller, stage planning, lifecycle, orchestrator
//! - [`adapter`] - Process and container backends, HTTP health client
//! - [`infrastructure`] - Configuration, paths, and wiring
//! - [`cli`] - Command-line surface
//! - [`error`] - Error types for the crate
//!
//! # Features
//!
//! - `testkit` - Scripted fake backend and in-memory container engine
//!
//! # Example
//!
//! ```no_run
//! use stackctl::domain::OrchestrationRequest;
//! use stackctl::infrastructure::config::Config;
//! use stackctl::port::BackendKind;
//!
//! # async fn run() -> stackctl::error::Result<()> {
//! let config = Config::load(None)?;
//! let stack = stackctl::infrastructure::bootstrap::build_stack(
//!     &config,
//!     BackendKind::Process,
//!     Box::new(stackctl::adapter::container::SilentReporter),
//! )?;
//! let request = OrchestrationRequest::new(config.endpoint()?)
//!     .require("server")
//!     .optional("rag");
//! let report = stack.orchestrator.run(&request).await?;
//! println!("{}", report.overall);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod application;
pub mod cli;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
