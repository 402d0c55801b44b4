//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`backend`]: scripted [`ServiceBackend`](crate::port::ServiceBackend)
//!   whose services become healthy, fail or hang on cue.
//! - [`engine`]: in-memory [`ContainerEngine`](crate::port::ContainerEngine).
//! - [`domain`]: builders for catalogs, requests and health payloads.

pub mod backend;
pub mod domain;
pub mod engine;

pub use backend::{FakeBackend, Script};
pub use engine::FakeEngine;
