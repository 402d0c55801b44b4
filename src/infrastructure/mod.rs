//! Configuration, paths, and runtime wiring.

pub mod bootstrap;
pub mod config;
pub mod paths;
