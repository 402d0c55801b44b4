//! Backends and clients for the outside world.

pub mod container;
pub mod http;
pub mod process;
