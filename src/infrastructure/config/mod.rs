//! Infrastructure configuration modules.

pub mod logging;
pub mod service;
pub mod settings;

pub use logging::LoggingConfig;
pub use service::ServiceConfig;
pub use settings::{Config, StackConfig};
