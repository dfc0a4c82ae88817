//! Configuration module.
//!
//! JSON configuration file (`config.json`) with environment overrides
//! and code defaults.

pub mod defaults;
pub mod loader;
pub mod logging;
pub mod types;
pub mod validation;

pub use loader::load;
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use types::{Config, ReliabilityTuning, ServerTuning};
pub use validation::{is_production_mode, validate_config_security};
