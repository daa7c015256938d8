//! Layered configuration for the Vessel runtime.

mod error;
mod loader;
mod schema;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ENV_PREFIX, PROFILE_ENV, Profile};
pub use schema::{
    BootstrapConfig, BusConfig, ExecutorSettings, LogFormat, LogLevel, LogOutput, LogRotation,
    LoggingConfig, SpanEventConfig, VesselConfig,
};
pub use validation::validate_config;

impl VesselConfig {
    /// Loads configuration from the default locations and environment.
    pub fn load() -> ConfigResult<Self> {
        ConfigLoader::new().load()
    }
}
