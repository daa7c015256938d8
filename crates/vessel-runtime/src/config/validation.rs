//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, LoggingConfig, VesselConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &VesselConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;

    if config.executor.worker_pool_size == 0 {
        return Err(ConfigError::validation(
            "executor.worker_pool_size must be greater than 0",
        ));
    }
    if config.executor.event_loop_thread_name.trim().is_empty() {
        return Err(ConfigError::validation(
            "executor.event_loop_thread_name must not be empty",
        ));
    }

    if config.bootstrap.registration_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "bootstrap.registration_timeout_ms must be greater than 0",
        ));
    }

    if config.bus.default_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "bus.default_timeout_ms must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output is \"file\"",
        ));
    }

    if let Some(module) = logging.filters.keys().find(|m| m.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Invalid logging filter target: {module:?}"
        )));
    }

    Ok(())
}
