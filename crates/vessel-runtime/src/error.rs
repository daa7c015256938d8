//! Runtime error types.

use thiserror::Error;
use vessel_bus::BusError;

use crate::config::ConfigError;

/// Errors that can occur while building, starting or running the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The event-loop thread could not be started.
    #[error("Failed to start event loop: {0}")]
    EventLoop(#[from] std::io::Error),

    /// Not every address confirmed its subscription in time.
    #[error(
        "Only {registered} of {total} message consumers registered within {timeout_ms} ms"
    )]
    SubscriptionTimeout {
        registered: usize,
        total: usize,
        timeout_ms: u64,
    },

    /// The bus refused a subscription.
    #[error("Failed to register message consumer for '{address}'")]
    Subscription {
        address: String,
        #[source]
        source: BusError,
    },
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
