//! # Vessel Runtime
//!
//! Orchestration layer for the Vessel framework.
//!
//! This crate provides:
//! - Layered configuration (`vessel.toml`, `VESSEL_*` environment, programmatic)
//! - Logging setup driven by that configuration
//! - [`VesselRuntime`]: event loop ownership, registry sealing, consumer
//!   registration and shutdown
//!
//! ```ignore
//! use vessel_runtime::VesselRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = VesselRuntime::builder().build()?;
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, VesselConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RuntimeBuilder, RuntimeStats, VesselRuntime};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros and span helpers.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
