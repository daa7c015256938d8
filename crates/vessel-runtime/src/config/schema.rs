//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vessel_bus::DeliveryOptions;
use vessel_core::ExecutorConfig;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VesselConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Event loop and worker pool settings.
    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Startup behaviour.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    /// Message bus defaults.
    #[serde(default)]
    pub bus: BusConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// How often file output starts a new file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global level; overridden by `RUST_LOG` when set.
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    pub span_events: SpanEventConfig,
    /// Include thread ids and names.
    pub thread_ids: bool,
    /// Include file and line of the call site.
    pub file_location: bool,
    /// Target file when `output = "file"`.
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Per-module levels, e.g. `vessel_bus = "debug"`.
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: None,
            rotation: LogRotation::Never,
            filters: HashMap::new(),
        }
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Event loop and worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Maximum number of blocking worker threads.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Name of the event-loop thread.
    #[serde(default = "default_event_loop_thread_name")]
    pub event_loop_thread_name: String,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            event_loop_thread_name: default_event_loop_thread_name(),
        }
    }
}

impl ExecutorSettings {
    pub fn to_executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            worker_pool_size: self.worker_pool_size,
            thread_name: self.event_loop_thread_name.clone(),
        }
    }
}

fn default_worker_pool_size() -> usize {
    20
}

fn default_event_loop_thread_name() -> String {
    "vessel-event-loop".to_string()
}

// =============================================================================
// Bootstrap
// =============================================================================

/// Startup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Maximum time to wait for all message consumers to register.
    #[serde(default = "default_registration_timeout_ms")]
    pub registration_timeout_ms: u64,

    /// Collect producers and observers from link-time registration hooks.
    #[serde(default = "default_scan")]
    pub scan: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            registration_timeout_ms: default_registration_timeout_ms(),
            scan: default_scan(),
        }
    }
}

impl BootstrapConfig {
    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }
}

fn default_registration_timeout_ms() -> u64 {
    10_000
}

fn default_scan() -> bool {
    true
}

// =============================================================================
// Bus
// =============================================================================

/// Message bus defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Reply timeout applied to proxies created by the runtime.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

impl BusConfig {
    pub fn delivery_options(&self) -> DeliveryOptions {
        DeliveryOptions::default().with_timeout(Duration::from_millis(self.default_timeout_ms))
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}
