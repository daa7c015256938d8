//! # Vessel
//!
//! Asynchronous component resolution and message-bus observers for Rust services.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────┐  one match   ┌──────────────┐
//!   resolve::<T>() ─▶│   Resolver   │─────────────▶│   Producer   │──▶ AsyncHandle<T>
//!                    │              │  none        ┌──────────────┐
//!                    │              │─────────────▶│  Container   │──▶ AsyncHandle<T>
//!                    └──────────────┘ (worker pool)└──────────────┘
//!
//!   ┌─────────┐  message  ┌──────────┐  worker pool  ┌────────────────────┐
//!   │   Bus   │──────────▶│  Bridge  │──────────────▶│ Observer, Observer │
//!   │         │◀──────────│          │◀──────────────│ ...  (in order)    │
//!   └─────────┘   reply   └──────────┘   outcome     └────────────────────┘
//! ```
//!
//! - **Resolver**: hands out an [`AsyncHandle`](prelude::AsyncHandle) per request;
//!   producers take precedence over container components
//! - **Bridge**: one per observed address, runs that address's observers for every message
//! - **Runtime**: owns the event loop and worker pool, seals registries, registers consumers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vessel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = VesselRuntime::builder()
//!         .observe_fn("ping", |_ctx| Ok(Dispatch::reply("pong")))
//!         .build()?;
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Registration Hooks
//!
//! Producers and observers can also be contributed from anywhere in the
//! dependency graph and are collected when the runtime is built:
//!
//! ```rust,ignore
//! use vessel::core::linkme::distributed_slice;
//!
//! #[distributed_slice(vessel::bus::OBSERVERS)]
//! #[linkme(crate = vessel::core::linkme)]
//! static AUDIT: fn(&mut ObserverRegistryBuilder) = |observers| {
//!     observers.observe_fn("orders.created", |_ctx| Ok(Dispatch::Continue));
//! };
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: load `vessel.toml`
//! - `yaml-config`: load `vessel.yaml`
//! - `json-log`: JSON log output

pub use vessel_bus as bus;
pub use vessel_core as core;
pub use vessel_runtime as runtime;

/// Prelude module for convenient imports.
pub mod prelude {
    // Runtime - main entry point
    pub use vessel_runtime::{RuntimeBuilder, VesselConfig, VesselRuntime};

    // Resolution
    pub use vessel_core::{
        AsyncHandle, AsyncHandleResolver, BeanTypes, BoxError, Cause, ComponentDef, Container,
        ProducerRegistryBuilder, Qualifier, QualifierSet, ResolveError, Scope, StaticContainer,
        TypeTag, WorkerExecutor,
    };

    // Messaging
    pub use vessel_bus::{
        Body, BusFailure, DeliveryOptions, Dispatch, EventBus, EventContext, Headers, Message,
        Observer, ObserverRegistryBuilder, ServiceProxy,
    };
}
