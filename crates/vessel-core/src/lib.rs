//! # Vessel Core
//!
//! The asynchronous dependency-resolution engine of the Vessel framework.
//!
//! This crate lets non-blocking code obtain component instances without
//! stalling the event loop:
//!
//! - **Handles**: single-assignment results with continuations ([`AsyncHandle`], [`Completer`])
//! - **Execution**: event-loop and worker-pool scheduling ([`WorkerExecutor`], [`EventLoop`])
//! - **Type model**: runtime type tags and qualifiers ([`TypeTag`], [`QualifierSet`], [`Instance`])
//! - **Producers**: asynchronous factories discovered at bootstrap ([`ProducerRegistry`])
//! - **Container**: synchronous component lookup ([`Container`], [`StaticContainer`])
//! - **Resolution**: producer-first, worker-fallback lookup ([`AsyncHandleResolver`])
//!
//! ## Resolution flow
//!
//! ```text
//! resolve(T, qualifiers)
//!     │
//!     ├── exactly one async producer ──▶ chain its handle (event loop only)
//!     ├── several async producers ─────▶ fail: ambiguous
//!     └── none ──▶ worker pool: container lookup ─▶ materialize ─▶ force
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vessel_core::{AsyncHandleResolver, ComponentDef, ProducerRegistry, QualifierSet,
//!     StaticContainer, WorkerExecutor};
//!
//! struct Clock;
//!
//! #[tokio::main]
//! async fn main() {
//!     let container = StaticContainer::new()
//!         .with(ComponentDef::new("clock", || Ok(Arc::new(Clock))));
//!     let resolver = AsyncHandleResolver::new(
//!         ProducerRegistry::empty(),
//!         Arc::new(container),
//!         WorkerExecutor::current(),
//!     );
//!
//!     let clock = resolver.resolve::<Clock>(&QualifierSet::new()).await.unwrap();
//! }
//! ```

pub mod container;
pub mod error;
pub mod executor;
pub mod handle;
pub mod producer;
pub mod resolver;
pub mod types;

pub use container::{
    Candidate, Component, ComponentDef, Container, LazyFactory, Scope, StaticContainer,
};
pub use error::{BoxError, Cause, Origin, ResolveError, TaskError, cause, panic_message};
pub use executor::{EventLoop, ExecutorConfig, ExecutorStats, WorkerExecutor};
pub use handle::{AsyncHandle, Completer};
pub use producer::{PRODUCERS, ProducerEntry, ProducerFn, ProducerRegistry, ProducerRegistryBuilder};
pub use resolver::AsyncHandleResolver;
pub use types::{BeanTypes, Instance, Qualifier, QualifierSet, TypeTag};

// Re-exported so that registration hooks can name the slice crate.
pub use linkme;

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        AsyncHandle, AsyncHandleResolver, BeanTypes, Cause, ComponentDef, Container,
        QualifierSet, ResolveError, Scope, StaticContainer, TypeTag, WorkerExecutor,
    };
}
