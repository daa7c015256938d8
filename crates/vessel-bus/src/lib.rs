//! # Vessel Bus
//!
//! Address-based messaging and observer dispatch for the Vessel framework.
//!
//! This layer provides:
//! - An [`EventBus`] abstraction with an in-process implementation ([`LocalEventBus`])
//! - Observers bound to addresses ([`Observer`], [`ObserverRegistry`])
//! - Per-message dispatch state ([`EventContext`])
//! - The bridge turning inbound messages into observer dispatch ([`MessageDispatchBridge`])
//! - A request/reply client ([`ServiceProxy`])
//!
//! ```text
//! ┌─────────┐  message  ┌────────────┐  worker pool  ┌──────────┐
//! │   Bus   │──────────▶│   Bridge   │──────────────▶│ Observer │─┐
//! │         │◀──────────│            │               │ Observer │◀┘
//! └─────────┘   reply   └────────────┘               └──────────┘
//! ```

pub mod bridge;
pub mod bus;
pub mod context;
pub mod error;
pub mod message;
pub mod observer;
pub mod proxy;

pub use bridge::{DispatchOutcome, MessageDispatchBridge, OBSERVER_FAILURE_CODE};
pub use bus::{EventBus, LocalEventBus, MessageHandler, REPLY_ADDRESS_PREFIX, Subscription};
pub use context::{EventContext, Failure, OutboundMessage};
pub use error::{BusError, BusFailure, BusResult, FailureKind};
pub use message::{Body, DEFAULT_SEND_TIMEOUT, DeliveryOptions, Headers, Message};
pub use observer::{
    Dispatch, OBSERVERS, Observer, ObserverList, ObserverRegistry, ObserverRegistryBuilder,
};
pub use proxy::ServiceProxy;

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        Body, DeliveryOptions, Dispatch, EventBus, EventContext, Headers, Message, Observer,
        ObserverRegistryBuilder, ServiceProxy,
    };
}
