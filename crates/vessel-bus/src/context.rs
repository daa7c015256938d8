//! Per-message state shared by all observers of one delivery.
//!
//! An [`EventContext`] wraps the inbound message and carries the reply and
//! failure markers observers set while dispatch is in progress. It is owned by
//! a single dispatch and handed to observers one at a time.

use std::sync::Arc;

use tracing::warn;
use vessel_core::{AsyncHandle, WorkerExecutor};

use crate::bus::EventBus;
use crate::error::BusFailure;
use crate::message::{Body, DeliveryOptions, Headers, Message};

/// Failure marker set by an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub code: i32,
    pub message: String,
}

/// Message payload plus mutable dispatch state.
pub struct EventContext {
    address: String,
    headers: Headers,
    body: Body,
    reply_address: Option<String>,
    reply: Option<Body>,
    failure: Option<Failure>,
    warned_unreplyable: bool,
    delivery: DeliveryOptions,
    bus: Arc<dyn EventBus>,
    executor: WorkerExecutor,
}

impl EventContext {
    /// Creates a context whose outbound messages use the default
    /// [`DeliveryOptions`].
    pub fn new(message: Message, bus: Arc<dyn EventBus>, executor: WorkerExecutor) -> Self {
        let (address, headers, body, reply_address) = message.into_parts();
        Self {
            address,
            headers,
            body,
            reply_address,
            reply: None,
            failure: None,
            warned_unreplyable: false,
            delivery: DeliveryOptions::default(),
            bus,
            executor,
        }
    }

    /// Sets the options [`message_to`](Self::message_to) starts from.
    pub fn with_delivery_options(mut self, options: DeliveryOptions) -> Self {
        self.delivery = options;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn reply_address(&self) -> Option<&str> {
        self.reply_address.as_deref()
    }

    /// Returns `true` once a reply was set on a message nobody can answer.
    ///
    /// The warning for that case is logged only on the first such reply.
    pub fn unreplyable_warned(&self) -> bool {
        self.warned_unreplyable
    }

    /// Sets the reply payload.
    ///
    /// The last call wins; an overwrite is logged. Returns `false` if a reply
    /// was already set.
    pub fn set_reply(&mut self, reply: impl Into<Body>) -> bool {
        if self.reply_address.is_none() && !self.warned_unreplyable {
            self.warned_unreplyable = true;
            warn!(
                address = %self.address,
                "Message was sent without a reply address, the reply will be ignored"
            );
        }
        let replaced = self.reply.replace(reply.into());
        if replaced.is_some() {
            warn!(address = %self.address, "Reply already set, overwriting previous reply");
        }
        replaced.is_none()
    }

    /// Returns the current reply payload.
    pub fn reply(&self) -> Option<&Body> {
        self.reply.as_ref()
    }

    pub fn is_replied(&self) -> bool {
        self.reply.is_some()
    }

    /// Marks the message as failed. A later call overwrites the marker.
    pub fn set_failure(&mut self, code: i32, message: impl Into<String>) {
        self.failure = Some(Failure {
            code,
            message: message.into(),
        });
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    pub fn failure_code(&self) -> Option<i32> {
        self.failure.as_ref().map(|f| f.code)
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.message.as_str())
    }

    pub(crate) fn take_outcome(&mut self) -> (Option<Body>, Option<Failure>) {
        (self.reply.take(), self.failure.take())
    }

    /// Starts an outbound message to `address` on the same bus.
    pub fn message_to(&self, address: impl Into<String>) -> OutboundMessage {
        OutboundMessage {
            address: address.into(),
            options: self.delivery.clone(),
            bus: Arc::clone(&self.bus),
            executor: self.executor.clone(),
        }
    }
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("address", &self.address)
            .field("reply_address", &self.reply_address)
            .field("replied", &self.reply.is_some())
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// OutboundMessage
// =============================================================================

/// Fluent builder for messages sent from inside an observer.
pub struct OutboundMessage {
    address: String,
    options: DeliveryOptions,
    bus: Arc<dyn EventBus>,
    executor: WorkerExecutor,
}

impl OutboundMessage {
    pub fn delivery_options(mut self, options: DeliveryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.add(name, value);
        self
    }

    /// Point-to-point send without a reply.
    pub fn send(&self, body: impl Into<Body>) {
        self.bus.send(&self.address, body.into(), self.options.clone());
    }

    /// Point-to-point send; `on_reply` runs on the event loop once the reply
    /// or failure arrives.
    pub fn send_with_reply<F>(&self, body: impl Into<Body>, on_reply: F)
    where
        F: FnOnce(Result<Message, BusFailure>) + Send + 'static,
    {
        let bus = Arc::clone(&self.bus);
        let address = self.address.clone();
        let options = self.options.clone();
        let body = body.into();
        self.executor.handle().spawn(async move {
            on_reply(bus.request(&address, body, options).await);
        });
    }

    /// Point-to-point send exposing the reply as a handle.
    pub fn request(&self, body: impl Into<Body>) -> AsyncHandle<Message> {
        let bus = Arc::clone(&self.bus);
        let address = self.address.clone();
        let options = self.options.clone();
        let body = body.into();
        self.executor.run_async(async move {
            bus.request(&address, body, options).await.map_err(Into::into)
        })
    }

    /// Broadcast to every consumer of the address.
    pub fn publish(&self, body: impl Into<Body>) {
        self.bus.publish(&self.address, body.into(), self.options.clone());
    }
}
