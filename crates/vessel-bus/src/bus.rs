//! The event bus abstraction and its in-process implementation.
//!
//! Addresses are plain strings. A point-to-point [`send`](EventBus::send)
//! reaches one consumer (round-robin across consumers of the address), while
//! [`publish`](EventBus::publish) reaches all of them. A
//! [`request`](EventBus::request) attaches a one-shot reply address and waits
//! for the consumer to [`respond`](EventBus::respond).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{BusError, BusFailure, BusResult};
use crate::message::{Body, DeliveryOptions, Message};

/// Prefix of generated reply addresses.
pub const REPLY_ADDRESS_PREFIX: &str = "__vessel.reply.";

/// Callback invoked for every message delivered to a consumer.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Token returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: u64,
    address: String,
}

impl Subscription {
    pub fn new(id: u64, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

/// An address-based message bus.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    /// Delivers to one consumer, without expecting a reply.
    fn send(&self, address: &str, body: Body, options: DeliveryOptions);

    /// Delivers to every consumer of `address`.
    fn publish(&self, address: &str, body: Body, options: DeliveryOptions);

    /// Delivers to one consumer and waits for its reply.
    async fn request(
        &self,
        address: &str,
        body: Body,
        options: DeliveryOptions,
    ) -> Result<Message, BusFailure>;

    /// Answers a pending request. Replies to unknown or expired reply
    /// addresses are dropped.
    fn respond(&self, reply_address: &str, reply: Result<Body, BusFailure>);

    /// Registers a consumer. Completes once the consumer is reachable.
    async fn subscribe(&self, address: &str, handler: MessageHandler) -> BusResult<Subscription>;

    /// Removes a consumer; returns `false` if it was not registered.
    fn unsubscribe(&self, subscription: &Subscription) -> bool;
}

// =============================================================================
// LocalEventBus
// =============================================================================

#[derive(Default)]
struct Consumers {
    handlers: Vec<(u64, MessageHandler)>,
    cursor: AtomicUsize,
}

impl Consumers {
    fn next(&self) -> Option<MessageHandler> {
        if self.handlers.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.handlers.len();
        Some(Arc::clone(&self.handlers[index].1))
    }
}

type ReplySender = oneshot::Sender<Result<Message, BusFailure>>;

struct Inner {
    runtime: Handle,
    consumers: RwLock<HashMap<String, Consumers>>,
    replies: Mutex<HashMap<String, ReplySender>>,
    next_id: AtomicU64,
}

impl Inner {
    fn next_consumer(&self, address: &str) -> Option<MessageHandler> {
        self.consumers.read().get(address).and_then(Consumers::next)
    }

    fn all_consumers(&self, address: &str) -> Vec<MessageHandler> {
        self.consumers
            .read()
            .get(address)
            .map(|c| c.handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    fn deliver(&self, handler: MessageHandler, message: Message) {
        self.runtime.spawn(async move { handler(message) });
    }
}

/// In-process [`EventBus`] delivering messages on a Tokio runtime.
///
/// Consumer callbacks are invoked on the runtime given at construction, which
/// is normally the event loop.
#[derive(Clone)]
pub struct LocalEventBus {
    inner: Arc<Inner>,
}

impl LocalEventBus {
    pub fn new(runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime,
                consumers: RwLock::new(HashMap::new()),
                replies: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Number of consumers registered at `address`.
    pub fn consumer_count(&self, address: &str) -> usize {
        self.inner
            .consumers
            .read()
            .get(address)
            .map_or(0, |c| c.handlers.len())
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_replies(&self) -> usize {
        self.inner.replies.lock().len()
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    fn send(&self, address: &str, body: Body, options: DeliveryOptions) {
        match self.inner.next_consumer(address) {
            Some(handler) => {
                let message = Message::new(address, body).with_headers(options.headers);
                self.inner.deliver(handler, message);
            }
            None => debug!(address, "No handlers for address, message dropped"),
        }
    }

    fn publish(&self, address: &str, body: Body, options: DeliveryOptions) {
        let handlers = self.inner.all_consumers(address);
        trace!(address, consumers = handlers.len(), "Publishing message");
        for handler in handlers {
            let message = Message::new(address, body.clone()).with_headers(options.headers.clone());
            self.inner.deliver(handler, message);
        }
    }

    async fn request(
        &self,
        address: &str,
        body: Body,
        options: DeliveryOptions,
    ) -> Result<Message, BusFailure> {
        let Some(handler) = self.inner.next_consumer(address) else {
            return Err(BusFailure::no_handlers(address));
        };

        let reply_address = format!("{REPLY_ADDRESS_PREFIX}{}", Uuid::new_v4());
        let (tx, rx) = oneshot::channel();
        self.inner.replies.lock().insert(reply_address.clone(), tx);

        let message = Message::new(address, body)
            .with_headers(options.headers)
            .with_reply_address(reply_address.clone());
        self.inner.deliver(handler, message);

        match tokio::time::timeout(options.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) | Err(_) => {
                self.inner.replies.lock().remove(&reply_address);
                Err(BusFailure::timeout(address, options.timeout))
            }
        }
    }

    fn respond(&self, reply_address: &str, reply: Result<Body, BusFailure>) {
        let Some(tx) = self.inner.replies.lock().remove(reply_address) else {
            debug!(reply_address, "Reply address unknown or expired, reply dropped");
            return;
        };
        let reply = reply.map(|body| Message::new(reply_address, body));
        if tx.send(reply).is_err() {
            trace!(reply_address, "Requester went away before the reply arrived");
        }
    }

    async fn subscribe(&self, address: &str, handler: MessageHandler) -> BusResult<Subscription> {
        if address.is_empty() {
            return Err(BusError::SubscriptionFailed {
                address: address.to_string(),
                reason: "address must not be empty".to_string(),
            });
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .consumers
            .write()
            .entry(address.to_string())
            .or_default()
            .handlers
            .push((id, handler));
        debug!(address, id, "Consumer registered");
        Ok(Subscription::new(id, address))
    }

    fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut consumers = self.inner.consumers.write();
        let Some(group) = consumers.get_mut(subscription.address()) else {
            return false;
        };
        let before = group.handlers.len();
        group.handlers.retain(|(id, _)| *id != subscription.id());
        let removed = group.handlers.len() != before;
        if group.handlers.is_empty() {
            consumers.remove(subscription.address());
        }
        removed
    }
}
