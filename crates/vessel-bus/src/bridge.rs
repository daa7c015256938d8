//! Bridges bus messages into observer dispatch.
//!
//! For every inbound message the [`MessageDispatchBridge`]:
//!
//! 1. Wraps the message in an [`EventContext`]
//! 2. Runs the address's observers in registration order on a worker thread
//! 3. Stops early when an observer returns [`Dispatch::Reply`] or [`Dispatch::Fail`]
//! 4. Back on the event loop, answers the requester with the reply or failure
//!
//! A failure marker always takes precedence over a reply. Observer errors and
//! panics fail the message with [`OBSERVER_FAILURE_CODE`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{Level, debug, error, span, warn};
use vessel_core::{AsyncHandle, WorkerExecutor, panic_message};

use crate::bus::{EventBus, MessageHandler};
use crate::context::EventContext;
use crate::error::BusFailure;
use crate::message::{Body, DeliveryOptions, Message};
use crate::observer::{Dispatch, ObserverList};

/// Failure code sent when an observer errors or panics.
pub const OBSERVER_FAILURE_CODE: i32 = 0x1B00;

/// Final result of dispatching one message.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// Dispatch finished without a failure; the body is empty if no observer
    /// set a reply.
    Replied(Body),
    /// An observer set a failure marker or aborted with a failure.
    Failed { code: i32, message: String },
    /// An observer returned an error or panicked.
    Faulted { message: String },
}

impl DispatchOutcome {
    /// Failure code carried to the requester, if any.
    pub fn failure_code(&self) -> Option<i32> {
        match self {
            Self::Replied(_) => None,
            Self::Failed { code, .. } => Some(*code),
            Self::Faulted { .. } => Some(OBSERVER_FAILURE_CODE),
        }
    }

    /// Converts the outcome into what the requester receives.
    pub fn into_reply(self) -> Result<Body, BusFailure> {
        match self {
            Self::Replied(body) => Ok(body),
            Self::Failed { code, message } => Err(BusFailure::recipient(code, message)),
            Self::Faulted { message } => Err(BusFailure::recipient(OBSERVER_FAILURE_CODE, message)),
        }
    }
}

/// Consumer that fans one address's messages out to its observers.
pub struct MessageDispatchBridge {
    address: String,
    observers: ObserverList,
    bus: Arc<dyn EventBus>,
    executor: WorkerExecutor,
    delivery: DeliveryOptions,
}

impl MessageDispatchBridge {
    /// Creates a bridge; `delivery` seeds the options of messages observers
    /// send through [`EventContext::message_to`].
    pub fn new(
        address: impl Into<String>,
        observers: ObserverList,
        bus: Arc<dyn EventBus>,
        executor: WorkerExecutor,
        delivery: DeliveryOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            address: address.into(),
            observers,
            bus,
            executor,
            delivery,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns a bus consumer callback driving this bridge.
    pub fn handler(self: &Arc<Self>) -> MessageHandler {
        let bridge = Arc::clone(self);
        Arc::new(move |message: Message| {
            bridge.handle(message);
        })
    }

    /// Dispatches one message.
    ///
    /// Returns immediately; the handle completes after the requester has been
    /// answered.
    pub fn handle(&self, message: Message) -> AsyncHandle<DispatchOutcome> {
        let reply_address = message.reply_address().map(str::to_owned);
        let ctx = EventContext::new(message, Arc::clone(&self.bus), self.executor.clone())
            .with_delivery_options(self.delivery.clone());

        let address = self.address.clone();
        let observers = Arc::clone(&self.observers);
        let dispatched = self
            .executor
            .run_blocking(move || Ok(run_observers(&address, &observers, ctx)));

        let (handle, completer) = AsyncHandle::pending();
        let bus = Arc::clone(&self.bus);
        let address = self.address.clone();
        dispatched.when_complete(move |result| {
            let outcome = match result {
                Ok(outcome) => outcome.clone(),
                Err(cause) => DispatchOutcome::Faulted {
                    message: cause.to_string(),
                },
            };
            transmit(bus.as_ref(), &address, reply_address.as_deref(), &outcome);
            completer.succeed(outcome);
        });
        handle
    }
}

impl std::fmt::Debug for MessageDispatchBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDispatchBridge")
            .field("address", &self.address)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

/// Runs observers sequentially on the current (worker) thread.
fn run_observers(address: &str, observers: &ObserverList, mut ctx: EventContext) -> DispatchOutcome {
    let span = span!(Level::DEBUG, "dispatch", address = %address, observers = observers.len());
    let _enter = span.enter();

    for observer in observers.iter() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| observer.observe(&mut ctx)));
        match result {
            Ok(Ok(Dispatch::Continue)) => {}
            Ok(Ok(Dispatch::Reply(body))) => {
                debug!(observer = observer.name(), "Observer replied, dispatch stopped");
                ctx.set_reply(body);
                break;
            }
            Ok(Ok(Dispatch::Fail { code, message })) => {
                debug!(observer = observer.name(), code, "Observer failed the message, dispatch stopped");
                ctx.set_failure(code, message);
                break;
            }
            Ok(Err(e)) => {
                error!(observer = observer.name(), error = %e, "Observer raised an error");
                return DispatchOutcome::Faulted {
                    message: e.to_string(),
                };
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(observer = observer.name(), panic = %message, "Observer panicked");
                return DispatchOutcome::Faulted { message };
            }
        }
    }

    match ctx.take_outcome() {
        (_, Some(failure)) => DispatchOutcome::Failed {
            code: failure.code,
            message: failure.message,
        },
        (reply, None) => DispatchOutcome::Replied(reply.unwrap_or_default()),
    }
}

/// Sends the outcome to the requester, if there is one.
fn transmit(bus: &dyn EventBus, address: &str, reply_address: Option<&str>, outcome: &DispatchOutcome) {
    let Some(reply_address) = reply_address else {
        if let Some(code) = outcome.failure_code() {
            warn!(address, code, "Message failed but has no reply address");
        } else {
            debug!(address, "No reply address, outcome not transmitted");
        }
        return;
    };
    bus.respond(reply_address, outcome.clone().into_reply());
}

#[cfg(test)]
mod tests {
    use std::sync::{Barrier, Mutex};
    use std::time::Duration;

    use tokio::runtime::Handle;

    use super::*;
    use crate::bus::LocalEventBus;
    use crate::error::FailureKind;
    use crate::message::DeliveryOptions;
    use crate::observer::ObserverRegistryBuilder;

    async fn bridge_for(builder: ObserverRegistryBuilder, address: &str) -> LocalEventBus {
        let bus = LocalEventBus::new(Handle::current());
        let shared: Arc<dyn EventBus> = Arc::new(bus.clone());
        let registry = builder.seal();
        let observers = registry.observers_for(address).cloned().unwrap();
        let bridge = MessageDispatchBridge::new(
            address,
            observers,
            shared,
            WorkerExecutor::current(),
            DeliveryOptions::default(),
        );
        bus.subscribe(address, bridge.handler()).await.unwrap();
        bus
    }

    #[tokio::test]
    async fn test_observers_run_in_order_and_last_reply_wins() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut builder = ObserverRegistryBuilder::new();
        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            builder.observe_fn("ordered", move |ctx| {
                order.lock().unwrap().push(tag);
                ctx.set_reply(tag);
                Ok(Dispatch::Continue)
            });
        }
        let bus = bridge_for(builder, "ordered").await;

        let reply = bus
            .request("ordered", Body::from("go"), DeliveryOptions::default())
            .await
            .unwrap();

        assert_eq!(reply.body().as_str(), Some("third"));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_abort_with_failure_skips_remaining_observers() {
        let reached = Arc::new(Mutex::new(false));
        let mut builder = ObserverRegistryBuilder::new();
        builder.observe_fn("guarded", |_ctx| Ok(Dispatch::fail(10, "boom")));
        let flag = Arc::clone(&reached);
        builder.observe_fn("guarded", move |_ctx| {
            *flag.lock().unwrap() = true;
            Ok(Dispatch::Continue)
        });
        let bus = bridge_for(builder, "guarded").await;

        let failure = bus
            .request("guarded", Body::empty(), DeliveryOptions::default())
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), FailureKind::Recipient);
        assert_eq!(failure.code(), 10);
        assert_eq!(failure.message(), "boom");
        assert!(!*reached.lock().unwrap());
    }

    #[tokio::test]
    async fn test_abort_with_reply() {
        let mut builder = ObserverRegistryBuilder::new();
        builder
            .observe_fn("ping", |ctx| {
                assert_eq!(ctx.body().as_str(), Some("ping"));
                Ok(Dispatch::reply("pong"))
            })
            .observe_fn("ping", |_ctx| Ok(Dispatch::reply("never")));
        let bus = bridge_for(builder, "ping").await;

        let reply = bus
            .request("ping", Body::from("ping"), DeliveryOptions::default())
            .await
            .unwrap();
        assert_eq!(reply.body().as_str(), Some("pong"));
    }

    #[tokio::test]
    async fn test_failure_marker_beats_reply() {
        let mut builder = ObserverRegistryBuilder::new();
        builder
            .observe_fn("mixed", |ctx| {
                ctx.set_failure(7, "rejected");
                Ok(Dispatch::Continue)
            })
            .observe_fn("mixed", |ctx| {
                ctx.set_reply("accepted");
                Ok(Dispatch::Continue)
            });
        let bus = bridge_for(builder, "mixed").await;

        let failure = bus
            .request("mixed", Body::empty(), DeliveryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(failure.code(), 7);
        assert_eq!(failure.message(), "rejected");
    }

    #[tokio::test]
    async fn test_observer_error_and_panic_use_failure_code() {
        let mut builder = ObserverRegistryBuilder::new();
        builder.observe_fn("erroring", |_ctx| Err("disk full".into()));
        builder.observe_fn("panicking", |_ctx| panic!("observer exploded"));
        let registry = builder.seal();

        let bus = LocalEventBus::new(Handle::current());
        let shared: Arc<dyn EventBus> = Arc::new(bus.clone());
        for address in ["erroring", "panicking"] {
            let observers = registry.observers_for(address).cloned().unwrap();
            let bridge = MessageDispatchBridge::new(
                address,
                observers,
                Arc::clone(&shared),
                WorkerExecutor::current(),
                DeliveryOptions::default(),
            );
            bus.subscribe(address, bridge.handler()).await.unwrap();
        }

        let failure = bus
            .request("erroring", Body::empty(), DeliveryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(failure.code(), OBSERVER_FAILURE_CODE);
        assert_eq!(failure.message(), "disk full");

        let failure = bus
            .request("panicking", Body::empty(), DeliveryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(failure.code(), 0x1B00);
        assert_eq!(failure.message(), "observer exploded");
    }

    #[tokio::test]
    async fn test_no_reply_address_runs_every_observer_and_warns_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut builder = ObserverRegistryBuilder::new();
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            builder.observe_fn("fire-and-forget", move |ctx| {
                let warned_before = ctx.unreplyable_warned();
                ctx.set_reply(tag);
                seen.lock().unwrap().push((tag, warned_before, ctx.unreplyable_warned()));
                Ok(Dispatch::Continue)
            });
        }
        let registry = builder.seal();

        let bus = LocalEventBus::new(Handle::current());
        let shared: Arc<dyn EventBus> = Arc::new(bus.clone());
        let bridge = MessageDispatchBridge::new(
            "fire-and-forget",
            registry.observers_for("fire-and-forget").cloned().unwrap(),
            shared,
            WorkerExecutor::current(),
            DeliveryOptions::default(),
        );

        let outcome = bridge
            .handle(Message::new("fire-and-forget", "data"))
            .wait()
            .await
            .unwrap();

        match outcome {
            DispatchOutcome::Replied(body) => assert_eq!(body.as_str(), Some("third")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", false, true), ("second", true, true), ("third", true, true)]
        );
        assert_eq!(bus.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_outbound_messages_use_bridge_delivery_options() {
        let mut builder = ObserverRegistryBuilder::new();
        builder.observe_fn("relay", |ctx| {
            let forwarded = ctx.message_to("black-hole").request(ctx.body().clone());
            let (tx, rx) = std::sync::mpsc::channel();
            forwarded.when_complete(move |outcome| {
                let _ = tx.send(outcome.as_ref().err().map(ToString::to_string));
            });
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(Some(reason)) => Ok(Dispatch::reply(reason)),
                Ok(None) => Ok(Dispatch::fail(1, "unexpected reply")),
                Err(_) => Ok(Dispatch::fail(2, "forwarded request never timed out")),
            }
        });
        let registry = builder.seal();

        let bus = LocalEventBus::new(Handle::current());
        bus.subscribe("black-hole", Arc::new(|_: Message| {})).await.unwrap();
        let shared: Arc<dyn EventBus> = Arc::new(bus.clone());
        let bridge = MessageDispatchBridge::new(
            "relay",
            registry.observers_for("relay").cloned().unwrap(),
            shared,
            WorkerExecutor::current(),
            DeliveryOptions::default().with_timeout(Duration::from_millis(50)),
        );
        bus.subscribe("relay", bridge.handler()).await.unwrap();

        let reply = bus
            .request("relay", Body::from("hello"), DeliveryOptions::default())
            .await
            .unwrap();
        assert!(reply.body().as_str().is_some_and(|reason| reason.contains("timed out")));
    }

    #[tokio::test]
    async fn test_messages_dispatch_concurrently() {
        let barrier = Arc::new(Barrier::new(2));
        let mut builder = ObserverRegistryBuilder::new();
        builder.observe_fn("rendezvous", move |ctx| {
            barrier.wait();
            Ok(Dispatch::reply(ctx.body().as_str().unwrap_or_default().to_string()))
        });
        let bus = bridge_for(builder, "rendezvous").await;

        let options = DeliveryOptions::default().with_timeout(Duration::from_secs(5));
        let (a, b) = tokio::join!(
            bus.request("rendezvous", Body::from("a"), options.clone()),
            bus.request("rendezvous", Body::from("b"), options),
        );
        assert_eq!(a.unwrap().body().as_str(), Some("a"));
        assert_eq!(b.unwrap().body().as_str(), Some("b"));
    }
}
