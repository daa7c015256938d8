//! Client-side proxy for request/reply services on the bus.

use std::sync::Arc;

use vessel_core::{AsyncHandle, WorkerExecutor};

use crate::bus::EventBus;
use crate::error::BusFailure;
use crate::message::{Body, DeliveryOptions, Message};

/// Sends requests to one service address.
///
/// [`call`](Self::call) exposes the reply as an [`AsyncHandle`] completed on
/// the event loop. [`call_with`](Self::call_with) hands the reply to a callback
/// that runs on the worker pool, so it may block.
#[derive(Clone)]
pub struct ServiceProxy {
    address: String,
    options: DeliveryOptions,
    bus: Arc<dyn EventBus>,
    executor: WorkerExecutor,
}

impl ServiceProxy {
    pub fn new(address: impl Into<String>, bus: Arc<dyn EventBus>, executor: WorkerExecutor) -> Self {
        Self {
            address: address.into(),
            options: DeliveryOptions::default(),
            bus,
            executor,
        }
    }

    pub fn with_delivery_options(mut self, options: DeliveryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn delivery_options(&self) -> &DeliveryOptions {
        &self.options
    }

    /// Sends a request and returns the reply as a handle.
    pub fn call(&self, body: impl Into<Body>) -> AsyncHandle<Message> {
        let bus = Arc::clone(&self.bus);
        let address = self.address.clone();
        let options = self.options.clone();
        let body = body.into();
        self.executor.run_async(async move {
            bus.request(&address, body, options).await.map_err(Into::into)
        })
    }

    /// Sends a request; `on_reply` runs on the worker pool.
    pub fn call_with<F>(&self, body: impl Into<Body>, on_reply: F)
    where
        F: FnOnce(Result<Message, BusFailure>) + Send + 'static,
    {
        let bus = Arc::clone(&self.bus);
        let executor = self.executor.clone();
        let address = self.address.clone();
        let options = self.options.clone();
        let body = body.into();
        self.executor.handle().spawn(async move {
            let reply = bus.request(&address, body, options).await;
            executor.run_blocking(move || {
                on_reply(reply);
                Ok(())
            });
        });
    }
}

impl std::fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("address", &self.address)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
