//! Runtime orchestration.
//!
//! A [`VesselRuntime`] owns the event loop, the sealed producer and observer
//! registries, the resolver and the bus. Startup follows a fixed sequence:
//!
//! 1. Load and validate configuration, initialize logging
//! 2. Spawn the event loop
//! 3. Collect producers and observers (programmatic + link-time hooks), then seal
//! 4. [`start`](VesselRuntime::start): subscribe one [`MessageDispatchBridge`]
//!    per observed address and wait for every subscription to be confirmed
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use vessel_runtime::VesselRuntime;
//!
//! let runtime = VesselRuntime::builder()
//!     .config_file("config/vessel.toml")
//!     .observe_fn("ping", |ctx| Ok(Dispatch::reply("pong")))
//!     .build()?;
//!
//! runtime.run().await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parking_lot::Mutex;
use tokio::signal;
use tracing::{debug, error, info, instrument, warn};
use vessel_bus::{
    Dispatch, EventBus, EventContext, LocalEventBus, MessageDispatchBridge, Observer,
    ObserverRegistry, ObserverRegistryBuilder, ServiceProxy, Subscription,
};
use vessel_core::{
    AsyncHandleResolver, BoxError, Container, EventLoop, ExecutorStats, ProducerRegistryBuilder,
    StaticContainer, WorkerExecutor,
};

use crate::config::{ConfigLoader, VesselConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// Snapshot of runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Addresses with at least one observer.
    pub addresses: usize,
    /// Subscriptions currently held on the bus.
    pub subscriptions: usize,
    /// Registered producer entries.
    pub producers: usize,
    pub executor: ExecutorStats,
}

/// The assembled runtime.
pub struct VesselRuntime {
    config: VesselConfig,
    event_loop: Mutex<Option<EventLoop>>,
    executor: WorkerExecutor,
    bus: Arc<dyn EventBus>,
    resolver: Arc<AsyncHandleResolver>,
    observers: ObserverRegistry,
    subscriptions: Mutex<Vec<Subscription>>,
    running: AtomicBool,
}

impl VesselRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn config(&self) -> &VesselConfig {
        &self.config
    }

    /// Resolver backed by the sealed producer registry and the container.
    pub fn resolver(&self) -> &Arc<AsyncHandleResolver> {
        &self.resolver
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    /// Executor bound to the runtime's event loop.
    pub fn executor(&self) -> &WorkerExecutor {
        &self.executor
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Creates a proxy for `address` using the configured default timeout.
    pub fn service_proxy(&self, address: impl Into<String>) -> ServiceProxy {
        ServiceProxy::new(address, Arc::clone(&self.bus), self.executor.clone())
            .with_delivery_options(self.config.bus.delivery_options())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            addresses: self.observers.len(),
            subscriptions: self.subscriptions.lock().len(),
            producers: self.resolver.producers().len(),
            executor: self.executor.stats(),
        }
    }

    /// Subscribes a dispatch bridge for every observed address.
    ///
    /// Waits at most `bootstrap.registration_timeout_ms` for all subscriptions
    /// to be confirmed. On failure every subscription made so far is removed
    /// and the runtime stays stopped.
    #[instrument(skip_all, fields(addresses = self.observers.len()))]
    pub async fn start(&self) -> RuntimeResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Runtime is already running");
            return Ok(());
        }

        let timeout = self.config.bootstrap.registration_timeout();
        let total = self.observers.len();

        let mut pending: FuturesUnordered<_> = self
            .observers
            .iter()
            .map(|(address, observers)| {
                let bridge = MessageDispatchBridge::new(
                    address,
                    Arc::clone(observers),
                    Arc::clone(&self.bus),
                    self.executor.clone(),
                    self.config.bus.delivery_options(),
                );
                let bus = Arc::clone(&self.bus);
                async move {
                    let address = bridge.address().to_string();
                    let subscribed = bus.subscribe(&address, bridge.handler()).await;
                    subscribed.map_err(|source| RuntimeError::Subscription { address, source })
                }
            })
            .collect();

        let mut registered = Vec::with_capacity(total);
        let confirmed = tokio::time::timeout(timeout, async {
            while let Some(subscription) = pending.next().await {
                let subscription = subscription?;
                debug!(address = subscription.address(), "Message consumer registered");
                registered.push(subscription);
            }
            Ok::<_, RuntimeError>(())
        })
        .await;
        drop(pending);

        let failure = match confirmed {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(RuntimeError::SubscriptionTimeout {
                registered: registered.len(),
                total,
                timeout_ms: self.config.bootstrap.registration_timeout_ms,
            }),
        };

        if let Some(e) = failure {
            error!(error = %e, "Startup aborted");
            for subscription in &registered {
                self.bus.unsubscribe(subscription);
            }
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        *self.subscriptions.lock() = registered;
        info!(
            addresses = total,
            producers = self.resolver.producers().len(),
            "Runtime started"
        );
        Ok(())
    }

    /// Removes all subscriptions. The event loop keeps running.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Runtime is not running");
            return;
        }

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in &subscriptions {
            if !self.bus.unsubscribe(subscription) {
                warn!(address = subscription.address(), "Subscription was already removed");
            }
        }
        info!(removed = subscriptions.len(), "Runtime stopped");
    }

    /// Stops the runtime and its event loop.
    ///
    /// Blocking work still running on the worker pool is given a short grace
    /// period before the loop thread exits.
    pub fn shutdown(&self) {
        self.stop();
        if let Some(event_loop) = self.event_loop.lock().take() {
            event_loop.shutdown();
        }
    }

    /// Starts, then runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("Vessel runtime is now running. Press Ctrl+C to stop.");
        wait_for_shutdown().await;
        self.shutdown();
        Ok(())
    }

    /// Starts, then runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.shutdown();
        Ok(())
    }
}

impl std::fmt::Debug for VesselRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VesselRuntime")
            .field("running", &self.is_running())
            .field("observers", &self.observers)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                wait_for_ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for [`VesselRuntime`].
///
/// Producers and observers added here are combined with those contributed by
/// link-time registration hooks unless scanning is disabled.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    config: Option<VesselConfig>,
    container: Option<Arc<dyn Container>>,
    producers: ProducerRegistryBuilder,
    observers: ObserverRegistryBuilder,
    bus: Option<Arc<dyn EventBus>>,
    scan: Option<bool>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            config: None,
            container: None,
            producers: ProducerRegistryBuilder::new(),
            observers: ObserverRegistryBuilder::new(),
            bus: None,
            scan: None,
        }
    }

    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Layers `config` into the loader; files and environment still apply.
    pub fn merge(mut self, config: VesselConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `config` as is, skipping files and environment.
    pub fn config(mut self, config: VesselConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Container consulted when no producer matches. Defaults to an empty
    /// [`StaticContainer`].
    pub fn container(mut self, container: Arc<dyn Container>) -> Self {
        self.container = Some(container);
        self
    }

    pub fn configure_producers<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(&mut ProducerRegistryBuilder),
    {
        configure(&mut self.producers);
        self
    }

    pub fn observe<O: Observer>(mut self, address: impl Into<String>, observer: O) -> Self {
        self.observers.observe(address, observer);
        self
    }

    pub fn observe_fn<F>(mut self, address: impl Into<String>, observer: F) -> Self
    where
        F: Fn(&mut EventContext) -> Result<Dispatch, BoxError> + Send + Sync + 'static,
    {
        self.observers.observe_fn(address, observer);
        self
    }

    /// Uses `bus` instead of an in-process [`LocalEventBus`].
    pub fn bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Overrides `bootstrap.scan`.
    pub fn scan(mut self, enabled: bool) -> Self {
        self.scan = Some(enabled);
        self
    }

    pub fn build(self) -> RuntimeResult<VesselRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => self.config_loader.load()?,
        };
        validate_config(&config)?;
        logging::init_from_config(&config.logging);

        let event_loop = EventLoop::spawn(&config.executor.to_executor_config())?;
        let executor = event_loop.executor().clone();

        let mut producers = self.producers;
        let mut observers = self.observers;
        if self.scan.unwrap_or(config.bootstrap.scan) {
            producers.scan();
            observers.scan();
        }
        let producers = producers.seal();
        let observers = observers.seal();

        let bus = self
            .bus
            .unwrap_or_else(|| Arc::new(LocalEventBus::new(executor.handle().clone())));
        let container = self
            .container
            .unwrap_or_else(|| Arc::new(StaticContainer::new()));
        let resolver = Arc::new(AsyncHandleResolver::new(
            producers,
            container,
            executor.clone(),
        ));

        info!(
            log_level = %config.logging.level,
            worker_pool_size = config.executor.worker_pool_size,
            producers = resolver.producers().len(),
            addresses = observers.len(),
            "Runtime initialized from configuration"
        );

        Ok(VesselRuntime {
            config,
            event_loop: Mutex::new(Some(event_loop)),
            executor,
            bus,
            resolver,
            observers,
            subscriptions: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
