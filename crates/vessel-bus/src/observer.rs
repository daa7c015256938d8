//! Observers and the registry that binds them to bus addresses.
//!
//! An [`Observer`] inspects an [`EventContext`] and returns a [`Dispatch`]
//! decision: let the next observer run, or stop with a reply or a failure.
//! Observers are collected per address in an [`ObserverRegistryBuilder`],
//! explicitly or through the [`OBSERVERS`] distributed slice, and sealed into an
//! immutable [`ObserverRegistry`] before consumers are subscribed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use linkme::distributed_slice;
use tracing::debug;
use vessel_core::BoxError;

use crate::context::EventContext;
use crate::message::Body;

/// Registration hooks discovered at link time.
#[distributed_slice]
pub static OBSERVERS: [fn(&mut ObserverRegistryBuilder)];

/// What dispatch should do after an observer returns.
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// Hand the message to the next observer.
    Continue,
    /// Stop dispatch and reply with the given payload.
    Reply(Body),
    /// Stop dispatch and fail the message.
    Fail { code: i32, message: String },
}

impl Dispatch {
    pub fn reply(body: impl Into<Body>) -> Self {
        Self::Reply(body.into())
    }

    pub fn fail(code: i32, message: impl Into<String>) -> Self {
        Self::Fail {
            code,
            message: message.into(),
        }
    }
}

/// A callback attached to a bus address.
///
/// Observers run on a worker thread and may block. Returning `Err` (or
/// panicking) fails the message with the observer failure code.
pub trait Observer: Send + Sync + 'static {
    fn observe(&self, ctx: &mut EventContext) -> Result<Dispatch, BoxError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> Observer for F
where
    F: Fn(&mut EventContext) -> Result<Dispatch, BoxError> + Send + Sync + 'static,
{
    fn observe(&self, ctx: &mut EventContext) -> Result<Dispatch, BoxError> {
        self(ctx)
    }
}

/// Observers of one address, in registration order.
pub type ObserverList = Arc<[Arc<dyn Observer>]>;

// =============================================================================
// Builder
// =============================================================================

/// Mutable observer registry used during bootstrap.
#[derive(Default)]
pub struct ObserverRegistryBuilder {
    observers: Vec<(String, Arc<dyn Observer>)>,
}

impl ObserverRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `observer` to `address`.
    pub fn observe<O: Observer>(&mut self, address: impl Into<String>, observer: O) -> &mut Self {
        let address = address.into();
        debug!(address = %address, observer = observer.name(), "Registered observer");
        self.observers.push((address, Arc::new(observer)));
        self
    }

    /// Attaches a closure to `address`.
    pub fn observe_fn<F>(&mut self, address: impl Into<String>, observer: F) -> &mut Self
    where
        F: Fn(&mut EventContext) -> Result<Dispatch, BoxError> + Send + Sync + 'static,
    {
        self.observe(address, observer)
    }

    /// Runs every hook in [`OBSERVERS`].
    pub fn scan(&mut self) -> &mut Self {
        for hook in OBSERVERS {
            hook(self);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Groups observers by address, preserving registration order.
    pub fn seal(self) -> ObserverRegistry {
        let mut grouped: BTreeMap<String, Vec<Arc<dyn Observer>>> = BTreeMap::new();
        for (address, observer) in self.observers {
            grouped.entry(address).or_default().push(observer);
        }
        ObserverRegistry {
            by_address: Arc::new(
                grouped
                    .into_iter()
                    .map(|(address, list)| (address, ObserverList::from(list)))
                    .collect(),
            ),
        }
    }
}

// =============================================================================
// Sealed registry
// =============================================================================

/// Immutable mapping from address to its observers.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    by_address: Arc<BTreeMap<String, ObserverList>>,
}

impl ObserverRegistry {
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.by_address.keys().map(String::as_str)
    }

    pub fn observers_for(&self, address: &str) -> Option<&ObserverList> {
        self.by_address.get(address)
    }

    /// Number of distinct addresses.
    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ObserverList)> {
        self.by_address.iter().map(|(a, l)| (a.as_str(), l))
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.by_address.iter().map(|(a, l)| (a, l.len())))
            .finish()
    }
}
