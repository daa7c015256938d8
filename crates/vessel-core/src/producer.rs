//! Registry of asynchronous producers.
//!
//! A producer is a factory that returns an [`AsyncHandle`] for some result type.
//! Producers are collected in a [`ProducerRegistryBuilder`] during bootstrap,
//! either explicitly or through the [`PRODUCERS`] distributed slice, and then
//! sealed into an immutable [`ProducerRegistry`].
//!
//! # Example
//!
//! ```rust,ignore
//! use vessel_core::linkme::distributed_slice;
//! use vessel_core::{PRODUCERS, ProducerRegistryBuilder, QualifierSet};
//!
//! #[distributed_slice(PRODUCERS)]
//! #[linkme(crate = vessel_core::linkme)]
//! static CLOCK: fn(&mut ProducerRegistryBuilder) = |builder| {
//!     builder.producer::<Clock, _>("clock", QualifierSet::new(), |executor| {
//!         executor.run_non_blocking(|| Ok(Arc::new(Clock::default())))
//!     });
//! };
//! ```

use std::fmt;
use std::sync::Arc;

use linkme::distributed_slice;
use tracing::debug;

use crate::executor::WorkerExecutor;
use crate::handle::AsyncHandle;
use crate::types::{BeanTypes, Instance, QualifierSet, TypeTag};

/// Registration hooks discovered at link time.
#[distributed_slice]
pub static PRODUCERS: [fn(&mut ProducerRegistryBuilder)];

/// Type-erased producer factory.
pub type ProducerFn = Arc<dyn Fn(&WorkerExecutor) -> AsyncHandle<Instance> + Send + Sync>;

/// Metadata and factory of one asynchronous producer.
#[derive(Clone)]
pub struct ProducerEntry {
    name: String,
    types: BeanTypes,
    qualifiers: QualifierSet,
    factory: ProducerFn,
}

impl ProducerEntry {
    pub fn new(
        name: impl Into<String>,
        types: BeanTypes,
        qualifiers: QualifierSet,
        factory: ProducerFn,
    ) -> Self {
        Self {
            name: name.into(),
            types,
            qualifiers,
            factory,
        }
    }

    /// A producer matches when its result type is assignable to `required`
    /// and its qualifiers include every requested qualifier.
    pub fn matches(&self, required: &TypeTag, qualifiers: &QualifierSet) -> bool {
        self.types.is_assignable_to(required) && self.qualifiers.contains_all(qualifiers)
    }

    /// Invokes the factory.
    pub fn produce(&self, executor: &WorkerExecutor) -> AsyncHandle<Instance> {
        (self.factory)(executor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn types(&self) -> &BeanTypes {
        &self.types
    }

    pub fn qualifiers(&self) -> &QualifierSet {
        &self.qualifiers
    }
}

impl fmt::Debug for ProducerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerEntry")
            .field("name", &self.name)
            .field("types", &self.types)
            .field("qualifiers", &self.qualifiers)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Mutable registry used during bootstrap.
#[derive(Default)]
pub struct ProducerRegistryBuilder {
    entries: Vec<ProducerEntry>,
}

impl ProducerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pre-built entry.
    pub fn register(&mut self, entry: ProducerEntry) -> &mut Self {
        debug!(
            producer = %entry.name,
            types = ?entry.types,
            qualifiers = %entry.qualifiers,
            "Registered async producer"
        );
        self.entries.push(entry);
        self
    }

    /// Adds a producer whose result type is exactly `T`.
    pub fn producer<T, F>(
        &mut self,
        name: impl Into<String>,
        qualifiers: QualifierSet,
        factory: F,
    ) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&WorkerExecutor) -> AsyncHandle<Arc<T>> + Send + Sync + 'static,
    {
        self.register_typed(name, BeanTypes::of::<T>(), qualifiers, factory)
    }

    /// Adds a producer of `T` that is also assignable to the extra views
    /// declared in `types`.
    pub fn register_typed<T, F>(
        &mut self,
        name: impl Into<String>,
        types: BeanTypes,
        qualifiers: QualifierSet,
        factory: F,
    ) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&WorkerExecutor) -> AsyncHandle<Arc<T>> + Send + Sync + 'static,
    {
        let erased: ProducerFn = Arc::new(move |executor: &WorkerExecutor| {
            factory(executor).then_apply(|value| Instance::new(Arc::clone(value)))
        });
        self.register(ProducerEntry::new(name, types, qualifiers, erased))
    }

    /// Runs every hook in [`PRODUCERS`].
    pub fn scan(&mut self) -> &mut Self {
        for hook in PRODUCERS {
            hook(self);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freezes the registry.
    pub fn seal(self) -> ProducerRegistry {
        ProducerRegistry {
            entries: self.entries.into(),
        }
    }
}

// =============================================================================
// Sealed registry
// =============================================================================

/// Immutable, cheaply cloneable set of producers.
#[derive(Clone, Default)]
pub struct ProducerRegistry {
    entries: Arc<[ProducerEntry]>,
}

impl ProducerRegistry {
    /// A registry with no producers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns every producer matching the request.
    pub fn find(&self, required: &TypeTag, qualifiers: &QualifierSet) -> Vec<&ProducerEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.matches(required, qualifiers))
            .collect()
    }

    pub fn entries(&self) -> &[ProducerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ProducerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Token(&'static str);

    #[test]
    fn test_find_respects_type_and_qualifiers() {
        let mut builder = ProducerRegistryBuilder::new();
        builder
            .producer::<Token, _>("plain", QualifierSet::new(), |_| {
                AsyncHandle::completed(Arc::new(Token("plain")))
            })
            .producer::<Token, _>("secure", QualifierSet::of(["secure"]), |_| {
                AsyncHandle::completed(Arc::new(Token("secure")))
            });
        let registry = builder.seal();
        let required = TypeTag::of::<Token>();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find(&required, &QualifierSet::new()).len(), 2);
        let secure = registry.find(&required, &QualifierSet::of(["secure"]));
        assert_eq!(secure.len(), 1);
        assert_eq!(secure[0].name(), "secure");
        assert!(registry.find(&TypeTag::of::<String>(), &QualifierSet::new()).is_empty());
    }

    #[tokio::test]
    async fn test_produce_erases_value() {
        let mut builder = ProducerRegistryBuilder::new();
        builder.producer::<Token, _>("token", QualifierSet::new(), |_| {
            AsyncHandle::completed(Arc::new(Token("abc")))
        });
        let registry = builder.seal();

        let executor = WorkerExecutor::current();
        let instance = registry.entries()[0].produce(&executor).wait().await.unwrap();
        assert_eq!(instance.downcast::<Token>().unwrap().0, "abc");
    }
}
