//! The container interface the resolver falls back to.
//!
//! A [`Container`] answers two questions: which candidates match a type and
//! qualifier set, and how to obtain an instance for one candidate. Obtaining an
//! instance may be deferred; [`Component::force`] performs the realization.
//!
//! [`StaticContainer`] is a small in-memory implementation suitable for
//! applications that register their components explicitly.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::BoxError;
use crate::types::{BeanTypes, Instance, Qualifier, QualifierSet, TypeTag};

// =============================================================================
// Scope & Component
// =============================================================================

/// Lifecycle of a component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scope {
    /// A fresh instance per materialization.
    #[default]
    Dependent,
    /// A single shared instance, created lazily on first use.
    Normal,
}

impl Scope {
    pub fn is_normal(&self) -> bool {
        matches!(self, Self::Normal)
    }
}

/// Deferred realization of a component instance.
pub type LazyFactory = Arc<dyn Fn() -> Result<Instance, BoxError> + Send + Sync>;

/// A materialized component, possibly not yet realized.
#[derive(Clone)]
pub enum Component {
    /// The instance is created on [`force`](Component::force).
    Deferred(LazyFactory),
    /// The instance already exists.
    Realized(Instance),
}

impl Component {
    pub fn deferred<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Instance, BoxError> + Send + Sync + 'static,
    {
        Self::Deferred(Arc::new(factory))
    }

    pub fn is_realized(&self) -> bool {
        matches!(self, Self::Realized(_))
    }

    /// Realizes the instance, running the deferred factory if needed.
    pub fn force(self) -> Result<Instance, BoxError> {
        match self {
            Self::Realized(instance) => Ok(instance),
            Self::Deferred(factory) => factory(),
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deferred(_) => f.write_str("Component::Deferred"),
            Self::Realized(instance) => f.debug_tuple("Component::Realized").field(instance).finish(),
        }
    }
}

/// A component matching a lookup, as reported by a container.
#[derive(Debug, Clone)]
pub struct Candidate {
    id: usize,
    name: String,
    scope: Scope,
    types: BeanTypes,
    qualifiers: QualifierSet,
}

impl Candidate {
    /// Creates a candidate; `id` is opaque to everything but the container.
    pub fn new(
        id: usize,
        name: impl Into<String>,
        scope: Scope,
        types: BeanTypes,
        qualifiers: QualifierSet,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            scope,
            types,
            qualifiers,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn types(&self) -> &BeanTypes {
        &self.types
    }

    pub fn qualifiers(&self) -> &QualifierSet {
        &self.qualifiers
    }
}

/// Synchronous component lookup used on the worker pool.
///
/// Both methods may block; they are only ever invoked from worker threads.
pub trait Container: Send + Sync + 'static {
    /// Returns every candidate assignable to `required` whose qualifiers
    /// include all of `qualifiers`.
    fn resolve_candidates(&self, required: &TypeTag, qualifiers: &QualifierSet) -> Vec<Candidate>;

    /// Obtains the component for a candidate returned by
    /// [`resolve_candidates`](Self::resolve_candidates).
    fn materialize(&self, candidate: &Candidate) -> Result<Component, BoxError>;

    /// Whether the candidate is shared and handed out behind a lazy proxy,
    /// in which case the resolver realizes it before completing.
    fn is_lazy_normal_scope(&self, candidate: &Candidate) -> bool {
        candidate.scope().is_normal()
    }
}

// =============================================================================
// StaticContainer
// =============================================================================

type Factory = Arc<dyn Fn() -> Result<Instance, BoxError> + Send + Sync>;

/// Typed definition of a component registered in a [`StaticContainer`].
pub struct ComponentDef {
    name: String,
    scope: Scope,
    types: BeanTypes,
    qualifiers: QualifierSet,
    factory: Factory,
}

impl ComponentDef {
    /// Defines a component of type `T` built by `factory`.
    pub fn new<T, F>(name: impl Into<String>, factory: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn() -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            scope: Scope::Dependent,
            types: BeanTypes::of::<T>(),
            qualifiers: QualifierSet::new(),
            factory: Arc::new(move || factory().map(Instance::new)),
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn qualifier(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.qualifiers.insert(qualifier);
        self
    }

    /// Replaces the set of types this component is assignable to.
    ///
    /// The primary type of `types` must match the factory's type.
    pub fn types(mut self, types: BeanTypes) -> Self {
        self.types = types;
        self
    }
}

struct Entry {
    def: ComponentDef,
    shared: Mutex<Option<Instance>>,
    realizations: AtomicUsize,
}

impl Entry {
    fn create(&self) -> Result<Instance, BoxError> {
        let instance = (self.def.factory)()?;
        self.realizations.fetch_add(1, Ordering::SeqCst);
        debug!(component = %self.def.name, "Component instance created");
        Ok(instance)
    }

    fn shared_instance(&self) -> Result<Instance, BoxError> {
        let mut slot = self.shared.lock();
        if let Some(instance) = slot.as_ref() {
            return Ok(instance.clone());
        }
        let instance = self.create()?;
        *slot = Some(instance.clone());
        Ok(instance)
    }
}

/// An in-memory container holding explicitly registered components.
///
/// Normal-scoped components are materialized as [`Component::Deferred`] and
/// shared after first realization. Dependent components are created on every
/// materialization.
#[derive(Default)]
pub struct StaticContainer {
    entries: Vec<Arc<Entry>>,
}

impl StaticContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a component definition.
    pub fn register(&mut self, def: ComponentDef) -> &mut Self {
        self.entries.push(Arc::new(Entry {
            def,
            shared: Mutex::new(None),
            realizations: AtomicUsize::new(0),
        }));
        self
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with(mut self, def: ComponentDef) -> Self {
        self.register(def);
        self
    }

    /// Number of times the named component has been instantiated.
    pub fn realizations(&self, name: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.def.name == name)
            .map(|e| e.realizations.load(Ordering::SeqCst))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Container for StaticContainer {
    fn resolve_candidates(&self, required: &TypeTag, qualifiers: &QualifierSet) -> Vec<Candidate> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.def.types.is_assignable_to(required) && e.def.qualifiers.contains_all(qualifiers)
            })
            .map(|(id, e)| {
                Candidate::new(
                    id,
                    e.def.name.clone(),
                    e.def.scope,
                    e.def.types.clone(),
                    e.def.qualifiers.clone(),
                )
            })
            .collect()
    }

    fn materialize(&self, candidate: &Candidate) -> Result<Component, BoxError> {
        let entry = self
            .entries
            .get(candidate.id())
            .ok_or_else(|| format!("unknown component '{}'", candidate.name()))?;

        match entry.def.scope {
            Scope::Dependent => entry.create().map(Component::Realized),
            Scope::Normal => {
                let entry = Arc::clone(entry);
                Ok(Component::deferred(move || entry.shared_instance()))
            }
        }
    }
}

impl fmt::Debug for StaticContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.def.name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Clock;

    #[test]
    fn test_normal_scope_is_deferred_and_shared() {
        let container = StaticContainer::new().with(
            ComponentDef::new("clock", || Ok(Arc::new(Clock))).scope(Scope::Normal),
        );
        let required = TypeTag::of::<Clock>();

        let candidates = container.resolve_candidates(&required, &QualifierSet::new());
        assert_eq!(candidates.len(), 1);
        assert!(container.is_lazy_normal_scope(&candidates[0]));

        let component = container.materialize(&candidates[0]).unwrap();
        assert!(!component.is_realized());
        assert_eq!(container.realizations("clock"), 0);

        let first = component.force().unwrap();
        let second = container.materialize(&candidates[0]).unwrap().force().unwrap();
        assert_eq!(container.realizations("clock"), 1);
        assert!(Arc::ptr_eq(
            &first.downcast::<Clock>().unwrap(),
            &second.downcast::<Clock>().unwrap()
        ));
    }

    #[test]
    fn test_dependent_scope_is_realized_per_lookup() {
        let container = StaticContainer::new().with(ComponentDef::new("clock", || Ok(Arc::new(Clock))));
        let candidate = container
            .resolve_candidates(&TypeTag::of::<Clock>(), &QualifierSet::new())
            .remove(0);

        assert!(container.materialize(&candidate).unwrap().is_realized());
        assert!(container.materialize(&candidate).unwrap().is_realized());
        assert_eq!(container.realizations("clock"), 2);
    }

    #[test]
    fn test_qualifiers_filter_candidates() {
        let container = StaticContainer::new()
            .with(ComponentDef::new("plain", || Ok(Arc::new(Clock))))
            .with(ComponentDef::new("atomic", || Ok(Arc::new(Clock))).qualifier("atomic"));
        let required = TypeTag::of::<Clock>();

        assert_eq!(container.resolve_candidates(&required, &QualifierSet::new()).len(), 2);
        let atomic = container.resolve_candidates(&required, &QualifierSet::of(["atomic"]));
        assert_eq!(atomic.len(), 1);
        assert_eq!(atomic[0].name(), "atomic");
    }
}
