//! Runtime type model used for matching components and producers.
//!
//! Components are identified by a [`TypeTag`] and a [`QualifierSet`]. A
//! component may be visible under several types (e.g. a concrete struct and the
//! trait objects it implements); [`BeanTypes`] records those views together
//! with the upcast that turns the primary [`Instance`] into each of them.

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// =============================================================================
// TypeTag
// =============================================================================

/// Opaque identity of a Rust type, usable as a lookup key.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    /// Returns the tag of `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Returns the underlying [`TypeId`].
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Returns the type name, for diagnostics only.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl Hash for TypeTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({})", self.name)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// =============================================================================
// Qualifiers
// =============================================================================

/// A named qualifier narrowing which component satisfies a request.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Qualifier(Cow<'static, str>);

impl Qualifier {
    /// Creates a qualifier from a static string without allocating.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Creates a qualifier from an owned name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Returns the qualifier name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Qualifier {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

impl From<String> for Qualifier {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// An unordered set of qualifiers.
///
/// A candidate satisfies a request when its own set is a superset of the
/// requested set; an empty request therefore matches any candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QualifierSet(BTreeSet<Qualifier>);

impl QualifierSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from anything convertible into qualifiers.
    pub fn of<I, Q>(qualifiers: I) -> Self
    where
        I: IntoIterator<Item = Q>,
        Q: Into<Qualifier>,
    {
        qualifiers.into_iter().map(Into::into).collect()
    }

    /// Adds a qualifier, returning the set for chaining.
    pub fn with(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.0.insert(qualifier.into());
        self
    }

    /// Inserts a qualifier; returns `false` if it was already present.
    pub fn insert(&mut self, qualifier: impl Into<Qualifier>) -> bool {
        self.0.insert(qualifier.into())
    }

    pub fn contains(&self, qualifier: &Qualifier) -> bool {
        self.0.contains(qualifier)
    }

    /// Returns `true` if every qualifier in `required` is present in `self`.
    pub fn contains_all(&self, required: &QualifierSet) -> bool {
        required.0.is_subset(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Qualifier> {
        self.0.iter()
    }
}

impl<Q: Into<Qualifier>> FromIterator<Q> for QualifierSet {
    fn from_iter<I: IntoIterator<Item = Q>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for QualifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, qualifier) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{qualifier}")?;
        }
        f.write_str("]")
    }
}

// =============================================================================
// Instance
// =============================================================================

/// A type-erased, shareable component instance.
///
/// Internally this holds an `Arc<T>` boxed as `dyn Any`, which allows `T` to be
/// unsized (e.g. `dyn Greeter`) while still supporting checked downcasts.
#[derive(Clone)]
pub struct Instance {
    tag: TypeTag,
    value: Arc<dyn Any + Send + Sync>,
}

impl Instance {
    /// Erases `value`, tagging it with `T`.
    pub fn new<T>(value: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Self {
            tag: TypeTag::of::<T>(),
            value: Arc::new(value),
        }
    }

    /// Returns the tag of the type this instance was erased from.
    pub fn type_tag(&self) -> TypeTag {
        self.tag
    }

    /// Returns `true` if this instance was erased from `T`.
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.tag == TypeTag::of::<T>()
    }

    /// Recovers the typed handle if this instance was erased from `T`.
    pub fn downcast<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.value.downcast_ref::<Arc<T>>().cloned()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.tag.name())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// BeanTypes
// =============================================================================

type Upcast = Arc<dyn Fn(&Instance) -> Option<Instance> + Send + Sync>;

/// The set of types a component is assignable to.
///
/// The primary type is always included. Additional views are registered with
/// [`also_as`](Self::also_as) and carry the conversion from the primary type.
#[derive(Clone)]
pub struct BeanTypes {
    primary: TypeTag,
    views: Vec<(TypeTag, Upcast)>,
}

impl BeanTypes {
    /// Creates a type set containing only `T`.
    pub fn of<T>() -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let primary = TypeTag::of::<T>();
        let identity: Upcast = Arc::new(|instance: &Instance| {
            instance.is::<T>().then(|| instance.clone())
        });
        Self {
            primary,
            views: vec![(primary, identity)],
        }
    }

    /// Makes the component assignable to `U` through `upcast`.
    ///
    /// `T` must be the primary type; the view is silently unusable otherwise.
    pub fn also_as<T, U>(mut self, upcast: fn(Arc<T>) -> Arc<U>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        U: ?Sized + Send + Sync + 'static,
    {
        debug_assert_eq!(self.primary, TypeTag::of::<T>(), "view registered on wrong primary type");
        let view: Upcast = Arc::new(move |instance: &Instance| {
            instance.downcast::<T>().map(|value| Instance::new(upcast(value)))
        });
        let tag = TypeTag::of::<U>();
        self.views.retain(|(existing, _)| *existing != tag);
        self.views.push((tag, view));
        self
    }

    pub fn primary(&self) -> TypeTag {
        self.primary
    }

    /// Returns `true` if the component can be viewed as `required`.
    pub fn is_assignable_to(&self, required: &TypeTag) -> bool {
        self.views.iter().any(|(tag, _)| tag == required)
    }

    /// Converts a primary instance into its `required` view.
    pub fn view(&self, instance: &Instance, required: &TypeTag) -> Option<Instance> {
        self.views
            .iter()
            .find(|(tag, _)| tag == required)
            .and_then(|(_, upcast)| upcast(instance))
    }

    pub fn tags(&self) -> impl Iterator<Item = TypeTag> + '_ {
        self.views.iter().map(|(tag, _)| *tag)
    }
}

impl fmt::Debug for BeanTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tags().map(|t| t.name())).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    #[test]
    fn test_qualifier_superset_matching() {
        let candidate = QualifierSet::of(["fast", "cached"]);
        assert!(candidate.contains_all(&QualifierSet::new()));
        assert!(candidate.contains_all(&QualifierSet::of(["fast"])));
        assert!(!candidate.contains_all(&QualifierSet::of(["fast", "remote"])));
    }

    #[test]
    fn test_qualifier_set_display() {
        let set = QualifierSet::new().with("b").with("a");
        assert_eq!(set.to_string(), "[@a, @b]");
    }

    #[test]
    fn test_instance_downcast_unsized() {
        let greeter: Arc<dyn Greeter> = Arc::new(English);
        let instance = Instance::new(greeter);

        assert!(instance.is::<dyn Greeter>());
        assert!(instance.downcast::<English>().is_none());
        let back = instance.downcast::<dyn Greeter>().unwrap();
        assert_eq!(back.greet(), "hello");
    }

    #[test]
    fn test_bean_types_view() {
        let types = BeanTypes::of::<English>().also_as::<English, dyn Greeter>(|e| e);
        let instance = Instance::new(Arc::new(English));

        assert!(types.is_assignable_to(&TypeTag::of::<English>()));
        assert!(types.is_assignable_to(&TypeTag::of::<dyn Greeter>()));
        assert!(!types.is_assignable_to(&TypeTag::of::<String>()));

        let view = types.view(&instance, &TypeTag::of::<dyn Greeter>()).unwrap();
        assert_eq!(view.downcast::<dyn Greeter>().unwrap().greet(), "hello");
    }
}
