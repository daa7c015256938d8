//! Asynchronous dependency resolution.
//!
//! [`AsyncHandleResolver`] turns a `(type, qualifiers)` request into an
//! [`AsyncHandle`]. A single matching async producer is always preferred and
//! is chained without touching the worker pool. Otherwise lookup and
//! realization run on the worker pool against the [`Container`], so the event
//! loop never blocks on component construction.

use std::sync::Arc;

use tracing::{debug, instrument, trace};

use crate::container::Container;
use crate::error::{BoxError, Origin, ResolveError, cause};
use crate::executor::WorkerExecutor;
use crate::handle::{AsyncHandle, Completer};
use crate::producer::{ProducerEntry, ProducerRegistry};
use crate::types::{Instance, QualifierSet, TypeTag};

/// Resolves components into asynchronous handles.
#[derive(Clone)]
pub struct AsyncHandleResolver {
    producers: ProducerRegistry,
    container: Arc<dyn Container>,
    executor: WorkerExecutor,
}

impl AsyncHandleResolver {
    pub fn new(
        producers: ProducerRegistry,
        container: Arc<dyn Container>,
        executor: WorkerExecutor,
    ) -> Self {
        Self {
            producers,
            container,
            executor,
        }
    }

    /// Resolves a component of type `T` carrying at least `qualifiers`.
    ///
    /// Never blocks and never fails synchronously; every failure is delivered
    /// through the handle.
    pub fn resolve<T>(&self, qualifiers: &QualifierSet) -> AsyncHandle<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let required = TypeTag::of::<T>();
        self.resolve_tag(required, qualifiers)
            .then_compose(move |instance: &Instance| match instance.downcast::<T>() {
                Some(value) => AsyncHandle::completed(value),
                None => AsyncHandle::failed(cause(ResolveError::NotAssignable {
                    required: required.name(),
                    component: instance.type_tag().name().to_string(),
                })),
            })
    }

    /// Type-erased variant of [`resolve`](Self::resolve).
    #[instrument(level = "debug", skip_all, fields(required = %required, qualifiers = %qualifiers))]
    pub fn resolve_tag(&self, required: TypeTag, qualifiers: &QualifierSet) -> AsyncHandle<Instance> {
        let (handle, completer) = AsyncHandle::pending();

        match self.producers.find(&required, qualifiers).as_slice() {
            [] => self.resolve_on_worker(required, qualifiers.clone(), completer),
            [producer] => self.chain_producer(producer, required, completer),
            matching => {
                debug!(candidates = matching.len(), "Ambiguous async producers");
                completer.fail(cause(ResolveError::Ambiguous {
                    required: required.name(),
                    qualifiers: qualifiers.clone(),
                    candidates: matching.len(),
                    origin: Origin::Producer,
                }));
            }
        }

        handle
    }

    /// Returns the executor used for worker-pool resolution.
    pub fn executor(&self) -> &WorkerExecutor {
        &self.executor
    }

    pub fn producers(&self) -> &ProducerRegistry {
        &self.producers
    }

    fn chain_producer(&self, producer: &ProducerEntry, required: TypeTag, completer: Completer<Instance>) {
        trace!(producer = producer.name(), "Resolving through async producer");
        let entry = producer.clone();
        producer.produce(&self.executor).when_complete(move |outcome| {
            match outcome {
                Ok(instance) => match entry.types().view(instance, &required) {
                    Some(view) => completer.succeed(view),
                    None => completer.fail(cause(ResolveError::NotAssignable {
                        required: required.name(),
                        component: entry.name().to_string(),
                    })),
                },
                Err(failure) => completer.fail(Arc::clone(failure)),
            };
        });
    }

    fn resolve_on_worker(&self, required: TypeTag, qualifiers: QualifierSet, completer: Completer<Instance>) {
        trace!("No async producer, resolving on worker pool");
        let container = Arc::clone(&self.container);
        self.executor
            .run_blocking(move || realize(container.as_ref(), &required, &qualifiers))
            .when_complete(move |outcome| {
                completer.complete(outcome.clone());
            });
    }
}

/// Looks up and realizes exactly one candidate. Runs on a worker thread.
fn realize(
    container: &dyn Container,
    required: &TypeTag,
    qualifiers: &QualifierSet,
) -> Result<Instance, BoxError> {
    let mut candidates = container.resolve_candidates(required, qualifiers);
    if candidates.len() > 1 {
        return Err(Box::new(ResolveError::Ambiguous {
            required: required.name(),
            qualifiers: qualifiers.clone(),
            candidates: candidates.len(),
            origin: Origin::Container,
        }));
    }
    let Some(candidate) = candidates.pop() else {
        return Err(Box::new(ResolveError::Unsatisfied {
            required: required.name(),
            qualifiers: qualifiers.clone(),
        }));
    };

    let component = container.materialize(&candidate)?;
    if !component.is_realized() && container.is_lazy_normal_scope(&candidate) {
        debug!(component = candidate.name(), "Realizing normal-scoped component eagerly");
    }
    let instance = component.force()?;

    candidate.types().view(&instance, required).ok_or_else(|| {
        Box::new(ResolveError::NotAssignable {
            required: required.name(),
            component: candidate.name().to_string(),
        }) as BoxError
    })
}

impl std::fmt::Debug for AsyncHandleResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncHandleResolver")
            .field("producers", &self.producers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::container::{ComponentDef, Scope, StaticContainer};
    use crate::producer::ProducerRegistryBuilder;
    use crate::types::BeanTypes;

    trait Greeter: Send + Sync {
        fn greet(&self) -> &'static str;
    }

    struct Hello;

    impl Greeter for Hello {
        fn greet(&self) -> &'static str {
            "hello"
        }
    }

    #[derive(Debug)]
    struct Config(u32);

    fn resolver(builder: ProducerRegistryBuilder, container: StaticContainer) -> AsyncHandleResolver {
        AsyncHandleResolver::new(builder.seal(), Arc::new(container), WorkerExecutor::current())
    }

    fn resolve_error(cause: &crate::error::Cause) -> &ResolveError {
        cause.downcast_ref::<ResolveError>().expect("expected a ResolveError")
    }

    #[tokio::test]
    async fn test_producer_takes_precedence_over_container() {
        let mut producers = ProducerRegistryBuilder::new();
        producers.producer::<Config, _>("async-config", QualifierSet::new(), |executor| {
            executor.run_non_blocking(|| Ok(Arc::new(Config(7))))
        });
        let container = StaticContainer::new().with(ComponentDef::new("sync-config", || Ok(Arc::new(Config(1)))));
        let resolver = resolver(producers, container);

        let config = resolver.resolve::<Config>(&QualifierSet::new()).wait().await.unwrap();
        assert_eq!(config.0, 7);
        assert_eq!(resolver.executor().stats().blocking_submitted, 0);
    }

    #[tokio::test]
    async fn test_producer_failure_propagates() {
        #[derive(Debug, thiserror::Error)]
        #[error("vault sealed")]
        struct Sealed;

        let mut producers = ProducerRegistryBuilder::new();
        producers.producer::<Config, _>("vault", QualifierSet::new(), |_| AsyncHandle::failed(cause(Sealed)));
        let resolver = resolver(producers, StaticContainer::new());

        let failure = resolver.resolve::<Config>(&QualifierSet::new()).wait().await.unwrap_err();
        assert!(failure.downcast_ref::<Sealed>().is_some());
    }

    #[tokio::test]
    async fn test_ambiguous_producers_fail_without_worker() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut producers = ProducerRegistryBuilder::new();
        for name in ["first", "second"] {
            let calls = Arc::clone(&calls);
            producers.producer::<Config, _>(name, QualifierSet::of(["primary"]), move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                AsyncHandle::completed(Arc::new(Config(0)))
            });
        }
        let resolver = resolver(producers, StaticContainer::new());

        let handle = resolver.resolve::<Config>(&QualifierSet::of(["primary"]));
        let failure = handle.wait().await.unwrap_err();

        match resolve_error(&failure) {
            ResolveError::Ambiguous {
                candidates, origin, ..
            } => {
                assert_eq!(*candidates, 2);
                assert_eq!(*origin, Origin::Producer);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.executor().stats().blocking_submitted, 0);
    }

    #[tokio::test]
    async fn test_unsatisfied_fails_through_handle() {
        let resolver = resolver(ProducerRegistryBuilder::new(), StaticContainer::new());

        let handle = resolver.resolve::<Config>(&QualifierSet::of(["missing"]));
        let failure = handle.wait().await.unwrap_err();

        assert!(resolve_error(&failure).is_unsatisfied());
        assert_eq!(resolver.executor().stats().blocking_submitted, 1);
    }

    #[tokio::test]
    async fn test_ambiguous_container_candidates() {
        let container = StaticContainer::new()
            .with(ComponentDef::new("a", || Ok(Arc::new(Config(1)))))
            .with(ComponentDef::new("b", || Ok(Arc::new(Config(2)))));
        let resolver = resolver(ProducerRegistryBuilder::new(), container);

        let failure = resolver.resolve::<Config>(&QualifierSet::new()).wait().await.unwrap_err();
        assert!(resolve_error(&failure).is_ambiguous());
    }

    #[tokio::test]
    async fn test_normal_scope_is_realized_before_completion() {
        let container = Arc::new(
            StaticContainer::new().with(
                ComponentDef::new("greeter", || Ok(Arc::new(Hello)))
                    .scope(Scope::Normal)
                    .types(BeanTypes::of::<Hello>().also_as::<Hello, dyn Greeter>(|h| h)),
            ),
        );
        let resolver = AsyncHandleResolver::new(
            ProducerRegistry::empty(),
            Arc::clone(&container) as Arc<dyn Container>,
            WorkerExecutor::current(),
        );

        let handle = resolver.resolve::<dyn Greeter>(&QualifierSet::new());
        assert_eq!(container.realizations("greeter"), 0);

        let greeter = handle.wait().await.unwrap();
        assert_eq!(container.realizations("greeter"), 1);
        assert_eq!(greeter.greet(), "hello");
    }

    #[tokio::test]
    async fn test_container_factory_error_propagates() {
        let container = StaticContainer::new().with(ComponentDef::new::<Config, _>("broken", || {
            Err("database unreachable".into())
        }));
        let resolver = resolver(ProducerRegistryBuilder::new(), container);

        let failure = resolver.resolve::<Config>(&QualifierSet::new()).wait().await.unwrap_err();
        assert_eq!(failure.to_string(), "database unreachable");
    }
}
