use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vessel::bus::{FailureKind, OBSERVER_FAILURE_CODE, OBSERVERS};
use vessel::core::linkme::distributed_slice;
use vessel::core::{Origin, PRODUCERS, TaskError};
use vessel::prelude::*;

fn config() -> VesselConfig {
    let mut config = VesselConfig::default();
    config.executor.worker_pool_size = 4;
    config.bootstrap.registration_timeout_ms = 1_000;
    config.bus.default_timeout_ms = 2_000;
    config
}

fn builder() -> RuntimeBuilder {
    VesselRuntime::builder().config(config()).scan(false)
}

/// Waits until `condition` holds or two seconds pass.
async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ping_replies_pong_for_request_and_is_silent_for_send_and_publish() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let runtime = builder()
        .observe_fn("ping", move |ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert_eq!(ctx.body().as_str(), Some("ping"));
            ctx.set_reply("pong");
            Ok(Dispatch::Continue)
        })
        .build()
        .unwrap();
    runtime.start().await.unwrap();

    let reply = runtime.service_proxy("ping").call("ping").await.unwrap();
    assert_eq!(reply.body().as_str(), Some("pong"));

    let bus = runtime.bus();
    bus.send("ping", Body::from("ping"), DeliveryOptions::default());
    bus.publish("ping", Body::from("ping"), DeliveryOptions::default());

    eventually(|| seen.load(Ordering::SeqCst) == 3).await;
    runtime.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn observers_run_in_registration_order_per_message() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut builder = builder();
    for step in ["a", "b", "c"] {
        let log = Arc::clone(&log);
        builder = builder.observe_fn("pipeline", move |ctx| {
            let id = *ctx.body().downcast_ref::<u32>().unwrap();
            log.lock().unwrap().push((id, step));
            std::thread::sleep(Duration::from_millis(5));
            Ok(Dispatch::Continue)
        });
    }
    let runtime = builder.build().unwrap();
    runtime.start().await.unwrap();

    let proxy = runtime.service_proxy("pipeline");
    let first = proxy.call(Body::new(1_u32));
    let second = proxy.call(Body::new(2_u32));
    let (first, second) = tokio::join!(first.wait(), second.wait());
    first.unwrap();
    second.unwrap();

    let log = log.lock().unwrap();
    for id in [1, 2] {
        let steps: Vec<_> = log.iter().filter(|(m, _)| *m == id).map(|(_, s)| *s).collect();
        assert_eq!(steps, ["a", "b", "c"]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn declared_failure_and_fault_reach_the_sender() {
    let after_abort = Arc::new(AtomicUsize::new(0));
    let later = Arc::clone(&after_abort);
    let runtime = builder()
        .observe_fn("checkout", |_| Ok(Dispatch::fail(10, "boom")))
        .observe_fn("checkout", move |_| {
            later.fetch_add(1, Ordering::SeqCst);
            Ok(Dispatch::Continue)
        })
        .observe_fn("inventory", |_| Err("disk on fire".into()))
        .build()
        .unwrap();
    runtime.start().await.unwrap();

    let cause = runtime.service_proxy("checkout").call(()).await.unwrap_err();
    let failure = cause.downcast_ref::<BusFailure>().unwrap();
    assert_eq!(failure.kind(), FailureKind::Recipient);
    assert_eq!(failure.code(), 10);
    assert_eq!(failure.message(), "boom");
    assert_eq!(after_abort.load(Ordering::SeqCst), 0);

    let cause = runtime.service_proxy("inventory").call(()).await.unwrap_err();
    let failure = cause.downcast_ref::<BusFailure>().unwrap();
    assert_eq!(failure.code(), OBSERVER_FAILURE_CODE);
    assert_eq!(failure.message(), "disk on fire");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn producer_wins_over_container_and_skips_worker_pool() {
    struct Clock(&'static str);

    let container = StaticContainer::new()
        .with(ComponentDef::new("wall-clock", || Ok(Arc::new(Clock("container")))));
    let runtime = builder()
        .container(Arc::new(container))
        .configure_producers(|producers| {
            producers.producer::<Clock, _>("async-clock", QualifierSet::new(), |executor| {
                executor.run_non_blocking(|| Ok(Arc::new(Clock("producer"))))
            });
        })
        .build()
        .unwrap();

    let clock = runtime
        .resolver()
        .resolve::<Clock>(&QualifierSet::new())
        .await
        .unwrap();
    assert_eq!(clock.0, "producer");
    assert_eq!(runtime.executor().stats().blocking_submitted, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ambiguous_and_normal_scoped_components() {
    #[derive(Debug)]
    struct Pool(u8);
    struct Cache;

    let container = StaticContainer::new()
        .with(ComponentDef::new("cache", || Ok(Arc::new(Cache))).scope(Scope::Normal));
    let runtime = builder()
        .container(Arc::new(container))
        .configure_producers(|producers| {
            for id in [1, 2] {
                producers.producer::<Pool, _>("pool", QualifierSet::of(["primary"]), move |_| {
                    AsyncHandle::completed(Arc::new(Pool(id)))
                });
            }
        })
        .build()
        .unwrap();
    let resolver = runtime.resolver();

    let cause = resolver
        .resolve::<Pool>(&QualifierSet::of(["primary"]))
        .await
        .unwrap_err();
    match cause.downcast_ref::<ResolveError>() {
        Some(ResolveError::Ambiguous { origin, .. }) => assert_eq!(*origin, Origin::Producer),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(runtime.executor().stats().blocking_submitted, 0);

    let handle = resolver.resolve::<Cache>(&QualifierSet::new());
    handle.wait().await.unwrap();
    assert!(handle.get().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resolution_after_shutdown_fails_as_cancelled() {
    #[derive(Debug)]
    struct Ledger;

    let container = StaticContainer::new().with(ComponentDef::new("ledger", || Ok(Arc::new(Ledger))));
    let runtime = builder().container(Arc::new(container)).build().unwrap();
    runtime.shutdown();

    let handle = runtime.resolver().resolve::<Ledger>(&QualifierSet::new());
    let outcome = tokio::time::timeout(Duration::from_secs(2), handle.wait())
        .await
        .expect("resolution must not hang after shutdown");
    let cause = outcome.unwrap_err();
    assert!(matches!(cause.downcast_ref::<TaskError>(), Some(TaskError::Cancelled)));
}

fn register_hooks_producers(producers: &mut ProducerRegistryBuilder) {
    producers.producer::<String, _>("motd", QualifierSet::of(["motd"]), |_| {
        AsyncHandle::completed(Arc::new("welcome aboard".to_string()))
    });
}

fn register_hooks_observers(observers: &mut ObserverRegistryBuilder) {
    observers.observe_fn("hooks.motd", |_| Ok(Dispatch::reply("from a hook")));
}

#[distributed_slice(PRODUCERS)]
#[linkme(crate = vessel::core::linkme)]
static MOTD_PRODUCER: fn(&mut ProducerRegistryBuilder) = register_hooks_producers;

#[distributed_slice(OBSERVERS)]
#[linkme(crate = vessel::core::linkme)]
static MOTD_OBSERVER: fn(&mut ObserverRegistryBuilder) = register_hooks_observers;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn registration_hooks_are_collected_when_scanning() {
    let runtime = VesselRuntime::builder()
        .config(config())
        .scan(true)
        .build()
        .unwrap();
    runtime.start().await.unwrap();

    let motd = runtime
        .resolver()
        .resolve::<String>(&QualifierSet::of(["motd"]))
        .await
        .unwrap();
    assert_eq!(motd.as_str(), "welcome aboard");

    let reply = runtime.service_proxy("hooks.motd").call(()).await.unwrap();
    assert_eq!(reply.body().as_str(), Some("from a hook"));

    let unscanned = builder().build().unwrap();
    assert_eq!(unscanned.stats().addresses, 0);
    assert_eq!(unscanned.stats().producers, 0);
}
