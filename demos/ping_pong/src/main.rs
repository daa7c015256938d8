//! Ping/pong over the in-process bus, plus async component resolution.
//!
//! Run with `cargo run -p ping-pong`. Set `VESSEL_LOGGING__LEVEL=debug` to see
//! dispatch and resolution spans.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::{Value, json};
use tracing::info;
use vessel::prelude::*;

/// A slow-to-build component served by the container on the worker pool.
struct Greeter {
    salutation: String,
}

/// Read once at startup by an asynchronous producer.
struct Settings {
    rounds: u32,
}

fn ping(ctx: &mut EventContext) -> Result<Dispatch, BoxError> {
    let Some(request) = ctx.body().downcast_ref::<Value>() else {
        return Ok(Dispatch::fail(400, "expected a JSON body"));
    };
    let round = request["round"].as_u64().unwrap_or_default();
    ctx.set_reply(Body::new(json!({ "pong": round })));
    Ok(Dispatch::Continue)
}

fn audit(ctx: &mut EventContext) -> Result<Dispatch, BoxError> {
    info!(address = ctx.address(), replied = ctx.is_replied(), "Audited ping");
    Ok(Dispatch::Continue)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let container = StaticContainer::new().with(
        ComponentDef::new("greeter", || {
            std::thread::sleep(Duration::from_millis(50));
            Ok(Arc::new(Greeter {
                salutation: "Ahoy".to_string(),
            }))
        })
        .scope(Scope::Normal),
    );

    let runtime = VesselRuntime::builder()
        .container(Arc::new(container))
        .configure_producers(|producers| {
            producers.producer::<Settings, _>("settings", QualifierSet::new(), |executor| {
                executor.run_async(async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(Arc::new(Settings { rounds: 3 }))
                })
            });
        })
        .observe_fn("demo.ping", ping)
        .observe_fn("demo.ping", audit)
        .build()
        .context("failed to build runtime")?;

    runtime.start().await?;

    let resolver = runtime.resolver();
    let settings = resolver
        .resolve::<Settings>(&QualifierSet::new())
        .await
        .map_err(|cause| anyhow::anyhow!("settings unavailable: {cause}"))?;
    let greeter = resolver
        .resolve::<Greeter>(&QualifierSet::new())
        .await
        .map_err(|cause| anyhow::anyhow!("greeter unavailable: {cause}"))?;
    info!("{}, sailor", greeter.salutation);

    let proxy = runtime.service_proxy("demo.ping");
    for round in 1..=settings.rounds {
        let reply = proxy
            .call(Body::new(json!({ "round": round })))
            .await
            .map_err(|cause| anyhow::anyhow!("ping failed: {cause}"))?;
        let pong = reply.body().downcast_ref::<Value>();
        info!(round, reply = ?pong, "Received reply");
    }

    match proxy.call("not json").await {
        Ok(_) => info!("Unexpected success"),
        Err(cause) => info!(%cause, "Rejected as expected"),
    }

    info!(stats = ?runtime.stats(), "Done");
    runtime.shutdown();
    Ok(())
}
