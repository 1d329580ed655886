//! Integration tests for the pooling facade, worker contexts, and the
//! round-trip health probe.

#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;
use std::time::Duration;

use repopool::chain::Stage;
use repopool::health::{ChainRoundTripHealthCheck, HealthCheck, HealthStatus};
use repopool::testing::ScriptedEndpoint;
use repopool::{
    Credentials, EndpointError, InvalidationPolicy, PoolCapacity, PoolConfig, PoolError,
    PoolingFacade,
};

fn test_config(capacity: u32) -> PoolConfig {
    PoolConfig {
        capacity: PoolCapacity::try_new(capacity).unwrap(),
        claim_timeout: Duration::from_millis(250),
        expiration_base: Duration::from_secs(60),
        expiration_spread: Duration::ZERO,
        teardown_workers: 2,
        invalidation: InvalidationPolicy::TransportOnly,
    }
}

fn build_facade(
    endpoint: &Arc<ScriptedEndpoint>,
    config: &PoolConfig,
) -> Arc<PoolingFacade<ScriptedEndpoint>> {
    Arc::new(PoolingFacade::from_config(
        Arc::clone(endpoint),
        Credentials::new("bridge-svc", "secret"),
        config,
    ))
}

#[tokio::test]
async fn context_claims_lazily_and_caches_the_claim() {
    let endpoint = Arc::new(ScriptedEndpoint::new());
    let facade = build_facade(&endpoint, &test_config(4));

    let mut context = facade.context();
    assert!(!context.has_claim());
    assert_eq!(endpoint.total_opened(), 0);

    let entry = context.claim_id().await.unwrap();
    assert!(context.has_claim());
    assert_eq!(context.entry_id(), Some(entry));

    // every accessor is served from the one cached claim
    context.transport().await.unwrap();
    context.directory().await.unwrap();
    context.repository().await.unwrap();
    context.session().await.unwrap();
    context.admin().await.unwrap();
    assert_eq!(endpoint.total_opened(), 5);
    assert_eq!(context.entry_id(), Some(entry));

    context.release(entry).unwrap();
    assert!(!context.has_claim());
}

#[tokio::test]
async fn release_validates_entry_identity() {
    let endpoint = Arc::new(ScriptedEndpoint::new());
    let facade = build_facade(&endpoint, &test_config(4));

    let mut context = facade.context();
    let entry = context.claim_id().await.unwrap();

    let stranger = repopool::EntryId::new();
    let error = context.release(stranger).unwrap_err();
    assert!(matches!(
        error,
        PoolError::Consistency {
            claimed: Some(claimed),
            ..
        } if claimed == entry
    ));
    // the mismatch left the claim untouched
    assert_eq!(context.entry_id(), Some(entry));

    context.release(entry).unwrap();
    let error = context.release(entry).unwrap_err();
    assert!(matches!(error, PoolError::Consistency { claimed: None, .. }));
}

#[tokio::test]
async fn dropping_a_context_with_a_live_claim_tears_the_chain_down() {
    let endpoint = Arc::new(ScriptedEndpoint::new());
    let facade = build_facade(&endpoint, &test_config(1));

    {
        let mut context = facade.context();
        context.claim_id().await.unwrap();
    }

    facade.pool().allocator().drain().await;
    assert_eq!(endpoint.total_closed(), 5);

    // the leaked claim freed its capacity slot
    let mut context = facade.context();
    let entry = context.claim_id().await.unwrap();
    context.release(entry).unwrap();
}

#[tokio::test]
async fn flagged_fault_retires_the_entry_on_release() {
    let endpoint = Arc::new(ScriptedEndpoint::new());
    let facade = build_facade(&endpoint, &test_config(2));

    let mut context = facade.context();
    let first = context.claim_id().await.unwrap();
    context.flag_fault(EndpointError::Protocol("stale handle".into()));
    context.release(first).unwrap();

    // a protocol fault is per-entry under the transport-only policy
    assert_eq!(facade.pool().metrics().invalidations.get(), 0);

    let second = context.claim_id().await.unwrap();
    assert_ne!(second, first);
    context.release(second).unwrap();
}

#[tokio::test]
async fn contexts_on_the_same_facade_claim_distinct_entries() {
    let endpoint = Arc::new(ScriptedEndpoint::new());
    let facade = build_facade(&endpoint, &test_config(2));

    let mut first = facade.context();
    let mut second = facade.context();
    let first_entry = first.claim_id().await.unwrap();
    let second_entry = second.claim_id().await.unwrap();
    assert_ne!(first_entry, second_entry);

    first.release(first_entry).unwrap();
    second.release(second_entry).unwrap();
}

#[tokio::test]
async fn describe_reports_capacity_and_endpoint() {
    let endpoint = Arc::new(ScriptedEndpoint::new());
    let facade = build_facade(&endpoint, &test_config(3));
    assert_eq!(facade.describe(), "[3 x [scripted endpoint]]");
}

#[tokio::test]
async fn health_probe_reports_healthy_with_latency_metadata() {
    let endpoint = Arc::new(ScriptedEndpoint::new());
    let facade = build_facade(&endpoint, &test_config(2));
    let probe = ChainRoundTripHealthCheck::new(Arc::clone(&facade), Duration::from_secs(1));

    let result = probe.check().await;
    assert_eq!(result.status, HealthStatus::Healthy);
    assert!(result.metadata.contains_key("latency_ms"));
    assert_eq!(probe.name(), "repository round trip");

    // the probe released its claim, so the pool is back at full headroom
    assert_eq!(facade.pool().idle_count(), 1);
}

#[tokio::test]
async fn health_probe_reports_unhealthy_when_round_trip_is_slow() {
    let endpoint = Arc::new(ScriptedEndpoint::with_latency(Duration::from_millis(20)));
    let facade = build_facade(&endpoint, &test_config(1));
    let probe = ChainRoundTripHealthCheck::new(Arc::clone(&facade), Duration::from_millis(1));

    let result = probe.check().await;
    assert_eq!(result.status, HealthStatus::Unhealthy);
    assert!(result.message.contains("took too long"));
}

#[tokio::test]
async fn health_probe_reports_unhealthy_when_the_chain_cannot_be_built() {
    let endpoint = Arc::new(ScriptedEndpoint::new());
    let facade = build_facade(&endpoint, &test_config(1));
    endpoint.fail_always_at(
        Stage::Transport,
        EndpointError::Unavailable("repository down".into()),
    );

    let result = probe_status(&facade).await;
    assert_eq!(result.0, HealthStatus::Unhealthy);
    assert!(result.1.contains("round trip failed"));
}

async fn probe_status(
    facade: &Arc<PoolingFacade<ScriptedEndpoint>>,
) -> (HealthStatus, String) {
    let probe = ChainRoundTripHealthCheck::new(Arc::clone(facade), Duration::from_secs(1));
    let result = probe.check().await;
    (result.status, result.message)
}
