//! Scheduler lifecycle: startup validation, first runs, graceful shutdown.

mod support;

use std::sync::Arc;
use std::time::Duration;

use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;
use tokio::sync::watch;

use pnodewatch::credits::CreditsClient;
use pnodewatch::rpc::PodRpcClient;
use pnodewatch::scheduler::Scheduler;
use pnodewatch::store::entity::prelude::NetworkSnapshot;
use pnodewatch::store::CleanupTable;

use support::{memory_store, test_config, unused_port, StubNode};

#[tokio::test]
async fn startup_runs_one_cycle_and_shuts_down_cleanly() {
    let pod_stub = StubNode::start(None, Some(json!({ "uptime": 60 }))).await;
    let pods = json!({ "pods": [{ "pubkey": "S", "address": "127.0.0.1:9999", "is_public": true }] });
    let seed = StubNode::start(Some(pods), None).await;

    let store = memory_store().await;
    let mut config = test_config(vec![seed.base_url.clone()], pod_stub.port);
    config.health_port = unused_port().await;
    // Dead credits endpoint: the credits cycle must degrade, not wedge.
    config.credits_url = format!(
        "http://127.0.0.1:{}/api/pods-credits",
        unused_port().await
    );
    config.credits_timeout_ms = 500;

    let rpc = PodRpcClient::new(config.rpc_timeout());
    let credits = CreditsClient::new(config.credits_url.clone(), config.credits_timeout());
    let config = Arc::new(config);

    let scheduler = Scheduler::new(store.clone(), rpc, credits, Arc::clone(&config));
    let status = scheduler.status();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(scheduler.run(shutdown_rx));

    // Give the startup sequence room to validate, cycle and snapshot.
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    assert!(status.last_attempt().is_some());
    assert!(status.last_success().is_some());
    assert_eq!(status.failure_count(), 0);
    assert_eq!(
        store
            .count_rows(CleanupTable::IngestionRun)
            .await
            .expect("count"),
        1
    );
    assert_eq!(
        NetworkSnapshot::find()
            .count(store.connection())
            .await
            .expect("count"),
        1
    );
    assert_eq!(pod_stub.stats_count(), 1);
    // Startup validation plus the first cycle each ask for gossip.
    assert_eq!(seed.gossip_count(), 2);

    shutdown_tx.send(true).expect("signal shutdown");
    runner
        .await
        .expect("join scheduler")
        .expect("clean shutdown");
}

#[tokio::test]
async fn startup_fails_when_no_seed_answers() {
    let store = memory_store().await;
    let dead_seed = format!("http://127.0.0.1:{}", unused_port().await);
    let mut config = test_config(vec![dead_seed], 6_000);
    config.health_port = unused_port().await;
    config.credits_url = format!("http://127.0.0.1:{}", unused_port().await);

    let rpc = PodRpcClient::new(config.rpc_timeout());
    let credits = CreditsClient::new(config.credits_url.clone(), config.credits_timeout());
    let config = Arc::new(config);

    let scheduler = Scheduler::new(store, rpc, credits, config);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = scheduler.run(shutdown_rx).await;
    assert!(result.is_err(), "startup must fail with no live seed");
}
