//! Health endpoint behavior via the router, without binding a port.

mod support;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::util::ServiceExt;

use pnodewatch::credits::CreditsClient;
use pnodewatch::health::{router, HealthContext};
use pnodewatch::rpc::PodRpcClient;
use pnodewatch::scheduler::Scheduler;

use support::{memory_store, test_config};

#[tokio::test]
async fn reports_ok_with_live_store() {
    let store = memory_store().await;
    let config = Arc::new(test_config(
        vec!["http://seed.example".to_string()],
        6_000,
    ));
    let scheduler = Scheduler::new(
        store.clone(),
        PodRpcClient::new(config.rpc_timeout()),
        CreditsClient::new(config.credits_url.clone(), config.credits_timeout()),
        Arc::clone(&config),
    );
    let app = router(HealthContext {
        store,
        status: scheduler.status(),
    });

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("body");
    let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "connected");
    assert_eq!(body["ingestionFailureCount"], 0);
    assert!(body["lastSuccessfulIngestion"].is_null());
    assert!(body["lastIngestionAttempt"].is_null());
    assert!(body["uptime"].is_u64());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn unknown_paths_are_not_served() {
    let store = memory_store().await;
    let config = Arc::new(test_config(
        vec!["http://seed.example".to_string()],
        6_000,
    ));
    let scheduler = Scheduler::new(
        store.clone(),
        PodRpcClient::new(config.rpc_timeout()),
        CreditsClient::new(config.credits_url.clone(), config.credits_timeout()),
        Arc::clone(&config),
    );
    let app = router(HealthContext {
        store,
        status: scheduler.status(),
    });

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
