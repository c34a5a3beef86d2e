//! Shared harness: an in-memory store and stub pNode JSON-RPC servers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use pnodewatch::config::IngestorConfig;
use pnodewatch::store::Store;

/// Open a fresh in-memory store with the full schema.
///
/// The pool is capped at one connection: each sqlite `:memory:` connection is
/// its own database, so a wider pool would split the data.
pub async fn memory_store() -> Store {
    let store = Store::connect("sqlite::memory:", 1)
        .await
        .expect("open in-memory store");
    store.ensure_schema().await.expect("create schema");
    store
}

pub fn test_config(seeds: Vec<String>, probe_port: u16) -> IngestorConfig {
    IngestorConfig {
        database_url: Some("sqlite::memory:".to_string()),
        seeds,
        probe_port,
        rpc_timeout_ms: 1_000,
        ..Default::default()
    }
}

/// Bind and immediately release an ephemeral port.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("addr").port()
}

pub fn assert_close(actual: DateTime<Utc>, expected: DateTime<Utc>) {
    let delta = (actual - expected).num_milliseconds().abs();
    assert!(
        delta <= 5,
        "timestamps differ by {delta} ms: {actual} vs {expected}"
    );
}

#[derive(Clone)]
struct StubState {
    pods: Option<Value>,
    stats: Option<Value>,
    delay: Option<Duration>,
    gossip_hits: Arc<AtomicU32>,
    stats_hits: Arc<AtomicU32>,
}

/// A stub pNode speaking just enough JSON-RPC for the tests. `None` payloads
/// answer with an rpc-level error object.
pub struct StubNode {
    pub base_url: String,
    pub port: u16,
    gossip_hits: Arc<AtomicU32>,
    stats_hits: Arc<AtomicU32>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl StubNode {
    pub async fn start(pods: Option<Value>, stats: Option<Value>) -> Self {
        Self::start_with_delay(pods, stats, None).await
    }

    pub async fn start_with_delay(
        pods: Option<Value>,
        stats: Option<Value>,
        delay: Option<Duration>,
    ) -> Self {
        let gossip_hits = Arc::new(AtomicU32::new(0));
        let stats_hits = Arc::new(AtomicU32::new(0));
        let state = StubState {
            pods,
            stats,
            delay,
            gossip_hits: Arc::clone(&gossip_hits),
            stats_hits: Arc::clone(&stats_hits),
        };
        let app = Router::new().route("/rpc", post(rpc_handler)).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Self {
            base_url: format!("http://{addr}"),
            port: addr.port(),
            gossip_hits,
            stats_hits,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn gossip_count(&self) -> u32 {
        self.gossip_hits.load(Ordering::SeqCst)
    }

    pub fn stats_count(&self) -> u32 {
        self.stats_hits.load(Ordering::SeqCst)
    }
}

impl Drop for StubNode {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn rpc_handler(State(state): State<StubState>, Json(request): Json<Value>) -> Json<Value> {
    if let Some(delay) = state.delay {
        tokio::time::sleep(delay).await;
    }
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let (payload, hits) = match method {
        "get-pods-with-stats" => (&state.pods, &state.gossip_hits),
        "get-stats" => (&state.stats, &state.stats_hits),
        _ => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32601, "message": "method not found" }
            }))
        }
    };
    hits.fetch_add(1, Ordering::SeqCst);
    match payload {
        Some(result) => Json(json!({ "jsonrpc": "2.0", "id": 1, "result": result })),
        None => Json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32000, "message": "unavailable" }
        })),
    }
}
