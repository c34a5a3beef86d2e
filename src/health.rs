//! Liveness endpoint for operators and orchestration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::errors::IngestResult;
use crate::scheduler::ServiceStatus;
use crate::store::Store;

#[derive(Clone)]
pub struct HealthContext {
    pub store: Store,
    pub status: Arc<ServiceStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthBody {
    status: &'static str,
    /// Seconds since process start.
    uptime: u64,
    last_successful_ingestion: Option<DateTime<Utc>>,
    last_ingestion_attempt: Option<DateTime<Utc>>,
    ingestion_failure_count: u32,
    database: &'static str,
    timestamp: DateTime<Utc>,
}

async fn health(State(context): State<HealthContext>) -> (StatusCode, Json<HealthBody>) {
    let database_ok = context.store.ping().await.is_ok();
    let body = HealthBody {
        status: if database_ok { "ok" } else { "degraded" },
        uptime: context.status.uptime_seconds(),
        last_successful_ingestion: context.status.last_success(),
        last_ingestion_attempt: context.status.last_attempt(),
        ingestion_failure_count: context.status.failure_count(),
        database: if database_ok { "connected" } else { "unreachable" },
        timestamp: Utc::now(),
    };
    let code = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (code, Json(body))
}

pub fn router(context: HealthContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(context)
}

/// Serve `/health` until the shutdown channel flips.
pub async fn serve(
    context: HealthContext,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> IngestResult<()> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    let listener = TcpListener::bind(addr).await?;
    info!(target: "health", %addr, "health endpoint listening");
    axum::serve(listener, router(context))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;
    Ok(())
}
