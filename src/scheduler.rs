//! Interval-driven supervision of the ingestion, credits and cleanup loops.
//!
//! Three independent timers drive the three subsystems. Only the ingestion
//! loop sits behind the circuit breaker; credits and cleanup failures are
//! logged and retried on their own cadence.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cleanup;
use crate::config::IngestorConfig;
use crate::credits::CreditsClient;
use crate::errors::{IngestError, IngestResult};
use crate::health::{self, HealthContext};
use crate::ingest;
use crate::rpc::PodRpcClient;
use crate::snapshot;
use crate::store::{CreditsOutcome, Store};

const STARTUP_SEED_TIMEOUT: Duration = Duration::from_secs(5);
const STARTUP_SEEDS_TESTED: usize = 3;

const BREAKER_FAILURE_THRESHOLD: u32 = 5;
const BREAKER_PAUSE: Duration = Duration::from_secs(300);

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(600);
const HEARTBEAT_ALERT_AGE_SECS: i64 = 1_800;

const CLEANUP_RUN_TIMEOUT: Duration = Duration::from_secs(300);

/// Minimum spacing between credit history rows for one peer.
const CREDITS_MIN_SPACING: Duration = Duration::from_secs(7_200);

/// Shared observability state, read by the health endpoint and heartbeat.
pub struct ServiceStatus {
    started_monotonic: Instant,
    started_at: DateTime<Utc>,
    last_success: RwLock<Option<DateTime<Utc>>>,
    last_attempt: RwLock<Option<DateTime<Utc>>>,
    consecutive_failures: AtomicU32,
}

impl ServiceStatus {
    fn new() -> Self {
        Self {
            started_monotonic: Instant::now(),
            started_at: Utc::now(),
            last_success: RwLock::new(None),
            last_attempt: RwLock::new(None),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_monotonic.elapsed().as_secs()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.read()
    }

    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        *self.last_attempt.read()
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    fn record_attempt(&self, at: DateTime<Utc>) {
        *self.last_attempt.write() = Some(at);
    }

    fn record_success(&self, at: DateTime<Utc>) {
        *self.last_success.write() = Some(at);
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    fn record_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
    }
}

pub struct Scheduler {
    store: Store,
    rpc: PodRpcClient,
    credits: CreditsClient,
    config: Arc<IngestorConfig>,
    status: Arc<ServiceStatus>,
}

impl Scheduler {
    pub fn new(
        store: Store,
        rpc: PodRpcClient,
        credits: CreditsClient,
        config: Arc<IngestorConfig>,
    ) -> Self {
        Self {
            store,
            rpc,
            credits,
            config,
            status: Arc::new(ServiceStatus::new()),
        }
    }

    pub fn status(&self) -> Arc<ServiceStatus> {
        Arc::clone(&self.status)
    }

    /// Validate collaborators, run the first cycle of each loop, then hand
    /// control to the periodic workers until shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> IngestResult<()> {
        self.validate_startup().await?;

        // First runs happen immediately so a fresh deployment produces data
        // before the first timer fires.
        ingest_tick(&self.store, &self.rpc, &self.config, &self.status).await;
        credits_tick(&self.store, &self.credits).await;
        {
            // Non-blocking: a slow first cleanup must not delay ingestion.
            let store = self.store.clone();
            tokio::spawn(async move {
                cleanup_tick(&store).await;
            });
        }

        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        {
            let store = self.store.clone();
            let rpc = self.rpc.clone();
            let config = Arc::clone(&self.config);
            let status = Arc::clone(&self.status);
            let shutdown = shutdown.clone();
            let fut: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
                Box::pin(async move { ingest_worker(store, rpc, config, status, shutdown).await });
            workers.push(tokio::spawn(fut));
        }
        workers.push(tokio::spawn(credits_worker(
            self.store.clone(),
            self.credits.clone(),
            self.config.credits_interval(),
            shutdown.clone(),
        )));
        workers.push(tokio::spawn(cleanup_worker(
            self.store.clone(),
            self.config.cleanup_check_interval(),
            shutdown.clone(),
        )));
        workers.push(tokio::spawn(heartbeat_worker(
            Arc::clone(&self.status),
            shutdown.clone(),
        )));

        let health_context = HealthContext {
            store: self.store.clone(),
            status: Arc::clone(&self.status),
        };
        let health_port = self.config.health_port;
        let health_shutdown = shutdown.clone();
        workers.push(tokio::spawn(async move {
            if let Err(err) = health::serve(health_context, health_port, health_shutdown).await {
                error!(target: "health", error = %err, "health server terminated");
            }
        }));

        info!(
            target: "scheduler",
            seeds = self.config.seeds.len(),
            ingest_interval_secs = self.config.ingest_interval_secs,
            credits_interval_secs = self.config.credits_interval_secs,
            cleanup_check_interval_secs = self.config.cleanup_check_interval_secs,
            "ingestion service started"
        );

        let mut shutdown = shutdown;
        let _ = shutdown.wait_for(|stop| *stop).await;
        info!(target: "scheduler", "shutdown requested, stopping workers");

        for worker in workers {
            if let Err(err) = worker.await {
                debug!(target: "scheduler", ?err, "worker exited with error");
            }
        }

        self.store.close().await?;
        Ok(())
    }

    /// Store must answer a ping and at least one of the first seeds must
    /// serve gossip before the loops start.
    async fn validate_startup(&self) -> IngestResult<()> {
        self.store.ping().await?;
        self.store.ensure_schema().await?;

        let mut last_error: Option<String> = None;
        for seed in self.config.seeds.iter().take(STARTUP_SEEDS_TESTED) {
            match self
                .rpc
                .get_pods_with_timeout(seed, STARTUP_SEED_TIMEOUT)
                .await
            {
                Ok(pods) => {
                    info!(
                        target: "scheduler",
                        seed = %seed,
                        pods = pods.len(),
                        "seed validation succeeded"
                    );
                    return Ok(());
                }
                Err(err) => {
                    warn!(target: "scheduler", seed = %seed, error = %err, "seed validation failed");
                    last_error = Some(err.to_string());
                }
            }
        }
        Err(IngestError::Config(format!(
            "no seed responded during startup validation: {}",
            last_error.unwrap_or_else(|| "no seeds configured".to_string())
        )))
    }
}

/// One ingestion attempt plus its snapshot. Returns the consecutive failure
/// count when the cycle failed.
fn ingest_tick<'a>(
    store: &'a Store,
    rpc: &'a PodRpcClient,
    config: &'a IngestorConfig,
    status: &'a ServiceStatus,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Option<u32>> + Send + 'a>> {
    Box::pin(async move {
        status.record_attempt(Utc::now());
        match ingest::run_cycle(store, rpc, config).await {
            Ok(summary) => {
                status.record_success(Utc::now());
                // The run row is already finalized; losing the snapshot only
                // costs this cycle's aggregate.
                if let Err(err) =
                    snapshot::compute_and_store(store, &config.seeds, summary.run_id).await
                {
                    warn!(
                        target: "scheduler",
                        run_id = summary.run_id,
                        error = %err,
                        "snapshot computation failed"
                    );
                }
                None
            }
            Err(err) => {
                let failures = status.record_failure();
                error!(
                    target: "scheduler",
                    error = %err,
                    consecutive_failures = failures,
                    "ingestion cycle failed"
                );
                Some(failures)
            }
        }
    })
}

async fn ingest_worker(
    store: Store,
    rpc: PodRpcClient,
    config: Arc<IngestorConfig>,
    status: Arc<ServiceStatus>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(config.ingest_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // the immediate tick; the first cycle already ran

    let mut breaker_until: Option<Instant> = None;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        if let Some(until) = breaker_until {
            if Instant::now() < until {
                warn!(
                    target: "scheduler",
                    remaining_secs = (until - Instant::now()).as_secs(),
                    "circuit breaker open, skipping ingestion cycle"
                );
                continue;
            }
            info!(target: "scheduler", "circuit breaker expired, retrying ingestion");
            breaker_until = None;
        }
        if let Some(failures) = ingest_tick(&store, &rpc, config.as_ref(), status.as_ref()).await {
            if failures >= BREAKER_FAILURE_THRESHOLD {
                warn!(
                    target: "scheduler",
                    failures,
                    pause_secs = BREAKER_PAUSE.as_secs(),
                    "circuit breaker tripped, suspending ingestion"
                );
                breaker_until = Some(Instant::now() + BREAKER_PAUSE);
            }
        }
    }
    debug!(target: "scheduler", "ingest worker exiting");
}

async fn credits_tick(store: &Store, credits: &CreditsClient) {
    let entries = match credits.get_storage_credits().await {
        Ok(entries) => entries,
        Err(err) => {
            warn!(target: "credits", error = %err, "credits fetch failed");
            return;
        }
    };

    let now = Utc::now();
    let mut recorded = 0u32;
    let mut throttled = 0u32;
    let mut unknown = 0u32;
    let mut errors = 0u32;
    for entry in entries {
        match store
            .record_pod_credits(&entry.pod_id, entry.credits, now, CREDITS_MIN_SPACING)
            .await
        {
            Ok(CreditsOutcome::Recorded) => recorded += 1,
            Ok(CreditsOutcome::Throttled) => throttled += 1,
            Ok(CreditsOutcome::UnknownPeer) => unknown += 1,
            Err(err) => {
                errors += 1;
                warn!(
                    target: "credits",
                    pubkey = %entry.pod_id,
                    error = %err,
                    "credits persistence failed"
                );
            }
        }
    }
    info!(
        target: "credits",
        recorded,
        throttled,
        unknown,
        errors,
        "credits cycle finished"
    );
}

async fn credits_worker(
    store: Store,
    credits: CreditsClient,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => credits_tick(&store, &credits).await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!(target: "scheduler", "credits worker exiting");
}

async fn cleanup_tick(store: &Store) {
    match time::timeout(CLEANUP_RUN_TIMEOUT, cleanup::run_cleanup(store)).await {
        Ok(Ok(report)) => {
            if report.triggered {
                info!(
                    target: "cleanup",
                    deleted = report.total_deleted(),
                    "cleanup pass finished"
                );
            }
        }
        Ok(Err(err)) => warn!(target: "cleanup", error = %err, "cleanup pass failed"),
        Err(_) => warn!(
            target: "cleanup",
            timeout_secs = CLEANUP_RUN_TIMEOUT.as_secs(),
            "cleanup pass timed out, result discarded"
        ),
    }
}

async fn cleanup_worker(store: Store, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => cleanup_tick(&store).await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!(target: "scheduler", "cleanup worker exiting");
}

async fn heartbeat_worker(status: Arc<ServiceStatus>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = time::interval(HEARTBEAT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let last_success = status.last_success();
                let reference = last_success.unwrap_or_else(|| status.started_at());
                let age_secs = (Utc::now() - reference).num_seconds();
                if age_secs > HEARTBEAT_ALERT_AGE_SECS {
                    error!(
                        target: "scheduler",
                        uptime_secs = status.uptime_seconds(),
                        last_success = ?last_success,
                        consecutive_failures = status.failure_count(),
                        stale_secs = age_secs,
                        "no successful ingestion inside the alert window"
                    );
                } else {
                    info!(
                        target: "scheduler",
                        uptime_secs = status.uptime_seconds(),
                        last_success = ?last_success,
                        consecutive_failures = status.failure_count(),
                        "heartbeat"
                    );
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!(target: "scheduler", "heartbeat worker exiting");
}
