//! The ingestion cycle: gossip collection across all seeds, probe
//! deduplication, and the batched stats fan-out with per-peer backoff.
//!
//! Error handling is deliberately lopsided. Cycle-level store operations
//! (creating and finishing the run row, the stale-backoff sweep) propagate
//! and fail the cycle; everything scoped to a single seed or a single peer is
//! logged, counted and skipped so that one bad actor can never starve the
//! rest of the network of coverage.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::IngestorConfig;
use crate::errors::IngestResult;
use crate::rates::{self, DerivedRates};
use crate::rpc::{probe_base_url, PodInfo, PodRpcClient};
use crate::store::{
    BackoffPatch, NewGossipObservation, NewStatsSample, RunCounters, SeedCounters, Store,
};

/// Delay before a successfully probed peer becomes eligible again.
const SUCCESS_REPROBE_DELAY_SECS: i64 = 60;
const BACKOFF_BASE_SECS: i64 = 60;
const BACKOFF_MAX_EXPONENT: u32 = 5;
/// Backoff windows that expired this long ago are wiped in Stage A.
const STALE_BACKOFF_RESET_HOURS: i64 = 24;

/// Exponential probe backoff, capped at `60 * 2^5` seconds.
pub fn backoff_delay_secs(failure_count: i32) -> i64 {
    let exponent = (failure_count.max(0) as u32).min(BACKOFF_MAX_EXPONENT);
    BACKOFF_BASE_SECS * (1i64 << exponent)
}

/// One deduplicated probe assignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeTask {
    pub pnode_id: i64,
    /// Seed whose gossip branch produced this task; wins dedup attribution.
    pub seed_base_url: String,
    pub gossip_address: String,
    pub probe_base_url: String,
    /// Failure count observed at eligibility time. The failure path continues
    /// from this value even when the delayed reset already cleared the row.
    pub failure_count: i32,
}

/// What one cycle did, for the scheduler and the run row.
#[derive(Clone, Debug)]
pub struct CycleSummary {
    pub run_id: i64,
    pub started_at: DateTime<Utc>,
    pub total_pods: i32,
    pub gossip_observations: i32,
    pub totals: RunCounters,
    pub seed_stats: Vec<SeedCounters>,
}

#[derive(Debug)]
struct SeedGossip {
    seed_base_url: String,
    observed: HashSet<i64>,
    backoff: HashSet<i64>,
    probe_tasks: Vec<ProbeTask>,
    gossip_rows: i32,
}

impl SeedGossip {
    fn empty(seed_base_url: &str) -> Self {
        Self {
            seed_base_url: seed_base_url.to_string(),
            observed: HashSet::new(),
            backoff: HashSet::new(),
            probe_tasks: Vec::new(),
            gossip_rows: 0,
        }
    }
}

enum PodOutcome {
    Observed {
        pnode_id: i64,
        probe: Option<ProbeTask>,
        in_backoff: bool,
    },
    Failed,
}

/// Run one full ingestion cycle against every configured seed.
pub async fn run_cycle(
    store: &Store,
    rpc: &PodRpcClient,
    config: &IngestorConfig,
) -> IngestResult<CycleSummary> {
    let cycle_start = Utc::now();
    let run_id = store.insert_ingestion_run(cycle_start).await?;

    // Stage A: backoff hygiene.
    let stale_cutoff = cycle_start - ChronoDuration::hours(STALE_BACKOFF_RESET_HOURS);
    let reset = store.reset_stale_backoffs(stale_cutoff).await?;
    if reset > 0 {
        info!(target: "ingest", reset, "cleared stale probe backoffs");
    }

    // Stage B: gossip fan-out, bounded per config, one outcome per seed in
    // configuration order.
    let mut seed_gossip_futures: Vec<
        std::pin::Pin<Box<dyn std::future::Future<Output = SeedGossip> + Send + '_>>,
    > = Vec::with_capacity(config.seeds.len());
    for seed in &config.seeds {
        seed_gossip_futures.push(Box::pin(collect_seed_gossip(
            store, rpc, config, seed, cycle_start,
        )));
    }
    let seed_outcomes: Vec<SeedGossip> = stream::iter(seed_gossip_futures)
        .buffered(config.seed_concurrency)
        .collect()
        .await;

    // Stage C: one probe per peer per cycle, first seed wins.
    let mut global_observed: HashSet<i64> = HashSet::new();
    let mut global_backoff: HashSet<i64> = HashSet::new();
    let mut gossip_rows = 0i32;
    for outcome in &seed_outcomes {
        global_observed.extend(outcome.observed.iter().copied());
        global_backoff.extend(outcome.backoff.iter().copied());
        gossip_rows += outcome.gossip_rows;
    }
    let tasks = dedup_probe_tasks(&seed_outcomes);

    // Stage D: probe fan-out in sequential batches.
    let mut success_by_seed: HashMap<&str, i32> = HashMap::new();
    let mut failed_by_seed: HashMap<&str, i32> = HashMap::new();
    let mut attempted_by_seed: HashMap<&str, i32> = HashMap::new();
    let mut total_success = 0i32;
    let mut total_failed = 0i32;

    for batch in tasks.chunks(config.probe_batch_size) {
        let results = join_all(
            batch
                .iter()
                .map(|task| probe_pnode(store, rpc, task, cycle_start)),
        )
        .await;
        for (task, succeeded) in batch.iter().zip(results) {
            *attempted_by_seed.entry(task.seed_base_url.as_str()).or_default() += 1;
            if succeeded {
                total_success += 1;
                *success_by_seed.entry(task.seed_base_url.as_str()).or_default() += 1;
            } else {
                total_failed += 1;
                *failed_by_seed.entry(task.seed_base_url.as_str()).or_default() += 1;
            }
        }
    }

    // Stage E: summary.
    let totals = RunCounters {
        attempted: tasks.len() as i32,
        success: total_success,
        failed: total_failed,
        backoff: global_backoff.len() as i32,
        observed: global_observed.len() as i32,
    };
    let seed_stats: Vec<SeedCounters> = seed_outcomes
        .iter()
        .map(|outcome| {
            let seed = outcome.seed_base_url.as_str();
            SeedCounters {
                seed_base_url: outcome.seed_base_url.clone(),
                attempted: attempted_by_seed.get(seed).copied().unwrap_or(0),
                backoff: outcome.backoff.len() as i32,
                success: success_by_seed.get(seed).copied().unwrap_or(0),
                failed: failed_by_seed.get(seed).copied().unwrap_or(0),
                observed: outcome.observed.len() as i32,
            }
        })
        .collect();

    let finished_at = Utc::now();
    store.finish_ingestion_run(run_id, finished_at, totals).await?;
    store.insert_run_seed_stats(run_id, &seed_stats).await?;

    info!(
        target: "ingest",
        run_id,
        observed = totals.observed,
        attempted = totals.attempted,
        success = totals.success,
        failed = totals.failed,
        backoff = totals.backoff,
        elapsed_ms = (finished_at - cycle_start).num_milliseconds(),
        "ingestion cycle finished"
    );

    Ok(CycleSummary {
        run_id,
        started_at: cycle_start,
        total_pods: gossip_rows,
        gossip_observations: gossip_rows,
        totals,
        seed_stats,
    })
}

fn dedup_probe_tasks(outcomes: &[SeedGossip]) -> Vec<ProbeTask> {
    let mut claimed: HashSet<i64> = HashSet::new();
    let mut tasks = Vec::new();
    for outcome in outcomes {
        for task in &outcome.probe_tasks {
            if claimed.insert(task.pnode_id) {
                tasks.push(task.clone());
            }
        }
    }
    tasks
}

/// Stage B for one seed. Any failure here is the seed's alone: the outcome
/// degrades to zero counters and the cycle moves on.
async fn collect_seed_gossip(
    store: &Store,
    rpc: &PodRpcClient,
    config: &IngestorConfig,
    seed_base_url: &str,
    cycle_start: DateTime<Utc>,
) -> SeedGossip {
    let mut outcome = SeedGossip::empty(seed_base_url);

    let pods = match rpc.get_pods(seed_base_url).await {
        Ok(pods) => pods,
        Err(err) => {
            warn!(
                target: "ingest",
                seed = %seed_base_url,
                error = %err,
                "gossip fetch failed, seed contributes nothing this cycle"
            );
            return outcome;
        }
    };

    let results = join_all(pods.into_iter().filter_map(|pod| {
        // Entries without a pubkey cannot be identified; drop them here so
        // they produce neither an observation nor a probe.
        let pubkey = pod.pubkey.clone()?;
        Some(ingest_pod(
            store,
            config,
            seed_base_url,
            cycle_start,
            pubkey,
            pod,
        ))
    }))
    .await;

    for result in results {
        match result {
            PodOutcome::Observed {
                pnode_id,
                probe,
                in_backoff,
            } => {
                outcome.observed.insert(pnode_id);
                outcome.gossip_rows += 1;
                if in_backoff {
                    outcome.backoff.insert(pnode_id);
                }
                if let Some(task) = probe {
                    outcome.probe_tasks.push(task);
                }
            }
            PodOutcome::Failed => {}
        }
    }

    debug!(
        target: "ingest",
        seed = %seed_base_url,
        observed = outcome.observed.len(),
        backoff = outcome.backoff.len(),
        eligible = outcome.probe_tasks.len(),
        "seed gossip collected"
    );
    outcome
}

async fn ingest_pod(
    store: &Store,
    config: &IngestorConfig,
    seed_base_url: &str,
    cycle_start: DateTime<Utc>,
    pubkey: String,
    pod: PodInfo,
) -> PodOutcome {
    let peer = match store
        .upsert_pnode(&pubkey, pod.is_public.unwrap_or(false), cycle_start)
        .await
    {
        Ok(peer) => peer,
        Err(err) => {
            warn!(
                target: "ingest",
                seed = %seed_base_url,
                pubkey = %pubkey,
                error = %err,
                "peer upsert failed"
            );
            return PodOutcome::Failed;
        }
    };

    // The observation is written before the peer is considered for probing.
    let observation = NewGossipObservation {
        pnode_id: peer.id,
        seed_base_url: seed_base_url.to_string(),
        observed_at: cycle_start,
        address: pod.address.clone(),
        version: pod.version.clone(),
        last_seen_timestamp: pod.last_seen_timestamp,
        storage_committed: pod.storage_committed,
        storage_used: pod.storage_used,
        storage_usage_percent: pod.storage_usage_percent,
        is_public: pod.is_public,
    };
    if let Err(err) = store.insert_gossip_observation(observation).await {
        warn!(
            target: "ingest",
            seed = %seed_base_url,
            pubkey = %pubkey,
            error = %err,
            "gossip observation insert failed"
        );
        return PodOutcome::Failed;
    }

    // Eligibility: a future window means backoff; an expired window with a
    // nonzero failure count is reset late, now, before the probe.
    let mut in_backoff = false;
    match peer.next_stats_allowed_at {
        Some(allowed_at) if allowed_at > cycle_start => {
            in_backoff = true;
        }
        Some(_) if peer.failure_count > 0 => {
            let patch = BackoffPatch {
                failure_count: Some(0),
                next_stats_allowed_at: Some(None),
                ..Default::default()
            };
            if let Err(err) = store.update_backoff(peer.id, patch).await {
                warn!(
                    target: "ingest",
                    pubkey = %pubkey,
                    error = %err,
                    "delayed backoff reset failed"
                );
            }
        }
        _ => {}
    }

    let probe = (!in_backoff).then(|| ProbeTask {
        pnode_id: peer.id,
        seed_base_url: seed_base_url.to_string(),
        gossip_address: pod.address.clone(),
        probe_base_url: probe_base_url(&pod.address, config.probe_port),
        failure_count: peer.failure_count,
    });

    PodOutcome::Observed {
        pnode_id: peer.id,
        probe,
        in_backoff,
    }
}

/// Stage D for one peer. Returns whether the probe (and its persistence)
/// succeeded; either way the peer's backoff state is updated.
async fn probe_pnode(
    store: &Store,
    rpc: &PodRpcClient,
    task: &ProbeTask,
    cycle_start: DateTime<Utc>,
) -> bool {
    match rpc.get_stats(&task.probe_base_url).await {
        Ok(reading) => {
            let rates = match store.find_latest_stats_sample(task.pnode_id).await {
                Ok(Some(prior)) => rates::derive_rates(&prior, cycle_start, &reading),
                Ok(None) => DerivedRates::default(),
                Err(err) => {
                    warn!(
                        target: "ingest",
                        pnode_id = task.pnode_id,
                        error = %err,
                        "prior sample lookup failed, storing null rates"
                    );
                    DerivedRates::default()
                }
            };

            let sample = NewStatsSample {
                pnode_id: task.pnode_id,
                seed_base_url: task.seed_base_url.clone(),
                timestamp: cycle_start,
                uptime_seconds: reading.uptime,
                packets_received: reading.packets_received,
                packets_sent: reading.packets_sent,
                total_bytes: reading.total_bytes,
                active_streams: reading.active_streams,
                packets_in_per_sec: rates.packets_in_per_sec,
                packets_out_per_sec: rates.packets_out_per_sec,
            };
            if let Err(err) = store.insert_stats_sample(sample).await {
                warn!(
                    target: "ingest",
                    pnode_id = task.pnode_id,
                    error = %err,
                    "stats sample insert failed"
                );
                return false;
            }

            let patch = BackoffPatch {
                failure_count: Some(0),
                last_stats_attempt_at: Some(cycle_start),
                last_stats_success_at: Some(cycle_start),
                next_stats_allowed_at: Some(Some(
                    cycle_start + ChronoDuration::seconds(SUCCESS_REPROBE_DELAY_SECS),
                )),
            };
            if let Err(err) = store.update_backoff(task.pnode_id, patch).await {
                warn!(
                    target: "ingest",
                    pnode_id = task.pnode_id,
                    error = %err,
                    "post-probe peer update failed"
                );
                return false;
            }
            true
        }
        Err(err) => {
            debug!(
                target: "ingest",
                pnode_id = task.pnode_id,
                url = %task.probe_base_url,
                error = %err,
                "stats probe failed"
            );

            let new_count = task.failure_count.saturating_add(1);
            let delay = backoff_delay_secs(new_count);
            let patch = BackoffPatch {
                failure_count: Some(new_count),
                last_stats_attempt_at: Some(cycle_start),
                next_stats_allowed_at: Some(Some(
                    cycle_start + ChronoDuration::seconds(delay),
                )),
                ..Default::default()
            };
            if let Err(store_err) = store.update_backoff(task.pnode_id, patch).await {
                warn!(
                    target: "ingest",
                    pnode_id = task.pnode_id,
                    error = %store_err,
                    "backoff update failed after probe failure"
                );
            }
            false
        }
    }
}
