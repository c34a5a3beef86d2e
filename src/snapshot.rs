//! Per-cycle network aggregation.
//!
//! Reads every peer (paged) together with its most recent gossip observation
//! and stats sample, and writes exactly one snapshot row with all children
//! for the given ingestion run.

use std::collections::HashMap;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::warn;

use crate::errors::IngestResult;
use crate::store::{CreditsQuantiles, SeedVisibilityCounts, SnapshotScalars, Store};

const PAGE_SIZE: u64 = 500;
/// Safety bound; at 500 peers per page this allows fifty million peers.
const MAX_PAGES: u64 = 100_000;

const VISIBILITY_WINDOW_SECS: i64 = 600;
const FRESH_WITHIN_SECS: i64 = 30;
const STALE_WITHIN_SECS: i64 = 120;

const UNKNOWN_VERSION: &str = "unknown";

/// Ceiling-index percentile over a sorted slice: `idx = ceil(p/100 * n) - 1`,
/// clamped into range. Pure; `None` only for an empty slice.
pub fn percentile<T: Copy>(sorted: &[T], p: f64) -> Option<T> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len() as f64;
    let idx = ((p / 100.0 * n).ceil() as isize - 1).clamp(0, sorted.len() as isize - 1) as usize;
    Some(sorted[idx])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Freshness {
    Fresh,
    Stale,
    Offline,
}

// `last_seen` comes from the seed's clock while `now_unix` is ours; skew
// between the two shifts peers across buckets.
fn freshness_bucket(now_unix: i64, last_seen: Option<i64>) -> Freshness {
    let Some(seen) = last_seen else {
        return Freshness::Offline;
    };
    let age = now_unix - seen;
    if age < FRESH_WITHIN_SECS {
        Freshness::Fresh
    } else if age < STALE_WITHIN_SECS {
        Freshness::Stale
    } else {
        Freshness::Offline
    }
}

/// Compute and persist the snapshot for `run_id`. Returns the snapshot id.
pub async fn compute_and_store(
    store: &Store,
    seeds: &[String],
    run_id: i64,
) -> IngestResult<i64> {
    let now = Utc::now();

    let mut total_nodes = 0i32;
    let mut reachable_nodes = 0i32;
    let mut nodes_backed_off = 0i32;
    let mut nodes_failing_stats = 0i32;
    let mut total_storage_committed = 0i64;
    let mut total_storage_used = 0i64;
    let mut uptimes: Vec<i64> = Vec::new();
    let mut credit_values: Vec<f64> = Vec::new();
    let mut versions: HashMap<String, i32> = HashMap::new();

    let mut page = 0u64;
    loop {
        if page >= MAX_PAGES {
            warn!(target: "snapshot", page, "peer paging bound reached, truncating aggregation");
            break;
        }
        let peers = store.pnodes_page(page, PAGE_SIZE).await?;
        if peers.is_empty() {
            break;
        }
        let page_len = peers.len();

        for peer in peers {
            total_nodes += 1;
            if peer.is_public {
                reachable_nodes += 1;
            }
            if peer.failure_count > 0 {
                nodes_backed_off += 1;
                if !peer.is_public {
                    nodes_failing_stats += 1;
                }
            }
            if let Some(credits) = peer.latest_credits {
                credit_values.push(credits);
            }

            let version = match store.latest_gossip_observation(peer.id).await? {
                Some(observation) => {
                    if let Some(committed) = observation.storage_committed {
                        total_storage_committed = total_storage_committed.saturating_add(committed);
                    }
                    if let Some(used) = observation.storage_used {
                        total_storage_used = total_storage_used.saturating_add(used);
                    }
                    observation
                        .version
                        .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
                }
                None => UNKNOWN_VERSION.to_string(),
            };
            *versions.entry(version).or_default() += 1;

            if let Some(sample) = store.find_latest_stats_sample(peer.id).await? {
                if let Some(uptime) = sample.uptime_seconds {
                    if uptime > 0 {
                        uptimes.push(uptime);
                    }
                }
            }
        }

        if (page_len as u64) < PAGE_SIZE {
            break;
        }
        page += 1;
    }

    uptimes.sort_unstable();
    credit_values.sort_by(f64::total_cmp);

    let scalars = SnapshotScalars {
        total_nodes,
        reachable_nodes,
        unreachable_nodes: total_nodes - reachable_nodes,
        reachable_percent: if total_nodes == 0 {
            0.0
        } else {
            f64::from(reachable_nodes) / f64::from(total_nodes) * 100.0
        },
        median_uptime_seconds: percentile(&uptimes, 50.0).unwrap_or(0),
        p90_uptime_seconds: percentile(&uptimes, 90.0).unwrap_or(0),
        total_storage_committed,
        total_storage_used,
        nodes_backed_off,
        nodes_failing_stats,
    };

    let since = now - ChronoDuration::seconds(VISIBILITY_WINDOW_SECS);
    let now_unix = now.timestamp();
    let mut seed_visibility = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let observations = store.recent_seed_observations(seed, since).await?;
        let mut last_seen_by_peer: HashMap<i64, Option<i64>> = HashMap::new();
        for observation in observations {
            let entry = last_seen_by_peer.entry(observation.pnode_id).or_insert(None);
            if observation.last_seen_timestamp > *entry {
                *entry = observation.last_seen_timestamp;
            }
        }

        let mut fresh = 0i32;
        let mut stale = 0i32;
        let mut offline = 0i32;
        for last_seen in last_seen_by_peer.values() {
            match freshness_bucket(now_unix, *last_seen) {
                Freshness::Fresh => fresh += 1,
                Freshness::Stale => stale += 1,
                Freshness::Offline => offline += 1,
            }
        }
        seed_visibility.push(SeedVisibilityCounts {
            seed_base_url: seed.clone(),
            nodes_seen: last_seen_by_peer.len() as i32,
            fresh,
            stale,
            offline,
        });
    }

    let credits = CreditsQuantiles {
        median_credits: percentile(&credit_values, 50.0).unwrap_or(0.0),
        p90_credits: percentile(&credit_values, 90.0).unwrap_or(0.0),
    };

    let mut version_stats: Vec<(String, i32)> = versions.into_iter().collect();
    version_stats.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    store
        .insert_network_snapshot(run_id, now, scalars, &version_stats, &seed_visibility, credits)
        .await
}
