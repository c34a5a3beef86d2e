//! Threshold-triggered retention for the high-volume tables.
//!
//! Each table has a row budget. Once any table exceeds 90% of its budget, all
//! tables above 70% of their budget are trimmed back to 70% by deleting their
//! oldest rows. Deletion always uses a strict `< cutoff` on the table's time
//! column, so no row newer than any retained row is ever removed.

use tracing::{debug, info, warn};

use crate::errors::IngestResult;
use crate::store::{CleanupTable, Store};

const TRIGGER_PERCENT: u64 = 90;
const TARGET_PERCENT: u64 = 70;

#[derive(Clone, Copy, Debug)]
pub struct RetentionPolicy {
    pub table: CleanupTable,
    pub threshold: u64,
}

impl RetentionPolicy {
    pub fn trigger(&self) -> u64 {
        self.threshold * TRIGGER_PERCENT / 100
    }

    pub fn target(&self) -> u64 {
        self.threshold * TARGET_PERCENT / 100
    }
}

pub const RETENTION_POLICIES: [RetentionPolicy; 3] = [
    RetentionPolicy {
        table: CleanupTable::GossipObservation,
        threshold: 1_000_000,
    },
    RetentionPolicy {
        table: CleanupTable::StatsSample,
        threshold: 500_000,
    },
    RetentionPolicy {
        table: CleanupTable::IngestionRun,
        threshold: 10_000,
    },
];

#[derive(Clone, Debug, Default)]
pub struct CleanupReport {
    pub triggered: bool,
    pub deleted: Vec<(CleanupTable, u64)>,
}

impl CleanupReport {
    pub fn total_deleted(&self) -> u64 {
        self.deleted.iter().map(|(_, count)| count).sum()
    }
}

/// One retention pass with the production policies.
pub async fn run_cleanup(store: &Store) -> IngestResult<CleanupReport> {
    run_cleanup_with_policies(store, &RETENTION_POLICIES).await
}

/// One retention pass. Counts every table, and if any crossed its trigger,
/// trims each table that sits above its target. Safe to re-run: a second pass
/// over the same data deletes nothing.
pub async fn run_cleanup_with_policies(
    store: &Store,
    policies: &[RetentionPolicy],
) -> IngestResult<CleanupReport> {
    let mut counts = Vec::with_capacity(policies.len());
    for policy in policies {
        let count = store.count_rows(policy.table).await?;
        counts.push((*policy, count));
    }

    let triggered = counts
        .iter()
        .any(|(policy, count)| *count > policy.trigger());
    if !triggered {
        debug!(target: "cleanup", "all tables under trigger thresholds");
        return Ok(CleanupReport::default());
    }

    let mut report = CleanupReport {
        triggered: true,
        deleted: Vec::new(),
    };

    for (policy, count) in counts {
        let target = policy.target();
        if count <= target {
            continue;
        }
        let excess = count - target;
        let Some(cutoff) = store.find_nth_oldest(policy.table, excess).await? else {
            warn!(
                target: "cleanup",
                table = policy.table.table_name(),
                excess,
                "could not locate retention cutoff"
            );
            continue;
        };
        let deleted = store.delete_older_than(policy.table, cutoff).await?;
        info!(
            target: "cleanup",
            table = policy.table.table_name(),
            rows = count,
            deleted,
            cutoff = %cutoff,
            "trimmed table to retention target"
        );
        report.deleted.push((policy.table, deleted));
    }

    Ok(report)
}
