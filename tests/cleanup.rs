//! Retention behavior over a live (in-memory) store.

mod support;

use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::{EntityTrait, PaginatorTrait};

use pnodewatch::cleanup::{run_cleanup_with_policies, RetentionPolicy};
use pnodewatch::store::entity::prelude::{
    CreditsStat, NetworkSnapshot, RunSeedStats, SeedVisibility, VersionStat,
};
use pnodewatch::store::{
    CleanupTable, CreditsQuantiles, NewGossipObservation, SeedCounters, SeedVisibilityCounts,
    SnapshotScalars, Store,
};

use support::{assert_close, memory_store};

async fn seed_observations(store: &Store, count: i64) -> chrono::DateTime<Utc> {
    let peer = store
        .upsert_pnode("A", true, Utc::now())
        .await
        .expect("peer");
    let base = Utc::now() - ChronoDuration::seconds(100_000);
    for i in 0..count {
        store
            .insert_gossip_observation(NewGossipObservation {
                pnode_id: peer.id,
                seed_base_url: "http://seed.example".to_string(),
                observed_at: base + ChronoDuration::seconds(i),
                address: "10.0.0.1:5000".to_string(),
                version: None,
                last_seen_timestamp: None,
                storage_committed: None,
                storage_used: None,
                storage_usage_percent: None,
                is_public: None,
            })
            .await
            .expect("observation");
    }
    base
}

#[tokio::test]
async fn trims_oldest_rows_back_to_target() {
    let store = memory_store().await;
    // 95 rows against a budget of 100: over the 90% trigger, so the table is
    // trimmed to the 70% target by deleting the 25 oldest rows.
    let base = seed_observations(&store, 95).await;

    let policies = [RetentionPolicy {
        table: CleanupTable::GossipObservation,
        threshold: 100,
    }];
    let report = run_cleanup_with_policies(&store, &policies)
        .await
        .expect("cleanup");

    assert!(report.triggered);
    assert_eq!(report.total_deleted(), 25);
    assert_eq!(
        store
            .count_rows(CleanupTable::GossipObservation)
            .await
            .expect("count"),
        70
    );

    // The retained minimum is the 26th oldest of the original set; nothing
    // newer than a deleted row survives.
    let oldest = store
        .find_nth_oldest(CleanupTable::GossipObservation, 0)
        .await
        .expect("query")
        .expect("rows remain");
    assert_close(oldest, base + ChronoDuration::seconds(25));
}

#[tokio::test]
async fn below_trigger_nothing_is_deleted() {
    let store = memory_store().await;
    seed_observations(&store, 80).await;

    let policies = [RetentionPolicy {
        table: CleanupTable::GossipObservation,
        threshold: 100,
    }];
    let report = run_cleanup_with_policies(&store, &policies)
        .await
        .expect("cleanup");

    assert!(!report.triggered);
    assert_eq!(report.total_deleted(), 0);
    assert_eq!(
        store
            .count_rows(CleanupTable::GossipObservation)
            .await
            .expect("count"),
        80
    );
}

#[tokio::test]
async fn second_pass_deletes_nothing_more() {
    let store = memory_store().await;
    seed_observations(&store, 95).await;

    let policies = [RetentionPolicy {
        table: CleanupTable::GossipObservation,
        threshold: 100,
    }];
    let first = run_cleanup_with_policies(&store, &policies)
        .await
        .expect("cleanup");
    assert!(first.triggered);

    let second = run_cleanup_with_policies(&store, &policies)
        .await
        .expect("cleanup");
    assert!(!second.triggered);
    assert_eq!(second.total_deleted(), 0);
    assert_eq!(
        store
            .count_rows(CleanupTable::GossipObservation)
            .await
            .expect("count"),
        70
    );
}

#[tokio::test]
async fn run_deletion_cascades_to_children() {
    let store = memory_store().await;

    let started_at = Utc::now() - ChronoDuration::hours(1);
    let run_id = store.insert_ingestion_run(started_at).await.expect("run");
    store
        .insert_run_seed_stats(
            run_id,
            &[SeedCounters {
                seed_base_url: "http://seed.example".to_string(),
                attempted: 1,
                backoff: 0,
                success: 1,
                failed: 0,
                observed: 1,
            }],
        )
        .await
        .expect("seed stats");
    store
        .insert_network_snapshot(
            run_id,
            started_at,
            SnapshotScalars::default(),
            &[("1.0".to_string(), 1)],
            &[SeedVisibilityCounts {
                seed_base_url: "http://seed.example".to_string(),
                nodes_seen: 1,
                fresh: 1,
                stale: 0,
                offline: 0,
            }],
            CreditsQuantiles::default(),
        )
        .await
        .expect("snapshot");

    let deleted = store
        .delete_older_than(CleanupTable::IngestionRun, Utc::now())
        .await
        .expect("delete");
    assert_eq!(deleted, 1);

    let connection = store.connection();
    assert_eq!(NetworkSnapshot::find().count(connection).await.expect("count"), 0);
    assert_eq!(RunSeedStats::find().count(connection).await.expect("count"), 0);
    assert_eq!(SeedVisibility::find().count(connection).await.expect("count"), 0);
    assert_eq!(VersionStat::find().count(connection).await.expect("count"), 0);
    assert_eq!(CreditsStat::find().count(connection).await.expect("count"), 0);
}
