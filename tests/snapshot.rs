//! Snapshot aggregation against a seeded store.

mod support;

use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use pnodewatch::snapshot::compute_and_store;
use pnodewatch::store::entity::prelude::{
    CreditsStat, NetworkSnapshot, SeedVisibility, VersionStat,
};
use pnodewatch::store::entity::{credits_stat, seed_visibility, version_stat};
use pnodewatch::store::{BackoffPatch, NewGossipObservation, NewStatsSample, Store};

use support::memory_store;

const SEED: &str = "http://seed.example";

async fn insert_observation(
    store: &Store,
    pnode_id: i64,
    version: Option<&str>,
    last_seen: Option<i64>,
    committed: Option<i64>,
    used: Option<i64>,
) {
    store
        .insert_gossip_observation(NewGossipObservation {
            pnode_id,
            seed_base_url: SEED.to_string(),
            observed_at: Utc::now(),
            address: "10.0.0.1:5000".to_string(),
            version: version.map(str::to_string),
            last_seen_timestamp: last_seen,
            storage_committed: committed,
            storage_used: used,
            storage_usage_percent: None,
            is_public: None,
        })
        .await
        .expect("observation");
}

async fn insert_sample(store: &Store, pnode_id: i64, uptime: Option<i64>) {
    store
        .insert_stats_sample(NewStatsSample {
            pnode_id,
            seed_base_url: SEED.to_string(),
            timestamp: Utc::now(),
            uptime_seconds: uptime,
            packets_received: None,
            packets_sent: None,
            total_bytes: None,
            active_streams: None,
            packets_in_per_sec: None,
            packets_out_per_sec: None,
        })
        .await
        .expect("sample");
}

#[tokio::test]
async fn empty_network_produces_zero_snapshot() {
    let store = memory_store().await;
    let run_id = store
        .insert_ingestion_run(Utc::now())
        .await
        .expect("run");

    let snapshot_id = compute_and_store(&store, &[SEED.to_string()], run_id)
        .await
        .expect("snapshot");

    let snapshot = NetworkSnapshot::find_by_id(snapshot_id)
        .one(store.connection())
        .await
        .expect("query")
        .expect("snapshot row");
    assert_eq!(snapshot.total_nodes, 0);
    assert_eq!(snapshot.reachable_nodes, 0);
    assert_eq!(snapshot.unreachable_nodes, 0);
    assert_eq!(snapshot.reachable_percent, 0.0);
    assert_eq!(snapshot.median_uptime_seconds, 0);
    assert_eq!(snapshot.p90_uptime_seconds, 0);
    assert_eq!(snapshot.total_storage_committed, 0);
    assert_eq!(snapshot.total_storage_used, 0);

    let visibility = SeedVisibility::find()
        .filter(seed_visibility::Column::SnapshotId.eq(snapshot_id))
        .all(store.connection())
        .await
        .expect("query");
    assert_eq!(visibility.len(), 1);
    assert_eq!(visibility[0].nodes_seen, 0);

    let credits = CreditsStat::find()
        .filter(credits_stat::Column::SnapshotId.eq(snapshot_id))
        .one(store.connection())
        .await
        .expect("query")
        .expect("credits row");
    assert_eq!(credits.median_credits, 0.0);
    assert_eq!(credits.p90_credits, 0.0);
}

#[tokio::test]
async fn aggregates_reachability_storage_versions_and_quantiles() {
    let store = memory_store().await;
    let now_unix = Utc::now().timestamp();

    // A: public, fresh, versioned, with stats and credits.
    let peer_a = store
        .upsert_pnode("A", true, Utc::now())
        .await
        .expect("peer");
    insert_observation(&store, peer_a.id, Some("1.0"), Some(now_unix), Some(100), Some(40)).await;
    insert_sample(&store, peer_a.id, Some(100)).await;
    store
        .record_pod_credits("A", 10.0, Utc::now(), std::time::Duration::from_secs(7_200))
        .await
        .expect("credits");

    // B: public, stale, versioned, with stats and credits.
    let peer_b = store
        .upsert_pnode("B", true, Utc::now())
        .await
        .expect("peer");
    insert_observation(&store, peer_b.id, Some("1.0"), Some(now_unix - 60), Some(200), Some(60))
        .await;
    insert_sample(&store, peer_b.id, Some(300)).await;
    store
        .record_pod_credits("B", 30.0, Utc::now(), std::time::Duration::from_secs(7_200))
        .await
        .expect("credits");

    // C: private, failing, no version, no last-seen, no stats, no credits.
    let peer_c = store
        .upsert_pnode("C", false, Utc::now())
        .await
        .expect("peer");
    insert_observation(&store, peer_c.id, None, None, None, None).await;
    store
        .update_backoff(
            peer_c.id,
            BackoffPatch {
                failure_count: Some(2),
                ..Default::default()
            },
        )
        .await
        .expect("backoff");

    let run_id = store
        .insert_ingestion_run(Utc::now())
        .await
        .expect("run");
    let snapshot_id = compute_and_store(&store, &[SEED.to_string()], run_id)
        .await
        .expect("snapshot");

    let snapshot = NetworkSnapshot::find_by_id(snapshot_id)
        .one(store.connection())
        .await
        .expect("query")
        .expect("snapshot row");
    assert_eq!(snapshot.run_id, run_id);
    assert_eq!(snapshot.total_nodes, 3);
    assert_eq!(snapshot.reachable_nodes, 2);
    assert_eq!(snapshot.unreachable_nodes, 1);
    assert!((snapshot.reachable_percent - 200.0 / 3.0).abs() < 0.01);
    assert_eq!(snapshot.total_storage_committed, 300);
    assert_eq!(snapshot.total_storage_used, 100);
    assert_eq!(snapshot.nodes_backed_off, 1);
    assert_eq!(snapshot.nodes_failing_stats, 1);
    // Uptimes [100, 300]: ceil-index median is the first value, p90 the last.
    assert_eq!(snapshot.median_uptime_seconds, 100);
    assert_eq!(snapshot.p90_uptime_seconds, 300);

    let versions = VersionStat::find()
        .filter(version_stat::Column::SnapshotId.eq(snapshot_id))
        .all(store.connection())
        .await
        .expect("query");
    assert_eq!(versions.len(), 2);
    let of = |name: &str| {
        versions
            .iter()
            .find(|row| row.version == name)
            .map(|row| row.count)
    };
    assert_eq!(of("1.0"), Some(2));
    assert_eq!(of("unknown"), Some(1));

    let visibility = SeedVisibility::find()
        .filter(seed_visibility::Column::SnapshotId.eq(snapshot_id))
        .all(store.connection())
        .await
        .expect("query");
    assert_eq!(visibility.len(), 1);
    let seed_row = &visibility[0];
    assert_eq!(seed_row.seed_base_url, SEED);
    assert_eq!(seed_row.nodes_seen, 3);
    assert_eq!(seed_row.fresh, 1);
    assert_eq!(seed_row.stale, 1);
    assert_eq!(seed_row.offline, 1);

    let credits = CreditsStat::find()
        .filter(credits_stat::Column::SnapshotId.eq(snapshot_id))
        .one(store.connection())
        .await
        .expect("query")
        .expect("credits row");
    // Credits [10, 30]: ceil-index median is 10, p90 is 30.
    assert_eq!(credits.median_credits, 10.0);
    assert_eq!(credits.p90_credits, 30.0);

    // Same store, second pass: identical aggregate values.
    let rerun_id = store
        .insert_ingestion_run(Utc::now())
        .await
        .expect("run");
    let second_snapshot_id = compute_and_store(&store, &[SEED.to_string()], rerun_id)
        .await
        .expect("snapshot");
    let second = NetworkSnapshot::find_by_id(second_snapshot_id)
        .one(store.connection())
        .await
        .expect("query")
        .expect("snapshot row");
    assert_eq!(second.total_nodes, snapshot.total_nodes);
    assert_eq!(second.median_uptime_seconds, snapshot.median_uptime_seconds);
    assert_eq!(second.total_storage_committed, snapshot.total_storage_committed);
}
