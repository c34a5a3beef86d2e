//! Typed gateway over the SQL store.
//!
//! Owns the connection pool and exposes the operations the ingestion engine
//! needs. All writes go through sea-orm prepared statements and are safe to
//! run concurrently; per-peer mutations are independent and idempotent under
//! the schema's keys.

pub mod entity;

use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectOptions, ConnectionTrait, Database,
    DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Schema,
};

use crate::errors::IngestResult;

use entity::prelude::*;
use entity::{
    credits_stat, gossip_observation, ingestion_run, network_snapshot, pnode, pod_credits_snapshot,
    run_seed_stats, seed_visibility, stats_sample, version_stat,
};

/// New gossip observation row, one per (seed, peer) per cycle.
#[derive(Clone, Debug)]
pub struct NewGossipObservation {
    pub pnode_id: i64,
    pub seed_base_url: String,
    pub observed_at: DateTime<Utc>,
    pub address: String,
    pub version: Option<String>,
    pub last_seen_timestamp: Option<i64>,
    pub storage_committed: Option<i64>,
    pub storage_used: Option<i64>,
    pub storage_usage_percent: Option<f64>,
    pub is_public: Option<bool>,
}

/// New stats sample row, written only after a successful probe.
#[derive(Clone, Debug)]
pub struct NewStatsSample {
    pub pnode_id: i64,
    pub seed_base_url: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: Option<i64>,
    pub packets_received: Option<i64>,
    pub packets_sent: Option<i64>,
    pub total_bytes: Option<i64>,
    pub active_streams: Option<i32>,
    pub packets_in_per_sec: Option<f64>,
    pub packets_out_per_sec: Option<f64>,
}

/// Partial update of a peer's probe/backoff state. `None` leaves the column
/// untouched; the nested option on `next_stats_allowed_at` distinguishes
/// "set to null" from "leave alone".
#[derive(Clone, Copy, Debug, Default)]
pub struct BackoffPatch {
    pub failure_count: Option<i32>,
    pub last_stats_attempt_at: Option<DateTime<Utc>>,
    pub last_stats_success_at: Option<DateTime<Utc>>,
    pub next_stats_allowed_at: Option<Option<DateTime<Utc>>>,
}

/// Global counters for one ingestion run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub attempted: i32,
    pub success: i32,
    pub failed: i32,
    pub backoff: i32,
    pub observed: i32,
}

/// Per-seed counters for one ingestion run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeedCounters {
    pub seed_base_url: String,
    pub attempted: i32,
    pub backoff: i32,
    pub success: i32,
    pub failed: i32,
    pub observed: i32,
}

/// Scalar section of one network snapshot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SnapshotScalars {
    pub total_nodes: i32,
    pub reachable_nodes: i32,
    pub unreachable_nodes: i32,
    pub reachable_percent: f64,
    pub median_uptime_seconds: i64,
    pub p90_uptime_seconds: i64,
    pub total_storage_committed: i64,
    pub total_storage_used: i64,
    pub nodes_backed_off: i32,
    pub nodes_failing_stats: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedVisibilityCounts {
    pub seed_base_url: String,
    pub nodes_seen: i32,
    pub fresh: i32,
    pub stale: i32,
    pub offline: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CreditsQuantiles {
    pub median_credits: f64,
    pub p90_credits: f64,
}

/// Disposition of one credits reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreditsOutcome {
    /// Denormalized onto the peer and appended as a snapshot row.
    Recorded,
    /// Denormalized only; a snapshot row newer than the spacing window exists.
    Throttled,
    /// No peer with that pubkey has been sighted in gossip yet.
    UnknownPeer,
}

/// High-volume tables subject to threshold-triggered retention.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanupTable {
    GossipObservation,
    StatsSample,
    IngestionRun,
}

impl CleanupTable {
    pub fn table_name(self) -> &'static str {
        match self {
            CleanupTable::GossipObservation => "pnode_gossip_observation",
            CleanupTable::StatsSample => "pnode_stats_sample",
            CleanupTable::IngestionRun => "ingestion_run",
        }
    }
}

#[derive(Clone)]
pub struct Store {
    db: DatabaseConnection,
}

impl Store {
    /// Connect with a bounded pool. The cap deliberately leaves headroom on
    /// the database for the UI and reporting consumers.
    pub async fn connect(url: &str, pool_size: u32) -> IngestResult<Self> {
        let mut options = ConnectOptions::new(url.to_string());
        options
            .max_connections(pool_size)
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);
        let db = Database::connect(options).await?;
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn ping(&self) -> IngestResult<()> {
        self.db.ping().await?;
        Ok(())
    }

    pub async fn close(&self) -> IngestResult<()> {
        self.db.clone().close().await?;
        Ok(())
    }

    /// Create any missing tables and secondary indexes. The schema is shared
    /// with the UI stack; a standalone deployment must still be able to boot
    /// against an empty database.
    pub async fn ensure_schema(&self) -> IngestResult<()> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);

        macro_rules! create_entity {
            ($entity:expr) => {{
                let mut table = schema.create_table_from_entity($entity);
                table.if_not_exists();
                self.db.execute(backend.build(&table)).await?;
                for mut index in schema.create_index_from_entity($entity) {
                    index.if_not_exists();
                    self.db.execute(backend.build(&index)).await?;
                }
            }};
        }

        create_entity!(Pnode);
        create_entity!(GossipObservation);
        create_entity!(StatsSample);
        create_entity!(IngestionRun);
        create_entity!(RunSeedStats);
        create_entity!(NetworkSnapshot);
        create_entity!(VersionStat);
        create_entity!(SeedVisibility);
        create_entity!(CreditsStat);
        create_entity!(PodCreditsSnapshot);

        Ok(())
    }

    // ------------------------------------------------------------------
    // Peers
    // ------------------------------------------------------------------

    /// Insert-or-update a peer by pubkey, refreshing its reachability claim.
    /// Concurrent first sightings from different seeds race benignly: the
    /// conflict target is the unique pubkey.
    pub async fn upsert_pnode(
        &self,
        pubkey: &str,
        is_public: bool,
        now: DateTime<Utc>,
    ) -> IngestResult<pnode::Model> {
        let row = pnode::ActiveModel {
            pubkey: Set(pubkey.to_string()),
            is_public: Set(is_public),
            failure_count: Set(0),
            first_seen_at: Set(now),
            ..Default::default()
        };
        Pnode::insert(row)
            .on_conflict(
                OnConflict::column(pnode::Column::Pubkey)
                    .update_column(pnode::Column::IsPublic)
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        let model = Pnode::find()
            .filter(pnode::Column::Pubkey.eq(pubkey))
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                sea_orm::DbErr::RecordNotFound(format!("pnode '{pubkey}' vanished after upsert"))
            })?;
        Ok(model)
    }

    pub async fn find_pnode(&self, id: i64) -> IngestResult<Option<pnode::Model>> {
        Ok(Pnode::find_by_id(id).one(&self.db).await?)
    }

    pub async fn find_pnode_by_pubkey(&self, pubkey: &str) -> IngestResult<Option<pnode::Model>> {
        Ok(Pnode::find()
            .filter(pnode::Column::Pubkey.eq(pubkey))
            .one(&self.db)
            .await?)
    }

    pub async fn update_backoff(&self, id: i64, patch: BackoffPatch) -> IngestResult<()> {
        let mut active = pnode::ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        if let Some(count) = patch.failure_count {
            active.failure_count = Set(count);
        }
        if let Some(at) = patch.last_stats_attempt_at {
            active.last_stats_attempt_at = Set(Some(at));
        }
        if let Some(at) = patch.last_stats_success_at {
            active.last_stats_success_at = Set(Some(at));
        }
        if let Some(at) = patch.next_stats_allowed_at {
            active.next_stats_allowed_at = Set(at);
        }
        active.update(&self.db).await?;
        Ok(())
    }

    /// Reset peers whose backoff window expired long ago. Prevents permanent
    /// exile after an extended worker outage.
    pub async fn reset_stale_backoffs(&self, cutoff: DateTime<Utc>) -> IngestResult<u64> {
        let result = Pnode::update_many()
            .col_expr(pnode::Column::FailureCount, Expr::value(0))
            .col_expr(
                pnode::Column::NextStatsAllowedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .filter(pnode::Column::FailureCount.gt(0))
            .filter(pnode::Column::NextStatsAllowedAt.lt(cutoff))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn pnodes_page(&self, page: u64, per_page: u64) -> IngestResult<Vec<pnode::Model>> {
        Ok(Pnode::find()
            .order_by_asc(pnode::Column::Id)
            .paginate(&self.db, per_page)
            .fetch_page(page)
            .await?)
    }

    // ------------------------------------------------------------------
    // Gossip observations
    // ------------------------------------------------------------------

    pub async fn insert_gossip_observation(
        &self,
        observation: NewGossipObservation,
    ) -> IngestResult<()> {
        gossip_observation::ActiveModel {
            pnode_id: Set(observation.pnode_id),
            seed_base_url: Set(observation.seed_base_url),
            observed_at: Set(observation.observed_at),
            address: Set(observation.address),
            version: Set(observation.version),
            last_seen_timestamp: Set(observation.last_seen_timestamp),
            storage_committed: Set(observation.storage_committed),
            storage_used: Set(observation.storage_used),
            storage_usage_percent: Set(observation.storage_usage_percent),
            is_public: Set(observation.is_public),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    pub async fn latest_gossip_observation(
        &self,
        pnode_id: i64,
    ) -> IngestResult<Option<gossip_observation::Model>> {
        Ok(GossipObservation::find()
            .filter(gossip_observation::Column::PnodeId.eq(pnode_id))
            .order_by_desc(gossip_observation::Column::ObservedAt)
            .order_by_desc(gossip_observation::Column::Id)
            .one(&self.db)
            .await?)
    }

    /// All observations one seed produced inside the visibility window.
    pub async fn recent_seed_observations(
        &self,
        seed_base_url: &str,
        since: DateTime<Utc>,
    ) -> IngestResult<Vec<gossip_observation::Model>> {
        Ok(GossipObservation::find()
            .filter(gossip_observation::Column::SeedBaseUrl.eq(seed_base_url))
            .filter(gossip_observation::Column::ObservedAt.gte(since))
            .all(&self.db)
            .await?)
    }

    // ------------------------------------------------------------------
    // Stats samples
    // ------------------------------------------------------------------

    pub async fn insert_stats_sample(&self, sample: NewStatsSample) -> IngestResult<()> {
        stats_sample::ActiveModel {
            pnode_id: Set(sample.pnode_id),
            seed_base_url: Set(sample.seed_base_url),
            timestamp: Set(sample.timestamp),
            uptime_seconds: Set(sample.uptime_seconds),
            packets_received: Set(sample.packets_received),
            packets_sent: Set(sample.packets_sent),
            total_bytes: Set(sample.total_bytes),
            active_streams: Set(sample.active_streams),
            packets_in_per_sec: Set(sample.packets_in_per_sec),
            packets_out_per_sec: Set(sample.packets_out_per_sec),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    pub async fn find_latest_stats_sample(
        &self,
        pnode_id: i64,
    ) -> IngestResult<Option<stats_sample::Model>> {
        Ok(StatsSample::find()
            .filter(stats_sample::Column::PnodeId.eq(pnode_id))
            .order_by_desc(stats_sample::Column::Timestamp)
            .order_by_desc(stats_sample::Column::Id)
            .one(&self.db)
            .await?)
    }

    // ------------------------------------------------------------------
    // Ingestion runs
    // ------------------------------------------------------------------

    pub async fn insert_ingestion_run(&self, started_at: DateTime<Utc>) -> IngestResult<i64> {
        let run = ingestion_run::ActiveModel {
            started_at: Set(started_at),
            attempted: Set(0),
            success: Set(0),
            failed: Set(0),
            backoff: Set(0),
            observed: Set(0),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        Ok(run.id)
    }

    pub async fn finish_ingestion_run(
        &self,
        run_id: i64,
        finished_at: DateTime<Utc>,
        totals: RunCounters,
    ) -> IngestResult<()> {
        ingestion_run::ActiveModel {
            id: Set(run_id),
            finished_at: Set(Some(finished_at)),
            attempted: Set(totals.attempted),
            success: Set(totals.success),
            failed: Set(totals.failed),
            backoff: Set(totals.backoff),
            observed: Set(totals.observed),
            ..Default::default()
        }
        .update(&self.db)
        .await?;
        Ok(())
    }

    pub async fn insert_run_seed_stats(
        &self,
        run_id: i64,
        stats: &[SeedCounters],
    ) -> IngestResult<()> {
        if stats.is_empty() {
            return Ok(());
        }
        let rows = stats.iter().map(|entry| run_seed_stats::ActiveModel {
            run_id: Set(run_id),
            seed_base_url: Set(entry.seed_base_url.clone()),
            attempted: Set(entry.attempted),
            backoff: Set(entry.backoff),
            success: Set(entry.success),
            failed: Set(entry.failed),
            observed: Set(entry.observed),
            ..Default::default()
        });
        RunSeedStats::insert_many(rows).exec(&self.db).await?;
        Ok(())
    }

    pub async fn find_ingestion_run(
        &self,
        run_id: i64,
    ) -> IngestResult<Option<ingestion_run::Model>> {
        Ok(IngestionRun::find_by_id(run_id).one(&self.db).await?)
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Persist one snapshot with all its children attached.
    pub async fn insert_network_snapshot(
        &self,
        run_id: i64,
        created_at: DateTime<Utc>,
        scalars: SnapshotScalars,
        version_stats: &[(String, i32)],
        seed_visibility: &[SeedVisibilityCounts],
        credits: CreditsQuantiles,
    ) -> IngestResult<i64> {
        let snapshot = network_snapshot::ActiveModel {
            run_id: Set(run_id),
            created_at: Set(created_at),
            total_nodes: Set(scalars.total_nodes),
            reachable_nodes: Set(scalars.reachable_nodes),
            unreachable_nodes: Set(scalars.unreachable_nodes),
            reachable_percent: Set(scalars.reachable_percent),
            median_uptime_seconds: Set(scalars.median_uptime_seconds),
            p90_uptime_seconds: Set(scalars.p90_uptime_seconds),
            total_storage_committed: Set(scalars.total_storage_committed),
            total_storage_used: Set(scalars.total_storage_used),
            nodes_backed_off: Set(scalars.nodes_backed_off),
            nodes_failing_stats: Set(scalars.nodes_failing_stats),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        if !version_stats.is_empty() {
            let rows = version_stats
                .iter()
                .map(|(version, count)| version_stat::ActiveModel {
                    snapshot_id: Set(snapshot.id),
                    version: Set(version.clone()),
                    count: Set(*count),
                    ..Default::default()
                });
            VersionStat::insert_many(rows).exec(&self.db).await?;
        }

        if !seed_visibility.is_empty() {
            let rows = seed_visibility
                .iter()
                .map(|entry| seed_visibility::ActiveModel {
                    snapshot_id: Set(snapshot.id),
                    seed_base_url: Set(entry.seed_base_url.clone()),
                    nodes_seen: Set(entry.nodes_seen),
                    fresh: Set(entry.fresh),
                    stale: Set(entry.stale),
                    offline: Set(entry.offline),
                    ..Default::default()
                });
            SeedVisibility::insert_many(rows).exec(&self.db).await?;
        }

        credits_stat::ActiveModel {
            snapshot_id: Set(snapshot.id),
            median_credits: Set(credits.median_credits),
            p90_credits: Set(credits.p90_credits),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        Ok(snapshot.id)
    }

    // ------------------------------------------------------------------
    // Credits
    // ------------------------------------------------------------------

    /// Apply one credits reading: denormalize onto the peer, and append a
    /// history row unless one newer than `min_spacing` already exists.
    pub async fn record_pod_credits(
        &self,
        pubkey: &str,
        credits: f64,
        observed_at: DateTime<Utc>,
        min_spacing: Duration,
    ) -> IngestResult<CreditsOutcome> {
        let Some(peer) = self.find_pnode_by_pubkey(pubkey).await? else {
            return Ok(CreditsOutcome::UnknownPeer);
        };

        let mut active: pnode::ActiveModel = peer.into();
        active.latest_credits = Set(Some(credits));
        active.credits_updated_at = Set(Some(observed_at));
        active.update(&self.db).await?;

        let spacing = chrono::Duration::seconds(min_spacing.as_secs() as i64);
        let newer_than = observed_at - spacing;
        let recent = PodCreditsSnapshot::find()
            .filter(pod_credits_snapshot::Column::PodPubkey.eq(pubkey))
            .filter(pod_credits_snapshot::Column::ObservedAt.gt(newer_than))
            .count(&self.db)
            .await?;
        if recent > 0 {
            return Ok(CreditsOutcome::Throttled);
        }

        pod_credits_snapshot::ActiveModel {
            pod_pubkey: Set(pubkey.to_string()),
            credits: Set(credits),
            observed_at: Set(observed_at),
            seed_base_url: Set(None),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        Ok(CreditsOutcome::Recorded)
    }

    // ------------------------------------------------------------------
    // Retention
    // ------------------------------------------------------------------

    pub async fn count_rows(&self, table: CleanupTable) -> IngestResult<u64> {
        let count = match table {
            CleanupTable::GossipObservation => GossipObservation::find().count(&self.db).await?,
            CleanupTable::StatsSample => StatsSample::find().count(&self.db).await?,
            CleanupTable::IngestionRun => IngestionRun::find().count(&self.db).await?,
        };
        Ok(count)
    }

    /// Time-column value of the n-th oldest row (0-indexed), if it exists.
    pub async fn find_nth_oldest(
        &self,
        table: CleanupTable,
        n: u64,
    ) -> IngestResult<Option<DateTime<Utc>>> {
        let value = match table {
            CleanupTable::GossipObservation => {
                GossipObservation::find()
                    .select_only()
                    .column(gossip_observation::Column::ObservedAt)
                    .order_by_asc(gossip_observation::Column::ObservedAt)
                    .offset(n)
                    .limit(1)
                    .into_tuple::<DateTime<Utc>>()
                    .one(&self.db)
                    .await?
            }
            CleanupTable::StatsSample => {
                StatsSample::find()
                    .select_only()
                    .column(stats_sample::Column::Timestamp)
                    .order_by_asc(stats_sample::Column::Timestamp)
                    .offset(n)
                    .limit(1)
                    .into_tuple::<DateTime<Utc>>()
                    .one(&self.db)
                    .await?
            }
            CleanupTable::IngestionRun => {
                IngestionRun::find()
                    .select_only()
                    .column(ingestion_run::Column::StartedAt)
                    .order_by_asc(ingestion_run::Column::StartedAt)
                    .offset(n)
                    .limit(1)
                    .into_tuple::<DateTime<Utc>>()
                    .one(&self.db)
                    .await?
            }
        };
        Ok(value)
    }

    /// Delete rows strictly older than the cutoff. Run deletions cascade to
    /// snapshots and per-seed stats through the schema's foreign keys.
    pub async fn delete_older_than(
        &self,
        table: CleanupTable,
        cutoff: DateTime<Utc>,
    ) -> IngestResult<u64> {
        let result = match table {
            CleanupTable::GossipObservation => {
                GossipObservation::delete_many()
                    .filter(gossip_observation::Column::ObservedAt.lt(cutoff))
                    .exec(&self.db)
                    .await?
            }
            CleanupTable::StatsSample => {
                StatsSample::delete_many()
                    .filter(stats_sample::Column::Timestamp.lt(cutoff))
                    .exec(&self.db)
                    .await?
            }
            CleanupTable::IngestionRun => {
                IngestionRun::delete_many()
                    .filter(ingestion_run::Column::StartedAt.lt(cutoff))
                    .exec(&self.db)
                    .await?
            }
        };
        Ok(result.rows_affected)
    }
}
