//! One execution of the ingestion cycle with its global counters.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "ingestion_run")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub started_at: DateTimeUtc,
    pub finished_at: Option<DateTimeUtc>,

    /// Deduplicated probe task count.
    pub attempted: i32,
    pub success: i32,
    pub failed: i32,
    /// Peers skipped because their next allowed probe time was in the future.
    pub backoff: i32,
    /// Distinct peers seen across all seeds this cycle.
    pub observed: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::run_seed_stats::Entity")]
    RunSeedStats,
    #[sea_orm(has_many = "super::network_snapshot::Entity")]
    NetworkSnapshot,
}

impl Related<super::run_seed_stats::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RunSeedStats.def()
    }
}

impl Related<super::network_snapshot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::NetworkSnapshot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
