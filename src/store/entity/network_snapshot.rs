//! One network-wide aggregate per ingestion run.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "network_snapshot")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub run_id: i64,

    pub created_at: DateTimeUtc,

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

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::ingestion_run::Entity",
        from = "Column::RunId",
        to = "super::ingestion_run::Column::Id",
        on_delete = "Cascade"
    )]
    IngestionRun,
    #[sea_orm(has_many = "super::version_stat::Entity")]
    VersionStat,
    #[sea_orm(has_many = "super::seed_visibility::Entity")]
    SeedVisibility,
    #[sea_orm(has_many = "super::credits_stat::Entity")]
    CreditsStat,
}

impl Related<super::ingestion_run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IngestionRun.def()
    }
}

impl Related<super::version_stat::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::VersionStat.def()
    }
}

impl Related<super::seed_visibility::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SeedVisibility.def()
    }
}

impl Related<super::credits_stat::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CreditsStat.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
