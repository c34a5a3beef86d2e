//! Per-seed counters scoped to one ingestion run.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "ingestion_run_seed_stats")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub run_id: i64,

    pub seed_base_url: String,
    pub attempted: i32,
    pub backoff: i32,
    pub success: i32,
    pub failed: i32,
    pub observed: i32,
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
}

impl Related<super::ingestion_run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IngestionRun.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
