use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "network_credits_stat")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub snapshot_id: i64,

    pub median_credits: f64,
    pub p90_credits: f64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::network_snapshot::Entity",
        from = "Column::SnapshotId",
        to = "super::network_snapshot::Column::Id",
        on_delete = "Cascade"
    )]
    NetworkSnapshot,
}

impl Related<super::network_snapshot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::NetworkSnapshot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
