use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "network_version_stat")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub snapshot_id: i64,

    /// Version string from the latest gossip observation; "unknown" when the
    /// seed reported none.
    pub version: String,
    pub count: i32,
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
