//! Append-only record of one sighting of one pNode in one seed's gossip view.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "pnode_gossip_observation")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub pnode_id: i64,

    #[sea_orm(indexed)]
    pub seed_base_url: String,

    /// Wall-clock on the ingestion host at the time the row was written.
    #[sea_orm(indexed)]
    pub observed_at: DateTimeUtc,

    /// ip:port exactly as reported by gossip.
    pub address: String,

    pub version: Option<String>,

    /// Unix seconds as reported by the seed. Remote clock, may skew against
    /// `observed_at`.
    pub last_seen_timestamp: Option<i64>,

    pub storage_committed: Option<i64>,
    pub storage_used: Option<i64>,

    /// Stored exactly as the seed reports it; no unit normalization.
    pub storage_usage_percent: Option<f64>,

    pub is_public: Option<bool>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::pnode::Entity",
        from = "Column::PnodeId",
        to = "super::pnode::Column::Id"
    )]
    Pnode,
}

impl Related<super::pnode::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Pnode.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
