//! Append-only record of one successful direct probe.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "pnode_stats_sample")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub pnode_id: i64,

    /// The seed whose gossip branch won probe deduplication for this cycle.
    /// Observationally insignificant, recorded for traceability.
    pub seed_base_url: String,

    /// Wall-clock on the ingestion host at the successful probe.
    #[sea_orm(indexed)]
    pub timestamp: DateTimeUtc,

    pub uptime_seconds: Option<i64>,

    /// Cumulative counters as reported by the pNode.
    pub packets_received: Option<i64>,
    pub packets_sent: Option<i64>,
    pub total_bytes: Option<i64>,

    pub active_streams: Option<i32>,

    /// Derived against the previous sample; null on the first sample, on a
    /// counter reset, or when the window is too short.
    pub packets_in_per_sec: Option<f64>,
    pub packets_out_per_sec: Option<f64>,
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
