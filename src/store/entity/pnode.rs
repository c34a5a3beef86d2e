//! Persistent identity of a pNode.
//!
//! Created on first sighting in any seed's gossip view and never deleted by
//! the ingestion engine. Carries the probe backoff state and a denormalized
//! copy of the most recent credits reading.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "pnode")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Opaque public key, unique across the network and across seed views.
    #[sea_orm(unique)]
    pub pubkey: String,

    /// Most recent reachability claim from gossip.
    pub is_public: bool,

    /// Consecutive failed stats probes; 0 after any success.
    pub failure_count: i32,

    pub last_stats_attempt_at: Option<DateTimeUtc>,
    pub last_stats_success_at: Option<DateTimeUtc>,

    /// Null means "eligible now"; a future value means the peer is in backoff.
    pub next_stats_allowed_at: Option<DateTimeUtc>,

    /// Denormalized most-recent credits reading.
    pub latest_credits: Option<f64>,
    pub credits_updated_at: Option<DateTimeUtc>,

    pub first_seen_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::gossip_observation::Entity")]
    GossipObservation,
    #[sea_orm(has_many = "super::stats_sample::Entity")]
    StatsSample,
}

impl Related<super::gossip_observation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GossipObservation.def()
    }
}

impl Related<super::stats_sample::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatsSample.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
