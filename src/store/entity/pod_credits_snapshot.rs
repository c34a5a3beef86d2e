//! Append-only credit readings, at most one per peer per two hours.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "pod_credits_snapshot")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub pod_pubkey: String,

    pub credits: f64,

    #[sea_orm(indexed)]
    pub observed_at: DateTimeUtc,

    pub seed_base_url: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
