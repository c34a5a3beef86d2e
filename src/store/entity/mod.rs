//! sea-orm entities for the ingestion schema, one module per table.

pub mod credits_stat;
pub mod gossip_observation;
pub mod ingestion_run;
pub mod network_snapshot;
pub mod pnode;
pub mod pod_credits_snapshot;
pub mod run_seed_stats;
pub mod seed_visibility;
pub mod stats_sample;
pub mod version_stat;

pub mod prelude {
    pub use super::credits_stat::Entity as CreditsStat;
    pub use super::gossip_observation::Entity as GossipObservation;
    pub use super::ingestion_run::Entity as IngestionRun;
    pub use super::network_snapshot::Entity as NetworkSnapshot;
    pub use super::pnode::Entity as Pnode;
    pub use super::pod_credits_snapshot::Entity as PodCreditsSnapshot;
    pub use super::run_seed_stats::Entity as RunSeedStats;
    pub use super::seed_visibility::Entity as SeedVisibility;
    pub use super::stats_sample::Entity as StatsSample;
    pub use super::version_stat::Entity as VersionStat;
}
