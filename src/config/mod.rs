//! Crate-wide configuration: environment-variable overrides per
//! `spec.md` §6 (`CRAWLEE_STORAGE_DIR`, `CRAWLEE_MEMORY_MBYTES`,
//! `CRAWLEE_PURGE_ON_START`), merged with explicit builder overrides.
//! Subsystem-specific tuning lives next to each subsystem instead (e.g.
//! [`crate::autoscaled_pool::AutoscaledPoolConfig`],
//! [`crate::snapshotter::SnapshotterConfig`]).

pub mod builder;
pub mod getters;
pub mod methods;
pub mod types;

pub use builder::CrawlerConfigBuilder;
pub use types::CrawlerConfig;
