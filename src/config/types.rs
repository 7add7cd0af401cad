//! `CrawlerConfig`: the ambient, crate-wide configuration surface, per
//! `spec.md` §6's environment-variable table. Subsystem-specific tuning
//! (autoscaling, queue leases, session pool, snapshotter thresholds)
//! lives in each subsystem's own `*Config` struct next to it; this type
//! only covers the handful of concerns that are genuinely crate-wide.

use std::path::PathBuf;

/// Crate-wide configuration resolved from environment variables and
/// explicit builder overrides (`spec.md` §6).
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub(crate) storage_dir: PathBuf,
    pub(crate) memory_mbytes: Option<u64>,
    pub(crate) purge_on_start: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            storage_dir: std::env::temp_dir().join("crawlee_core_storage"),
            memory_mbytes: None,
            purge_on_start: false,
        }
    }
}
