//! Fluent builder for [`CrawlerConfig`], mirroring the teacher's
//! `CrawlConfigBuilder` shape (plain fluent setters plus a `build`), but
//! without the typestate machinery the teacher used to enforce required
//! fields: every field here has a sensible default, so nothing is
//! required before `build()`.

use std::path::PathBuf;

use super::types::CrawlerConfig;

#[derive(Debug, Clone, Default)]
pub struct CrawlerConfigBuilder {
    storage_dir: Option<PathBuf>,
    memory_mbytes: Option<u64>,
    purge_on_start: Option<bool>,
}

impl CrawlerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn memory_mbytes(mut self, mbytes: u64) -> Self {
        self.memory_mbytes = Some(mbytes);
        self
    }

    #[must_use]
    pub fn purge_on_start(mut self, purge: bool) -> Self {
        self.purge_on_start = Some(purge);
        self
    }

    /// Builds a [`CrawlerConfig`], layering these explicit overrides on
    /// top of `CrawlerConfig::from_env()` — builder values win (`spec.md`
    /// §6: "builder wins").
    pub fn build(self) -> CrawlerConfig {
        let base = CrawlerConfig::from_env();
        CrawlerConfig {
            storage_dir: self.storage_dir.unwrap_or(base.storage_dir),
            memory_mbytes: self.memory_mbytes.or(base.memory_mbytes),
            purge_on_start: self.purge_on_start.unwrap_or(base.purge_on_start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_override_wins_over_env() {
        // SAFETY: test-only, single-threaded access to process env.
        unsafe {
            std::env::set_var("CRAWLEE_MEMORY_MBYTES", "2048");
        }
        let config = CrawlerConfigBuilder::new().memory_mbytes(4096).build();
        assert_eq!(config.memory_mbytes, Some(4096));
        unsafe {
            std::env::remove_var("CRAWLEE_MEMORY_MBYTES");
        }
    }

    #[test]
    fn defaults_are_used_when_nothing_set() {
        unsafe {
            std::env::remove_var("CRAWLEE_STORAGE_DIR");
            std::env::remove_var("CRAWLEE_MEMORY_MBYTES");
            std::env::remove_var("CRAWLEE_PURGE_ON_START");
        }
        let config = CrawlerConfigBuilder::new().build();
        assert!(!config.purge_on_start());
        assert!(config.memory_mbytes().is_none());
    }
}
