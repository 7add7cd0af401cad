//! Env-var resolution and other `CrawlerConfig` methods, per `spec.md`
//! §6: `CRAWLEE_STORAGE_DIR`, `CRAWLEE_MEMORY_MBYTES`,
//! `CRAWLEE_PURGE_ON_START`.

use super::builder::CrawlerConfigBuilder;
use super::types::CrawlerConfig;

impl CrawlerConfig {
    pub fn builder() -> CrawlerConfigBuilder {
        CrawlerConfigBuilder::new()
    }

    /// Resolves configuration from environment variables alone, falling
    /// back to [`CrawlerConfig::default`] for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let storage_dir = std::env::var("CRAWLEE_STORAGE_DIR")
            .ok()
            .map(std::path::PathBuf::from)
            .unwrap_or(defaults.storage_dir);
        let memory_mbytes = std::env::var("CRAWLEE_MEMORY_MBYTES")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .or(defaults.memory_mbytes);
        let purge_on_start = std::env::var("CRAWLEE_PURGE_ON_START")
            .ok()
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
            .unwrap_or(defaults.purge_on_start);

        Self {
            storage_dir,
            memory_mbytes,
            purge_on_start,
        }
    }

    /// Bytes form of `memory_mbytes`, for callers (e.g.
    /// [`crate::snapshotter::SnapshotterConfig`]) that want a byte budget
    /// rather than re-parsing the env var themselves.
    pub fn memory_bytes(&self) -> Option<u64> {
        self.memory_mbytes.map(|mb| mb * 1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_reads_crawlee_storage_dir() {
        unsafe {
            std::env::set_var("CRAWLEE_STORAGE_DIR", "/tmp/crawlee-test-dir");
        }
        let config = CrawlerConfig::from_env();
        assert_eq!(config.storage_dir(), std::path::Path::new("/tmp/crawlee-test-dir"));
        unsafe {
            std::env::remove_var("CRAWLEE_STORAGE_DIR");
        }
    }

    #[test]
    fn memory_bytes_converts_from_mbytes() {
        let config = CrawlerConfig::builder().memory_mbytes(2).build();
        assert_eq!(config.memory_bytes(), Some(2 * 1024 * 1024));
    }
}
