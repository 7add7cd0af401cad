//! Accessor methods for [`CrawlerConfig`].

use std::path::Path;

use super::types::CrawlerConfig;

impl CrawlerConfig {
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn memory_mbytes(&self) -> Option<u64> {
        self.memory_mbytes
    }

    pub fn purge_on_start(&self) -> bool {
        self.purge_on_start
    }
}
