//! `crawlee_core`: the coordination layer of a concurrent web-crawling
//! framework — an autoscaled task pool driven by a system-load
//! snapshotter, paired with a deduplicated lease-based request queue and
//! a rotating session pool.
//!
//! HTML/XML parsing beyond sitemaps, HTTP transport, browser automation,
//! CLIs, and persistent result storage are explicit non-goals: this
//! crate consumes those concerns through the traits in [`http_client`]
//! and [`storage`] rather than implementing them.

pub mod autoscaled_pool;
pub mod config;
pub mod context;
pub mod crawler;
pub mod domain;
pub mod error;
pub mod events;
pub mod http_client;
pub mod request;
pub mod request_loader;
pub mod request_queue;
pub mod router;
pub mod session;
pub mod session_pool;
pub mod sitemap_loader;
pub mod snapshot;
pub mod snapshotter;
pub mod storage;
pub mod system_status;
pub mod tandem;

pub use autoscaled_pool::{AutoscaledPool, AutoscaledPoolConfig};
pub use config::CrawlerConfig;
pub use context::{CrawlingContext, RunResult};
pub use crawler::{BasicCrawler, BasicCrawlerConfig};
pub use error::CrawlerError;
pub use events::{Event, EventManager};
pub use http_client::{CrawlingResult, HttpClient, HttpMethod, HttpResponse, StreamResponse};
pub use request::{EnqueueStrategy, Request, RequestMeta, RequestState, UniqueKeyOptions};
pub use request_loader::{RequestList, RequestLoader};
pub use request_queue::{RequestQueue, RequestQueueConfig};
pub use router::Router;
pub use session::Session;
pub use session_pool::{SessionPool, SessionPoolConfig};
pub use sitemap_loader::{SitemapLoader, SitemapLoaderConfig};
pub use snapshot::{LoadRatioInfo, Snapshot, SystemInfo};
pub use snapshotter::{Snapshotter, SnapshotterConfig};
pub use system_status::{SystemStatus, SystemStatusConfig};
pub use tandem::RequestManagerTandem;
