//! Deduplicated, ordered, lease-based work queue, per `spec.md` §4.D.
//!
//! No reference implementation with head-cache/lease logic survived the
//! retrieval of `original_source`; this module is built directly from
//! `spec.md`'s prose, which is explicit enough to be unambiguous. The
//! `order_no`/microsecond-timestamp/dedup mechanics live in the backing
//! [`RequestQueueClient`](crate::storage::RequestQueueClient) (see
//! `storage::memory::MemoryRequestQueueClient`); this component owns only
//! the in-memory head cache and lease bookkeeping layered on top of it,
//! per the design note in `spec.md` §5 ("the head cache is owned by a
//! single RequestQueue instance").

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use tokio::sync::Mutex;

use crate::request::Request;
use crate::storage::{AddRequestResult, RequestQueueClient};

#[derive(Debug, Clone, Copy)]
pub struct RequestQueueConfig {
    pub default_lock_secs: u64,
    pub head_limit: usize,
    /// Prolong a cached lease once less than this fraction of its
    /// duration remains, rather than waiting for it to expire.
    pub lease_prolong_threshold: f64,
}

impl Default for RequestQueueConfig {
    fn default() -> Self {
        Self {
            default_lock_secs: 180,
            head_limit: 25,
            lease_prolong_threshold: 0.25,
        }
    }
}

struct CachedHeadEntry {
    id: String,
    fetched_at: Instant,
    lock_expires_at: Instant,
}

pub struct RequestQueue {
    client: Arc<dyn RequestQueueClient>,
    config: RequestQueueConfig,
    head_cache: Mutex<VecDeque<CachedHeadEntry>>,
    should_check_for_forefront_requests: AtomicBool,
    /// Ids fetched but not yet marked handled or reclaimed; used to
    /// decide `is_finished` ("queue is empty *and* no leases are
    /// outstanding").
    in_flight: DashSet<String>,
}

impl RequestQueue {
    pub fn new(client: Arc<dyn RequestQueueClient>, config: RequestQueueConfig) -> Self {
        Self {
            client,
            config,
            head_cache: Mutex::new(VecDeque::new()),
            should_check_for_forefront_requests: AtomicBool::new(true),
            in_flight: DashSet::new(),
        }
    }

    pub async fn add_request(&self, request: Request, forefront: bool) -> anyhow::Result<AddRequestResult> {
        if forefront {
            self.should_check_for_forefront_requests.store(true, Ordering::Release);
        }
        self.client.add_request(request, forefront).await
    }

    pub async fn batch_add_requests(
        &self,
        requests: Vec<Request>,
        forefront: bool,
    ) -> anyhow::Result<(Vec<AddRequestResult>, Vec<Request>)> {
        if forefront {
            self.should_check_for_forefront_requests.store(true, Ordering::Release);
        }
        self.client.batch_add_requests(requests, forefront).await
    }

    pub async fn get_request(&self, id: &str) -> anyhow::Result<Option<Request>> {
        self.client.get_request(id).await
    }

    pub async fn update_request(&self, request: Request, forefront: bool) -> anyhow::Result<AddRequestResult> {
        if forefront {
            self.should_check_for_forefront_requests.store(true, Ordering::Release);
        }
        self.client.update_request(request, forefront).await
    }

    /// Returns the first not-yet-handled, not-currently-leased entry,
    /// acquiring a fresh lease on it. Returns `None` (letting the caller
    /// retry) if the queue looks empty, or if the head cache's next id
    /// turned out stale (already handled or missing).
    pub async fn fetch_next_request(&self) -> anyhow::Result<Option<Request>> {
        let mut cache = self.head_cache.lock().await;

        let is_empty = cache.is_empty();
        if is_empty || self.should_check_for_forefront_requests.swap(false, Ordering::AcqRel) {
            let now = Instant::now();
            let fetched = self
                .client
                .list_and_lock_head(self.config.head_limit, self.config.default_lock_secs)
                .await?;
            let entries = fetched.into_iter().map(|r| CachedHeadEntry {
                id: r.id,
                fetched_at: now,
                lock_expires_at: now + Duration::from_secs(self.config.default_lock_secs),
            });
            if is_empty {
                cache.extend(entries);
            } else {
                // `list_and_lock_head` excludes already-locked (cached)
                // entries, so everything it returns here is new. Newly
                // added forefront requests must be dispatched before the
                // stale cached entries, so prepend rather than append;
                // prepend in reverse order to preserve the server's order
                // among the freshly fetched entries themselves.
                for entry in entries.collect::<Vec<_>>().into_iter().rev() {
                    cache.push_front(entry);
                }
            }
        }

        let Some(head) = cache.pop_front() else {
            return Ok(None);
        };

        let Some(request) = self.client.get_request(&head.id).await? else {
            log::debug!("head cache entry {} is stale (missing), skipping", head.id);
            return Ok(None);
        };

        if request.meta.handled_at.is_some() {
            log::debug!("head cache entry {} is stale (already handled), skipping", head.id);
            return Ok(None);
        }

        let lease_duration = head.lock_expires_at.duration_since(head.fetched_at);
        let remaining = head
            .lock_expires_at
            .saturating_duration_since(Instant::now());
        if lease_duration.as_secs_f64() > 0.0
            && remaining.as_secs_f64() / lease_duration.as_secs_f64() < self.config.lease_prolong_threshold
        {
            self.client
                .prolong_request_lock(&head.id, false, self.config.default_lock_secs)
                .await?;
        }

        self.in_flight.insert(head.id.clone());
        Ok(Some(request))
    }

    pub async fn mark_request_as_handled(&self, mut request: Request) -> anyhow::Result<()> {
        request.meta.handled_at = Some(chrono::Utc::now());
        let id = request.id.clone();
        self.client.update_request(request, false).await?;
        self.client.delete_request_lock(&id, false).await?;
        self.in_flight.remove(&id);
        Ok(())
    }

    pub async fn reclaim_request(&self, request: Request, forefront: bool) -> anyhow::Result<()> {
        let id = request.id.clone();
        if forefront {
            self.should_check_for_forefront_requests.store(true, Ordering::Release);
        }
        self.client.update_request(request, forefront).await?;
        self.client.delete_request_lock(&id, forefront).await?;
        self.in_flight.remove(&id);
        Ok(())
    }

    pub async fn is_empty(&self) -> anyhow::Result<bool> {
        self.client.is_empty().await
    }

    pub async fn is_finished(&self) -> anyhow::Result<bool> {
        Ok(self.is_empty().await? && self.in_flight.is_empty())
    }

    pub async fn drop_queue(&self) -> anyhow::Result<()> {
        self.client.drop().await?;
        self.head_cache.lock().await.clear();
        self.in_flight.clear();
        Ok(())
    }
}
