//! In-memory reference implementations of the storage client traits.
//! File-system and hosted backends are out of scope (`spec.md` §6).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use super::{AddRequestResult, DatasetClient, KeyValueStoreClient, RequestQueueClient};
use crate::request::Request;

#[derive(Default)]
pub struct MemoryDataset {
    items: Mutex<Vec<Value>>,
}

#[async_trait]
impl DatasetClient for MemoryDataset {
    async fn push_data(&self, item: Value) -> anyhow::Result<()> {
        self.items.lock().push(item);
        Ok(())
    }

    async fn get_data(&self, index: usize) -> anyhow::Result<Option<Value>> {
        Ok(self.items.lock().get(index).cloned())
    }

    async fn iterate_items(&self) -> anyhow::Result<Vec<Value>> {
        Ok(self.items.lock().clone())
    }

    async fn drop(&self) -> anyhow::Result<()> {
        self.items.lock().clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryKeyValueStore {
    records: DashMap<String, Vec<u8>>,
}

#[async_trait]
impl KeyValueStoreClient for MemoryKeyValueStore {
    async fn get_value(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.records.get(key).map(|v| v.clone()))
    }

    async fn set_value(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        self.records.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> anyhow::Result<()> {
        self.records.remove(key);
        Ok(())
    }

    async fn iterate_keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.records.iter().map(|e| e.key().clone()).collect())
    }

    async fn record_exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.records.contains_key(key))
    }

    async fn get_public_url(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.records.contains_key(key).then(|| format!("memory://{key}")))
    }

    async fn drop(&self) -> anyhow::Result<()> {
        self.records.clear();
        Ok(())
    }
}

struct Entry {
    request: Request,
    /// `None` => handled; negative => forefront; positive => normal.
    order_no: Option<i128>,
    lock_expires_at: Option<Instant>,
}

/// In-memory `RequestQueueClient`. Owns `order_no` assignment and the
/// monotonically increasing microsecond high-water mark described in
/// `spec.md` §3/§9 ("decimal-valued order_no... unconditional +1 µs
/// increment against a per-queue last-used high-water mark").
pub struct MemoryRequestQueueClient {
    entries: DashMap<String, Entry>,
    last_order_no_micros: AtomicI64,
    pending_count: AtomicI64,
    handled_count: AtomicI64,
}

impl Default for MemoryRequestQueueClient {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            last_order_no_micros: AtomicI64::new(0),
            pending_count: AtomicI64::new(0),
            handled_count: AtomicI64::new(0),
        }
    }
}

impl MemoryRequestQueueClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next microsecond timestamp, guaranteed strictly greater than the
    /// last one handed out (tie-break rule in `spec.md` §4.D).
    fn next_timestamp_micros(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        loop {
            let last = self.last_order_no_micros.load(Ordering::Acquire);
            let next = if now > last { now } else { last + 1 };
            if self
                .last_order_no_micros
                .compare_exchange(last, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return next;
            }
        }
    }

    fn compute_order_no(&self, forefront: bool) -> i128 {
        let ts = self.next_timestamp_micros() as i128;
        if forefront { -ts } else { ts }
    }

    pub fn pending_count(&self) -> i64 {
        self.pending_count.load(Ordering::Relaxed)
    }

    pub fn handled_count(&self) -> i64 {
        self.handled_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RequestQueueClient for MemoryRequestQueueClient {
    async fn add_request(&self, request: Request, forefront: bool) -> anyhow::Result<AddRequestResult> {
        if let Some(existing) = self.entries.get(&request.id) {
            return Ok(AddRequestResult {
                id: request.id,
                was_already_present: true,
                was_already_handled: existing.order_no.is_none(),
            });
        }

        let already_handled = request.meta.handled_at.is_some();
        let order_no = if already_handled {
            None
        } else {
            Some(self.compute_order_no(forefront))
        };

        if already_handled {
            self.handled_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.pending_count.fetch_add(1, Ordering::Relaxed);
        }

        let id = request.id.clone();
        self.entries.insert(
            id.clone(),
            Entry {
                request,
                order_no,
                lock_expires_at: None,
            },
        );

        Ok(AddRequestResult {
            id,
            was_already_present: false,
            was_already_handled: already_handled,
        })
    }

    async fn batch_add_requests(
        &self,
        requests: Vec<Request>,
        forefront: bool,
    ) -> anyhow::Result<(Vec<AddRequestResult>, Vec<Request>)> {
        let mut processed = Vec::with_capacity(requests.len());
        let mut unprocessed = Vec::new();
        for request in requests {
            let fallback = request.clone();
            match self.add_request(request, forefront).await {
                Ok(result) => processed.push(result),
                Err(_) => unprocessed.push(fallback),
            }
        }
        Ok((processed, unprocessed))
    }

    async fn get_request(&self, id: &str) -> anyhow::Result<Option<Request>> {
        Ok(self.entries.get(id).map(|e| e.request.clone()))
    }

    async fn update_request(&self, request: Request, forefront: bool) -> anyhow::Result<AddRequestResult> {
        let Some(mut entry) = self.entries.get_mut(&request.id) else {
            return self.add_request(request, forefront).await;
        };

        let was_handled_before = entry.order_no.is_none();
        let is_handled_now = request.meta.handled_at.is_some();

        match (was_handled_before, is_handled_now) {
            (false, true) => {
                self.pending_count.fetch_sub(1, Ordering::Relaxed);
                self.handled_count.fetch_add(1, Ordering::Relaxed);
                entry.order_no = None;
            }
            (true, false) => {
                self.handled_count.fetch_sub(1, Ordering::Relaxed);
                self.pending_count.fetch_add(1, Ordering::Relaxed);
                entry.order_no = Some(self.compute_order_no(forefront));
            }
            _ => {
                if !is_handled_now {
                    entry.order_no = Some(self.compute_order_no(forefront));
                }
            }
        }

        entry.request = request.clone();

        Ok(AddRequestResult {
            id: request.id,
            was_already_present: true,
            was_already_handled: was_handled_before,
        })
    }

    /// Returns the head of the queue by ascending `order_no`, skipping
    /// handled (`order_no = None`) and currently-leased entries, and
    /// locking what it returns for `lock_secs`.
    async fn list_and_lock_head(&self, limit: usize, lock_secs: u64) -> anyhow::Result<Vec<Request>> {
        let now = Instant::now();
        let mut candidates: Vec<(String, i128)> = self
            .entries
            .iter()
            .filter_map(|e| {
                let leased = e.lock_expires_at.is_some_and(|exp| exp > now);
                match e.order_no {
                    Some(order_no) if !leased => Some((e.key().clone(), order_no)),
                    _ => None,
                }
            })
            .collect();
        candidates.sort_by_key(|(_, order_no)| *order_no);
        candidates.truncate(limit);

        let mut out = Vec::with_capacity(candidates.len());
        for (id, _) in candidates {
            if let Some(mut entry) = self.entries.get_mut(&id) {
                entry.lock_expires_at = Some(now + Duration::from_secs(lock_secs));
                out.push(entry.request.clone());
            }
        }
        Ok(out)
    }

    async fn prolong_request_lock(&self, id: &str, _forefront: bool, lock_secs: u64) -> anyhow::Result<()> {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.lock_expires_at = Some(Instant::now() + Duration::from_secs(lock_secs));
        }
        Ok(())
    }

    async fn delete_request_lock(&self, id: &str, _forefront: bool) -> anyhow::Result<()> {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.lock_expires_at = None;
        }
        Ok(())
    }

    async fn is_empty(&self) -> anyhow::Result<bool> {
        Ok(self.pending_count.load(Ordering::Relaxed) <= 0)
    }

    async fn drop(&self) -> anyhow::Result<()> {
        self.entries.clear();
        self.pending_count.store(0, Ordering::Relaxed);
        self.handled_count.store(0, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::UniqueKeyOptions;

    fn request(url: &str) -> Request {
        Request::from_url(url, None, &UniqueKeyOptions::default()).expect("valid url")
    }

    #[tokio::test]
    async fn duplicate_id_does_not_reorder_or_duplicate() {
        let client = MemoryRequestQueueClient::new();
        let r = request("https://example.com/a");
        let first = client.add_request(r.clone(), false).await.expect("add");
        assert!(!first.was_already_present);
        let second = client.add_request(r, false).await.expect("add");
        assert!(second.was_already_present);
        assert_eq!(client.pending_count(), 1);
    }

    #[tokio::test]
    async fn list_and_lock_head_respects_order_no_and_locks() {
        let client = MemoryRequestQueueClient::new();
        client.add_request(request("https://example.com/a"), false).await.unwrap();
        client.add_request(request("https://example.com/b"), false).await.unwrap();
        client.add_request(request("https://example.com/d"), true).await.unwrap();

        let head = client.list_and_lock_head(10, 60).await.expect("list head");
        assert_eq!(head[0].url, "https://example.com/d", "forefront must come first");

        let second_call = client.list_and_lock_head(10, 60).await.expect("list head again");
        assert!(second_call.is_empty(), "already-locked entries must not be returned again");
    }

    #[tokio::test]
    async fn lease_expiry_makes_request_fetchable_again() {
        let client = MemoryRequestQueueClient::new();
        client.add_request(request("https://example.com/a"), false).await.unwrap();
        let _ = client.list_and_lock_head(10, 0).await.expect("list head");
        tokio::time::sleep(Duration::from_millis(5)).await;
        let head = client.list_and_lock_head(10, 60).await.expect("list head after expiry");
        assert_eq!(head.len(), 1, "expired lease must re-expose the request");
    }
}
