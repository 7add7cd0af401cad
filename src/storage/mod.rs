//! Storage client interface consumed by the core, per `spec.md` §6.
//!
//! Implementations for file-system and hosted backends are out of scope;
//! this crate ships a single in-memory reference implementation (see
//! [`memory`]) since `RequestQueue` and `SessionPool` need *some* backing
//! to be testable against `spec.md` §8's scenarios.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::request::Request;

#[async_trait]
pub trait DatasetClient: Send + Sync {
    async fn push_data(&self, item: Value) -> anyhow::Result<()>;
    async fn get_data(&self, index: usize) -> anyhow::Result<Option<Value>>;
    async fn iterate_items(&self) -> anyhow::Result<Vec<Value>>;
    async fn drop(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait KeyValueStoreClient: Send + Sync {
    async fn get_value(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn set_value(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()>;
    async fn delete_value(&self, key: &str) -> anyhow::Result<()>;
    async fn iterate_keys(&self) -> anyhow::Result<Vec<String>>;
    async fn record_exists(&self, key: &str) -> anyhow::Result<bool>;
    async fn get_public_url(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn drop(&self) -> anyhow::Result<()>;
}

/// Result of `add_request`/equivalent mutating calls, per `spec.md` §4.D.
#[derive(Debug, Clone)]
pub struct AddRequestResult {
    pub id: String,
    pub was_already_present: bool,
    pub was_already_handled: bool,
}

/// Durable backing for a `RequestQueue`, matching
/// `base_request_queue_client.py`'s method set.
#[async_trait]
pub trait RequestQueueClient: Send + Sync {
    async fn add_request(&self, request: Request, forefront: bool) -> anyhow::Result<AddRequestResult>;
    async fn batch_add_requests(
        &self,
        requests: Vec<Request>,
        forefront: bool,
    ) -> anyhow::Result<(Vec<AddRequestResult>, Vec<Request>)>;
    async fn get_request(&self, id: &str) -> anyhow::Result<Option<Request>>;
    async fn update_request(&self, request: Request, forefront: bool) -> anyhow::Result<AddRequestResult>;
    async fn list_and_lock_head(&self, limit: usize, lock_secs: u64) -> anyhow::Result<Vec<Request>>;
    async fn prolong_request_lock(&self, id: &str, forefront: bool, lock_secs: u64) -> anyhow::Result<()>;
    async fn delete_request_lock(&self, id: &str, forefront: bool) -> anyhow::Result<()>;
    async fn is_empty(&self) -> anyhow::Result<bool>;
    async fn drop(&self) -> anyhow::Result<()>;
}
