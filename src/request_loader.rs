//! Read-only request sources, per `spec.md` §4.E.
//!
//! Grounded in `original_source/request_loaders/_request_list.py`: the
//! persisted-progress / lookahead-buffer design is carried over, adapted
//! to an explicit `next()`-style iterator rather than Python's mixed
//! sync/async iterable protocol.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::request::{Request, UniqueKeyOptions};

/// Read-only source of requests, optionally fronting a `RequestQueue`
/// via [`crate::tandem::RequestManagerTandem`].
#[async_trait]
pub trait RequestLoader: Send + Sync {
    async fn fetch_next_request(&self) -> anyhow::Result<Option<Request>>;
    async fn mark_request_as_handled(&self, request: &Request) -> anyhow::Result<()>;
    async fn is_empty(&self) -> anyhow::Result<bool>;
    async fn is_finished(&self) -> anyhow::Result<bool>;
    async fn get_handled_count(&self) -> anyhow::Result<usize>;
    async fn get_total_count(&self) -> anyhow::Result<usize>;
}

/// Persisted progress for a [`RequestList`], matching the
/// `SDK_REQUEST_LIST_STATE-<name>` layout in `spec.md` §6.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestListState {
    pub next_index: usize,
    pub next_unique_key: Option<String>,
    pub in_progress: Vec<String>,
}

/// A static, ordered, in-memory list of URLs (or `Request`s) fronting the
/// rest of the pipeline; supports resuming from persisted progress with a
/// consistency check (`spec.md` §4.E: "mismatch is a hard error").
pub struct RequestList {
    name: String,
    requests: Vec<Request>,
    state: Mutex<RequestListState>,
    lookahead: Mutex<VecDeque<Request>>,
    handled_count: std::sync::atomic::AtomicUsize,
}

impl RequestList {
    pub fn new(name: impl Into<String>, urls: Vec<String>) -> anyhow::Result<Self> {
        let requests = urls
            .into_iter()
            .map(|url| Request::from_url(url, None, &UniqueKeyOptions::default()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.into(),
            requests,
            state: Mutex::new(RequestListState::default()),
            lookahead: Mutex::new(VecDeque::new()),
            handled_count: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    pub fn persistence_key(&self) -> String {
        format!("SDK_REQUEST_LIST_STATE-{}", self.name)
    }

    /// Resumes from persisted progress, checking that the request at
    /// `next_index` still has the expected `unique_key`.
    pub async fn resume_from(&self, persisted: RequestListState) -> anyhow::Result<()> {
        if let Some(expected_key) = &persisted.next_unique_key {
            if let Some(request) = self.requests.get(persisted.next_index) {
                let actual = crate::request::compute_unique_key(
                    &request.url,
                    &request.method,
                    &request.headers,
                    request.payload.as_deref(),
                    None,
                    &UniqueKeyOptions::default(),
                );
                if &actual != expected_key {
                    anyhow::bail!(
                        "RequestList '{}' resume mismatch at index {}: expected unique_key {expected_key}, got {actual}. The source list changed.",
                        self.name,
                        persisted.next_index
                    );
                }
            }
        }
        *self.state.lock().await = persisted;
        Ok(())
    }

    async fn ensure_lookahead(&self) {
        let mut state = self.state.lock().await;
        let mut lookahead = self.lookahead.lock().await;
        while lookahead.len() < 2 && state.next_index < self.requests.len() {
            let request = self.requests[state.next_index].clone();
            state.next_index += 1;
            state.next_unique_key = self.requests.get(state.next_index).map(|r| {
                crate::request::compute_unique_key(
                    &r.url,
                    &r.method,
                    &r.headers,
                    r.payload.as_deref(),
                    None,
                    &UniqueKeyOptions::default(),
                )
            });
            lookahead.push_back(request);
        }
    }
}

#[async_trait]
impl RequestLoader for RequestList {
    async fn fetch_next_request(&self) -> anyhow::Result<Option<Request>> {
        self.ensure_lookahead().await;
        let mut lookahead = self.lookahead.lock().await;
        let mut state = self.state.lock().await;
        let Some(request) = lookahead.pop_front() else {
            return Ok(None);
        };
        state.in_progress.push(request.id.clone());
        Ok(Some(request))
    }

    async fn mark_request_as_handled(&self, request: &Request) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.in_progress.retain(|id| id != &request.id);
        self.handled_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    async fn is_empty(&self) -> anyhow::Result<bool> {
        let state = self.state.lock().await;
        let lookahead = self.lookahead.lock().await;
        Ok(lookahead.is_empty() && state.next_index >= self.requests.len())
    }

    async fn is_finished(&self) -> anyhow::Result<bool> {
        let empty = self.is_empty().await?;
        let state = self.state.lock().await;
        Ok(empty && state.in_progress.is_empty())
    }

    async fn get_handled_count(&self) -> anyhow::Result<usize> {
        Ok(self.handled_count.load(std::sync::atomic::Ordering::Relaxed))
    }

    async fn get_total_count(&self) -> anyhow::Result<usize> {
        Ok(self.requests.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetches_in_order_and_tracks_handled_count() {
        let list = RequestList::new(
            "test",
            vec!["https://example.com/a".into(), "https://example.com/b".into()],
        )
        .expect("valid urls");

        let first = list.fetch_next_request().await.unwrap().expect("a");
        assert_eq!(first.url, "https://example.com/a");
        list.mark_request_as_handled(&first).await.unwrap();

        let second = list.fetch_next_request().await.unwrap().expect("b");
        assert_eq!(second.url, "https://example.com/b");
        list.mark_request_as_handled(&second).await.unwrap();

        assert!(list.fetch_next_request().await.unwrap().is_none());
        assert!(list.is_finished().await.unwrap());
        assert_eq!(list.get_handled_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn resume_rejects_mismatched_unique_key() {
        let list = RequestList::new("test", vec!["https://example.com/a".into()]).expect("valid url");
        let bad_state = RequestListState {
            next_index: 0,
            next_unique_key: Some("not-the-real-key".to_string()),
            in_progress: Vec::new(),
        };
        let err = list.resume_from(bad_state).await;
        assert!(err.is_err(), "mismatched unique_key must be a hard error");
    }
}
