//! Combines a read-only [`RequestLoader`] with a [`RequestQueue`] so a
//! crawl can seed from a static source while still supporting dynamic
//! enqueues discovered along the way, per `spec.md` §4.E.
//!
//! Grounded in `original_source/request_loaders/_request_manager_tandem.py`:
//! delegate to the queue once the loader is exhausted; otherwise pull one
//! request from the loader, push it onto the queue at the forefront, mark
//! it handled on the loader side immediately (the loader's own bookkeeping
//! is just "did we hand this out", not "did it succeed"), and then fetch
//! from the queue as normal so the request flows through the same
//! lease/dedup path as anything discovered during the crawl.

use std::sync::Arc;

use crate::request::Request;
use crate::request_loader::RequestLoader;
use crate::request_queue::RequestQueue;

pub struct RequestManagerTandem {
    loader: Arc<dyn RequestLoader>,
    queue: Arc<RequestQueue>,
}

impl RequestManagerTandem {
    pub fn new(loader: Arc<dyn RequestLoader>, queue: Arc<RequestQueue>) -> Self {
        Self { loader, queue }
    }

    /// Pulls the loader dry into the queue (one request per call) before
    /// falling back to the queue alone once the loader reports finished.
    pub async fn fetch_next_request(&self) -> anyhow::Result<Option<Request>> {
        if !self.loader.is_finished().await? {
            if let Some(request) = self.loader.fetch_next_request().await? {
                let id = request.id.clone();
                match self.queue.add_request(request, true).await {
                    Ok(_) => {
                        // The loader's job was just "hand this out once";
                        // the queue now owns retry/lease lifecycle for it.
                        if let Err(err) = self.mark_loader_handled_by_id(&id).await {
                            log::warn!("failed to mark loader request {id} handled: {err}");
                        }
                    }
                    Err(err) => {
                        log::warn!("dropping request {id} from loader: failed to enqueue: {err}");
                    }
                }
            }
        }
        self.queue.fetch_next_request().await
    }

    async fn mark_loader_handled_by_id(&self, id: &str) -> anyhow::Result<()> {
        // The loader interface takes a `&Request`, not bare metadata; we
        // look it back up via the queue since it was just inserted there.
        if let Some(request) = self.queue.get_request(id).await? {
            self.loader.mark_request_as_handled(&request).await?;
        }
        Ok(())
    }

    pub async fn mark_request_as_handled(&self, request: Request) -> anyhow::Result<()> {
        self.queue.mark_request_as_handled(request).await
    }

    pub async fn reclaim_request(&self, request: Request, forefront: bool) -> anyhow::Result<()> {
        self.queue.reclaim_request(request, forefront).await
    }

    pub async fn add_request(&self, request: Request, forefront: bool) -> anyhow::Result<()> {
        self.queue.add_request(request, forefront).await?;
        Ok(())
    }

    pub async fn is_finished(&self) -> anyhow::Result<bool> {
        Ok(self.loader.is_finished().await? && self.queue.is_finished().await?)
    }
}
