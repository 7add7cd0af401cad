//! Request-label dispatch, per `spec.md` §4.G ("context assembly").
//!
//! Grounded in the teacher's `crawl_engine/orchestrator.rs` dispatch-by-
//! kind `match`, generalized into a registerable table keyed by
//! `request.meta.label` instead of a fixed enum of page kinds.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::CrawlerError;

type HandlerFuture<TContext> = Pin<Box<dyn Future<Output = Result<(), CrawlerError>> + Send>>;
type Handler<TContext> = Arc<dyn Fn(TContext) -> HandlerFuture<TContext> + Send + Sync>;

/// Dispatches a `CrawlingContext` to one of several registered handlers
/// based on `request.meta.label`, falling back to a default handler.
pub struct Router<TContext> {
    default_handler: Option<Handler<TContext>>,
    label_handlers: HashMap<String, Handler<TContext>>,
}

impl<TContext> Default for Router<TContext> {
    fn default() -> Self {
        Self {
            default_handler: None,
            label_handlers: HashMap::new(),
        }
    }
}

impl<TContext: Send + 'static> Router<TContext> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default<F, Fut>(&mut self, handler: F)
    where
        F: Fn(TContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CrawlerError>> + Send + 'static,
    {
        self.default_handler = Some(Arc::new(move |ctx| Box::pin(handler(ctx))));
    }

    pub fn set_for_label<F, Fut>(&mut self, label: impl Into<String>, handler: F)
    where
        F: Fn(TContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CrawlerError>> + Send + 'static,
    {
        self.label_handlers
            .insert(label.into(), Arc::new(move |ctx| Box::pin(handler(ctx))));
    }

    /// Dispatches by `label`, falling back to the default handler.
    /// Returns [`CrawlerError::ContextPipeline`] when no handler applies.
    pub async fn dispatch(&self, label: Option<&str>, context: TContext) -> Result<(), CrawlerError> {
        let handler = label
            .and_then(|label| self.label_handlers.get(label))
            .or(self.default_handler.as_ref());

        match handler {
            Some(handler) => handler(context).await,
            None => Err(CrawlerError::ContextPipeline(
                crate::error::ContextPipelineError::Initialization(match label {
                    Some(label) => format!("no handler registered for label '{label}' and no default handler set"),
                    None => "no default handler registered".to_string(),
                }),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn dispatches_to_labeled_handler_over_default() {
        let mut router: Router<u32> = Router::new();
        let default_hits = Arc::new(AtomicUsize::new(0));
        let labeled_hits = Arc::new(AtomicUsize::new(0));

        {
            let hits = Arc::clone(&default_hits);
            router.set_default(move |_ctx| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
            });
        }
        {
            let hits = Arc::clone(&labeled_hits);
            router.set_for_label("detail", move |_ctx| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
            });
        }

        router.dispatch(Some("detail"), 1).await.unwrap();
        router.dispatch(None, 1).await.unwrap();
        router.dispatch(Some("unknown"), 1).await.unwrap();

        assert_eq!(labeled_hits.load(Ordering::Relaxed), 1);
        assert_eq!(default_hits.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn missing_handler_is_a_context_pipeline_error() {
        let router: Router<u32> = Router::new();
        let err = router.dispatch(None, 1).await.unwrap_err();
        assert!(matches!(err, CrawlerError::ContextPipeline(_)));
    }
}
