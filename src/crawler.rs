//! `BasicCrawler`: the orchestrator tying together the request queue,
//! session pool, autoscaled pool, and router, per `spec.md` §4.G.
//!
//! Grounded in `basic_crawler.py`'s `__run_task_function` state machine
//! (retry/session-rotation/failure classification) and the teacher's
//! `crawl_engine/orchestrator.rs` for the overall task-per-request shape.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::autoscaled_pool::{AutoscaledPool, AutoscaledPoolConfig};
use crate::context::CrawlingContext;
use crate::domain::{matches_enqueue_strategy, UrlPatterns};
use crate::error::{ContextPipelineError, CrawlerError, InternalOperationError, UserDefinedErrorHandlerError};
use crate::request::{EnqueueStrategy, Request, RequestState};
use crate::request_queue::RequestQueue;
use crate::router::Router;
use crate::session_pool::SessionPool;
use crate::snapshotter::Snapshotter;
use crate::storage::{DatasetClient, KeyValueStoreClient};

type ErrorHandlerFuture = Pin<Box<dyn Future<Output = Result<Option<Request>, CrawlerError>> + Send>>;
type FailedRequestHandlerFuture = Pin<Box<dyn Future<Output = Result<(), CrawlerError>> + Send>>;
/// Invoked on a retryable failure before the request is reclaimed; may
/// substitute a replacement `Request` (`spec.md` §4.G). A handler error
/// is fatal and terminates the run (`spec.md` §7).
type ErrorHandlerFn = Arc<dyn Fn(Request, CrawlerError) -> ErrorHandlerFuture + Send + Sync>;
/// Invoked once a request is being marked permanently failed (`spec.md`
/// §4.G). A handler error is fatal and terminates the run (`spec.md` §7).
type FailedRequestHandlerFn = Arc<dyn Fn(Request, CrawlerError) -> FailedRequestHandlerFuture + Send + Sync>;

#[derive(Debug, Clone)]
pub struct BasicCrawlerConfig {
    pub max_request_retries: u32,
    pub max_session_rotations: u32,
    pub default_enqueue_strategy: EnqueueStrategy,
    /// Wall-clock budget for a single `router.dispatch` call, per
    /// `spec.md` §5. `None` disables the timeout.
    pub request_handler_timeout: Option<Duration>,
    /// Budget for a single attempt of an internal op (queue/session
    /// fetch, mark-handled), retried up to 3 times, per `spec.md` §5.
    pub internal_timeout: Duration,
}

impl Default for BasicCrawlerConfig {
    fn default() -> Self {
        let request_handler_timeout = Duration::from_secs(60);
        Self {
            max_request_retries: 3,
            max_session_rotations: 10,
            default_enqueue_strategy: EnqueueStrategy::All,
            request_handler_timeout: Some(request_handler_timeout),
            internal_timeout: (2 * request_handler_timeout).max(Duration::from_secs(5 * 60)),
        }
    }
}

/// Outcome of running one request through the handler, classified so the
/// caller can decide retry / session-rotate / fail without re-deriving
/// the distinctions baked into `CrawlerError`.
enum Outcome {
    Success,
    RetryableFailure(CrawlerError),
    SessionFailure(CrawlerError),
    NonRetryableFailure(CrawlerError),
    /// A context-pipeline interruption (`spec.md` §7): drop the request
    /// silently, marking it handled without touching the session or
    /// invoking any failure handler.
    Interrupted,
}

fn classify(err: CrawlerError) -> Outcome {
    match err {
        CrawlerError::Session(_) => Outcome::SessionFailure(err),
        CrawlerError::ContextPipeline(ContextPipelineError::Initialization(_)) => Outcome::RetryableFailure(err),
        CrawlerError::ContextPipeline(ContextPipelineError::Interrupted(_)) => Outcome::Interrupted,
        CrawlerError::Validation(_) | CrawlerError::UserDefinedHandler(_) => Outcome::NonRetryableFailure(err),
        CrawlerError::Transport(_) | CrawlerError::Internal(_) | CrawlerError::Handler(_) => {
            Outcome::RetryableFailure(err)
        }
        other => Outcome::NonRetryableFailure(other),
    }
}

pub struct BasicCrawler<TContext> {
    config: BasicCrawlerConfig,
    queue: Arc<RequestQueue>,
    sessions: Arc<SessionPool>,
    dataset: Arc<dyn DatasetClient>,
    kvs: Arc<dyn KeyValueStoreClient>,
    router: Arc<Router<TContext>>,
    patterns: UrlPatterns,
    pool: AutoscaledPool,
    error_handler: Option<ErrorHandlerFn>,
    failed_request_handler: Option<FailedRequestHandlerFn>,
}

impl<TContext> BasicCrawler<TContext>
where
    TContext: Send + 'static,
{
    pub fn new(
        config: BasicCrawlerConfig,
        pool_config: AutoscaledPoolConfig,
        queue: Arc<RequestQueue>,
        sessions: Arc<SessionPool>,
        dataset: Arc<dyn DatasetClient>,
        kvs: Arc<dyn KeyValueStoreClient>,
        router: Arc<Router<TContext>>,
        patterns: UrlPatterns,
        snapshotter: Arc<Snapshotter>,
    ) -> Self {
        Self {
            config,
            queue,
            sessions,
            dataset,
            kvs,
            router,
            patterns,
            pool: AutoscaledPool::new(pool_config, snapshotter),
            error_handler: None,
            failed_request_handler: None,
        }
    }

    /// Registers a handler consulted on retryable failures, per
    /// `spec.md` §4.G. May return a replacement `Request` to reclaim in
    /// place of the original.
    pub fn with_error_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Request, CrawlerError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Request>, CrawlerError>> + Send + 'static,
    {
        self.error_handler = Some(Arc::new(move |request, err| Box::pin(handler(request, err))));
        self
    }

    /// Registers a handler invoked once a request is about to be marked
    /// permanently failed, per `spec.md` §4.G.
    pub fn with_failed_request_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Request, CrawlerError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CrawlerError>> + Send + 'static,
    {
        self.failed_request_handler = Some(Arc::new(move |request, err| Box::pin(handler(request, err))));
        self
    }

    pub async fn add_request(&self, request: Request, forefront: bool) -> anyhow::Result<()> {
        self.queue.add_request(request, forefront).await?;
        Ok(())
    }

    /// Runs the crawl to completion via the [`AutoscaledPool`], fetching
    /// one request per worker task, building a `CrawlingContext`,
    /// dispatching through the router, and applying the retry / session-
    /// rotation / failure state machine on the outcome.
    pub async fn run<F>(self: Arc<Self>, context_factory: F) -> anyhow::Result<()>
    where
        F: Fn(CrawlingContext) -> TContext + Send + Sync + 'static,
    {
        let context_factory = Arc::new(context_factory);
        let crawler_for_ready = Arc::clone(&self);
        let crawler_for_finished = Arc::clone(&self);
        let crawler_for_task = Arc::clone(&self);

        self.pool
            .run(
                move || {
                    let crawler = Arc::clone(&crawler_for_ready);
                    Box::pin(async move { !crawler.queue.is_empty().await.unwrap_or(true) })
                },
                move || {
                    let crawler = Arc::clone(&crawler_for_finished);
                    Box::pin(async move { crawler.queue.is_finished().await.unwrap_or(false) })
                },
                move || {
                    let crawler = Arc::clone(&crawler_for_task);
                    let context_factory = Arc::clone(&context_factory);
                    Box::pin(async move { crawler.run_one(context_factory.as_ref()).await })
                },
            )
            .await
    }

    /// Fetches one request and drives it through the handler state
    /// machine. Returns `Ok(())` in every case that shouldn't abort the
    /// whole crawl (including a handled user-facing failure); only a
    /// fatal/internal error propagates.
    async fn run_one<F>(&self, context_factory: &F) -> anyhow::Result<()>
    where
        F: Fn(CrawlingContext) -> TContext,
    {
        let Some(request) = self
            .with_internal_retry("fetch_next_request", || {
                Box::pin(self.queue.fetch_next_request())
                    as Pin<Box<dyn Future<Output = anyhow::Result<Option<Request>>> + Send + '_>>
            })
            .await?
        else {
            return Ok(());
        };

        let session = request
            .meta
            .session_id
            .as_deref()
            .and_then(|id| self.sessions.get_session_by_id(id))
            .or_else(|| Some(self.sessions.get_session()));

        let mut request = request;
        request.meta.state = RequestState::RequestHandler;
        if let Some(session) = &session {
            request.meta.session_id = Some(session.id.clone());
        }

        let label = request.meta.label.clone();
        let ctx = CrawlingContext::new(request.clone(), session.clone(), None);
        let run_result = Arc::clone(&ctx.run_result);
        let user_context = context_factory(ctx);

        let dispatch = self.router.dispatch(label.as_deref(), user_context);
        let outcome = match self.config.request_handler_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, dispatch).await {
                Ok(Ok(())) => Outcome::Success,
                Ok(Err(err)) => classify(err),
                Err(_) => Outcome::RetryableFailure(CrawlerError::Internal(InternalOperationError::Timeout(timeout))),
            },
            None => match dispatch.await {
                Ok(()) => Outcome::Success,
                Err(err) => classify(err),
            },
        };

        self.handle_outcome(request, session, run_result, outcome).await
    }

    async fn handle_outcome(
        &self,
        mut request: Request,
        session: Option<crate::session::Session>,
        run_result: Arc<crate::context::RunResult>,
        outcome: Outcome,
    ) -> anyhow::Result<()> {
        match outcome {
            Outcome::Success => {
                if let Ok(run_result) = Arc::try_unwrap(run_result) {
                    run_result
                        .commit(&self.queue, self.dataset.as_ref(), self.kvs.as_ref())
                        .await?;
                }
                if let Some(mut session) = session {
                    session.mark_good();
                    self.sessions.put_session(session);
                }
                request.meta.state = RequestState::Done;
                self.with_internal_retry("mark_request_as_handled", || {
                    Box::pin(self.queue.mark_request_as_handled(request.clone()))
                        as Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>
                })
                .await?;
                Ok(())
            }
            Outcome::SessionFailure(err) => {
                log::warn!("session error on request {}: {err}", request.id);
                if let Some(mut session) = session {
                    session.retire();
                    self.sessions.put_session(session);
                }
                request.meta.session_rotation_count += 1;
                if request.meta.session_rotation_count > self.config.max_session_rotations {
                    self.fail_request(request, None, err).await
                } else {
                    request.meta.session_id = None;
                    self.queue.reclaim_request(request, false).await?;
                    Ok(())
                }
            }
            Outcome::RetryableFailure(err) => {
                log::warn!("retryable error on request {}: {err}", request.id);
                let max_retries = request.meta.max_retries.unwrap_or(self.config.max_request_retries);
                if request.meta.no_retry || request.meta.retry_count >= max_retries {
                    self.fail_request(request, session, err).await
                } else {
                    request.meta.retry_count += 1;
                    let request = match &self.error_handler {
                        Some(handler) => match handler(request.clone(), err).await {
                            Ok(Some(replacement)) => replacement,
                            Ok(None) => request,
                            Err(fatal) => return Err(Self::fatal_handler_error(fatal)),
                        },
                        None => request,
                    };
                    self.queue.reclaim_request(request, false).await?;
                    Ok(())
                }
            }
            Outcome::NonRetryableFailure(err) => {
                log::warn!("non-retryable error on request {}: {err}", request.id);
                self.fail_request(request, session, err).await
            }
            Outcome::Interrupted => {
                if let Some(session) = session {
                    self.sessions.put_session(session);
                }
                request.meta.state = RequestState::Done;
                self.with_internal_retry("mark_request_as_handled", || {
                    Box::pin(self.queue.mark_request_as_handled(request.clone()))
                        as Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>
                })
                .await?;
                Ok(())
            }
        }
    }

    /// Retries an internal queue/session op up to 3 times, each attempt
    /// bounded by `internal_timeout`, per `spec.md` §5/§7.
    async fn with_internal_retry<T, F>(&self, op: &str, mut f: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + '_>>,
    {
        let mut last_err = None;
        for attempt in 0..3u32 {
            match tokio::time::timeout(self.config.internal_timeout, f()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => {
                    log::warn!("internal operation '{op}' failed (attempt {}): {err}", attempt + 1);
                    last_err = Some(err);
                }
                Err(_) => {
                    log::warn!(
                        "internal operation '{op}' timed out after {:?} (attempt {})",
                        self.config.internal_timeout,
                        attempt + 1
                    );
                    last_err = Some(anyhow::Error::from(CrawlerError::Internal(InternalOperationError::Timeout(
                        self.config.internal_timeout,
                    ))));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("internal operation '{op}' failed with no error recorded")))
    }

    /// Marks a request handled (so it's never re-fetched, avoiding an
    /// infinite retry loop), invokes the failed-request handler (if any),
    /// then marks its session bad, per `spec.md` §4.G's ordering.
    async fn fail_request(
        &self,
        mut request: Request,
        session: Option<crate::session::Session>,
        err: CrawlerError,
    ) -> anyhow::Result<()> {
        request.meta.state = RequestState::Error;
        self.with_internal_retry("mark_request_as_handled", || {
            Box::pin(self.queue.mark_request_as_handled(request.clone()))
        })
        .await?;
        if let Some(handler) = &self.failed_request_handler {
            if let Err(fatal) = handler(request, err).await {
                return Err(Self::fatal_handler_error(fatal));
            }
        }
        if let Some(mut session) = session {
            session.mark_bad();
            self.sessions.put_session(session);
        }
        Ok(())
    }

    /// Wraps an error raised by a user-supplied error/failed-request
    /// handler, per `spec.md` §7: these are fatal and terminate the run.
    fn fatal_handler_error(err: CrawlerError) -> anyhow::Error {
        anyhow::Error::from(CrawlerError::UserDefinedHandler(UserDefinedErrorHandlerError(err.into())))
    }

    /// Filters a freshly discovered URL against the enqueue strategy and
    /// include/exclude patterns, returning the `Request` to enqueue (or
    /// `None` if it should be dropped), per `spec.md` §4.G.
    pub fn prepare_enqueue(&self, source_url: &str, candidate_url: &str, strategy: Option<EnqueueStrategy>) -> Option<Request> {
        let strategy = strategy.unwrap_or(self.config.default_enqueue_strategy);
        if !matches_enqueue_strategy(strategy, source_url, candidate_url) {
            return None;
        }
        if !self.patterns.is_allowed(candidate_url) {
            return None;
        }
        Request::from_url(candidate_url.to_string(), None, &Default::default()).ok()
    }

    pub fn abort(&self) {
        self.pool.abort();
    }
}
