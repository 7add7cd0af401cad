//! Crate-wide error types.
//!
//! Each subsystem gets its own `thiserror` enum (the teacher's
//! `crawl_events::errors::EventBusError` idiom); [`CrawlerError`] unifies
//! them for call sites that cross subsystem boundaries.

use thiserror::Error;

/// Raised at construction or call sites per the validation taxonomy
/// (`spec.md` §7): never retried, always surfaced synchronously.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("concurrency bounds invalid: min={min}, max={max}")]
    InvalidConcurrencyBounds { min: usize, max: usize },
    #[error("desired_concurrency must be >= 1, got {0}")]
    InvalidDesiredConcurrency(usize),
    #[error("always_enqueue cannot be combined with an explicit unique_key")]
    AlwaysEnqueueWithUniqueKey,
    #[error("request id {id} does not match hash of unique_key {unique_key}")]
    IdUniqueKeyMismatch { id: String, unique_key: String },
}

/// Lifecycle errors for components with an explicit start/stop contract
/// (Snapshotter, SessionPool) per the design note in `spec.md` §9.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("already started")]
    AlreadyStarted,
    #[error("not started")]
    NotStarted,
}

/// Transport-classified errors (`spec.md` §7): distinguishes proxy errors
/// from HTTP status errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("proxy error: {0}")]
    Proxy(String),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Explicit signal that the current session is compromised.
#[derive(Debug, Error)]
#[error("session error: {0}")]
pub struct SessionError(pub String);

/// Context-pipeline errors: initialization (retryable by default) vs.
/// interruption (drop the request silently, marking it handled).
#[derive(Debug, Error)]
pub enum ContextPipelineError {
    #[error("context pipeline initialization failed: {0}")]
    Initialization(String),
    #[error("context pipeline interrupted: {0}")]
    Interrupted(String),
}

/// Wraps a user request handler's error with the request it was handling.
#[derive(Debug, Error)]
#[error("handler error for request {request_id}: {source}")]
pub struct HandlerError {
    pub request_id: String,
    #[source]
    pub source: anyhow::Error,
}

/// A user-supplied error handler or failed-request handler itself raised;
/// per `spec.md` §7 this is fatal and terminates the run.
#[derive(Debug, Error)]
#[error("user-defined error handler failed: {0}")]
pub struct UserDefinedErrorHandlerError(pub anyhow::Error);

/// Queue/session-store I/O errors, retried by the caller up to three times
/// under `internal_timeout` before escalating.
#[derive(Debug, Error)]
pub enum InternalOperationError {
    #[error("storage operation failed: {0}")]
    Storage(String),
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Top-level error unifying the taxonomy for APIs spanning subsystems.
#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    ContextPipeline(#[from] ContextPipelineError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error(transparent)]
    UserDefinedHandler(#[from] UserDefinedErrorHandlerError),
    #[error(transparent)]
    Internal(#[from] InternalOperationError),
    #[error("fatal error: {0}")]
    Fatal(#[from] anyhow::Error),
}
