//! Abstract HTTP client interface consumed by the core, per `spec.md` §6.
//!
//! Transport mechanics (TLS, HTTP/2, proxies) are an explicit non-goal;
//! this module only defines the seam the core calls through.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::request::Request;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
    Options,
}

/// Best-effort mapping from `Request::method` (a plain string, since
/// `Request` is serialized and doesn't depend on this module) to the
/// transport-facing enum.
pub fn parse_http_method(method: &str) -> HttpMethod {
    match method.to_uppercase().as_str() {
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "DELETE" => HttpMethod::Delete,
        "HEAD" => HttpMethod::Head,
        "PATCH" => HttpMethod::Patch,
        "OPTIONS" => HttpMethod::Options,
        _ => HttpMethod::Get,
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// A streamed response body: status/headers are available immediately,
/// the body arrives as a sequence of chunks (`spec.md` §6's "async byte
/// iterator").
pub struct StreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: BoxStream<'static, anyhow::Result<Vec<u8>>>,
}

/// Outcome of a full `crawl()` round-trip: the response plus which
/// session (if any) it was bound to, for callers that want it without
/// threading the original `Session` back through.
pub struct CrawlingResult {
    pub response: HttpResponse,
    pub session_id: Option<String>,
}

/// Abstract transport the core consumes to send requests and to read the
/// client's rate-limit-error histogram for the snapshotter.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send_request(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &HashMap<String, String>,
        payload: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> anyhow::Result<HttpResponse>;

    /// Streams a response body rather than buffering it whole, per
    /// `spec.md` §6.
    async fn stream(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &HashMap<String, String>,
        payload: Option<&[u8]>,
    ) -> anyhow::Result<StreamResponse>;

    /// Sends `request`, attaching the session's cookie jar as a `Cookie`
    /// header when a session is bound, per `spec.md` §6. The default
    /// implementation composes [`Self::send_request`]; a real transport
    /// may override it to also drive proxy selection/statistics.
    async fn crawl(
        &self,
        request: &Request,
        session: Option<&Session>,
        proxy_url: Option<&str>,
    ) -> anyhow::Result<CrawlingResult> {
        let _ = proxy_url;
        let mut headers = request.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<HashMap<_, _>>();
        if let Some(session) = session {
            if !session.cookies.is_empty() {
                let cookie_header = session
                    .cookies
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                headers.insert("cookie".to_string(), cookie_header);
            }
        }
        let response = self
            .send_request(
                parse_http_method(&request.method),
                &request.url,
                &headers,
                request.payload.as_deref(),
                None,
            )
            .await?;
        Ok(CrawlingResult {
            response,
            session_id: session.map(|s| s.id.clone()),
        })
    }

    /// `retry_count -> error_count` histogram of rate-limit errors seen so
    /// far, consulted by the snapshotter's client-overload sample
    /// (`spec.md` §4.A). Bucket index is a configuration knob, not
    /// hard-coded (`spec.md` §9).
    fn get_rate_limit_errors(&self) -> HashMap<u32, u64>;
}
