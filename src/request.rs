//! `Request`: an immutable-by-default unit of work, deduplicated by
//! `unique_key` and identified by a stable `id` derived from it.
//!
//! Crawler-controlled bookkeeping (retry count, session binding, lifecycle
//! state, ...) lives in [`RequestMeta`] rather than inline on `Request`,
//! per the design note in `spec.md` §9 ("tagged map where the
//! crawler-controlled slice is a strongly typed record").

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

use crate::error::ValidationError;

/// Lifecycle state of a request as it passes through the orchestrator,
/// mirroring `original_source`'s `RequestState` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    Unprocessed,
    AlreadyHandled,
    RequestHandler,
    Done,
    ErrorHandler,
    Error,
    Skipped,
}

/// How a newly discovered URL is filtered relative to the request that
/// discovered it, per `spec.md` §4.G.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EnqueueStrategy {
    #[default]
    All,
    SameHostname,
    SameDomain,
    SameOrigin,
}

/// Crawler-controlled fields, kept separate from user-supplied `extras`
/// so that internal bookkeeping can't collide with arbitrary user data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMeta {
    pub retry_count: u32,
    pub max_retries: Option<u32>,
    pub session_rotation_count: u32,
    pub state: RequestState,
    pub crawl_depth: u32,
    pub forefront: bool,
    pub last_proxy_tier: Option<u8>,
    pub enqueue_strategy: EnqueueStrategy,
    pub session_id: Option<String>,
    pub handled_at: Option<chrono::DateTime<chrono::Utc>>,
    pub label: Option<String>,
    pub no_retry: bool,
}

impl Default for RequestMeta {
    fn default() -> Self {
        Self {
            retry_count: 0,
            max_retries: None,
            session_rotation_count: 0,
            state: RequestState::Unprocessed,
            crawl_depth: 0,
            forefront: false,
            last_proxy_tier: None,
            enqueue_strategy: EnqueueStrategy::All,
            session_id: None,
            handled_at: None,
            label: None,
            no_retry: false,
        }
    }
}

/// Options controlling `unique_key` canonicalization, per `spec.md` §3.
#[derive(Debug, Clone, Default)]
pub struct UniqueKeyOptions {
    pub keep_url_fragment: bool,
    pub use_extended_unique_key: bool,
    pub always_enqueue: bool,
}

/// A unit of crawl work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub payload: Option<Vec<u8>>,
    pub user_data: Map<String, Value>,
    pub meta: RequestMeta,
}

impl Request {
    /// Build a request from a URL, computing `unique_key`/`id` per
    /// `spec.md` §3 unless explicitly supplied.
    ///
    /// # Errors
    /// Returns [`ValidationError`] if the URL doesn't parse as HTTP(S), or
    /// if `always_enqueue` is combined with an explicit `unique_key`.
    pub fn from_url(
        url: impl Into<String>,
        unique_key: Option<String>,
        options: &UniqueKeyOptions,
    ) -> Result<Self, ValidationError> {
        let url = url.into();
        validate_http_url(&url)?;

        if options.always_enqueue && unique_key.is_some() {
            return Err(ValidationError::AlwaysEnqueueWithUniqueKey);
        }

        let method = "GET".to_string();
        let headers = BTreeMap::new();
        let payload: Option<Vec<u8>> = None;

        let mut key = unique_key.unwrap_or_else(|| {
            compute_unique_key(&url, &method, &headers, payload.as_deref(), None, options)
        });

        if options.always_enqueue {
            key = format!("{key}#{}", uuid::Uuid::new_v4());
        }

        let id = unique_key_to_request_id(&key);

        Ok(Self {
            id,
            url,
            method,
            headers,
            payload,
            user_data: Map::new(),
            meta: RequestMeta::default(),
        })
    }

    /// Construct a request with an explicit `id`, validating it matches
    /// the hash of `unique_key` (`spec.md` §3 invariant).
    pub fn with_explicit_id(mut self, id: String, unique_key: &str) -> Result<Self, ValidationError> {
        let expected = unique_key_to_request_id(unique_key);
        if id != expected {
            return Err(ValidationError::IdUniqueKeyMismatch {
                id,
                unique_key: unique_key.to_string(),
            });
        }
        self.id = id;
        Ok(self)
    }
}

/// Validates that `url` parses and uses the `http`/`https` scheme.
fn validate_http_url(url: &str) -> Result<(), ValidationError> {
    let parsed = Url::parse(url).map_err(|e| ValidationError::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ValidationError::InvalidUrl(format!(
            "unsupported scheme {other:?} in {url}"
        ))),
    }
}

/// Canonicalizes a URL into a deduplication key: lowercase scheme and
/// host, default ports dropped, query parameters sorted by key then
/// value, fragment stripped unless `keep_url_fragment`. Optionally
/// extended with method, session binding, and a payload hash.
pub fn compute_unique_key(
    url: &str,
    method: &str,
    headers: &BTreeMap<String, String>,
    payload: Option<&[u8]>,
    session_id: Option<&str>,
    options: &UniqueKeyOptions,
) -> String {
    let _ = headers; // headers don't participate in the key per spec; kept for signature symmetry
    let mut key = canonicalize_url(url, options.keep_url_fragment);

    if options.use_extended_unique_key {
        key.push('|');
        key.push_str(&method.to_uppercase());
        if let Some(sid) = session_id {
            key.push('|');
            key.push_str(sid);
        }
        if let Some(bytes) = payload {
            key.push('|');
            key.push_str(&hex::encode(Sha256::digest(bytes)));
        }
    }
    key
}

fn canonicalize_url(url: &str, keep_fragment: bool) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_lowercase();
    };

    let scheme = parsed.scheme().to_lowercase();
    let _ = parsed.set_scheme(&scheme);

    if let Some(host) = parsed.host_str() {
        let lowered = host.to_lowercase();
        let _ = parsed.set_host(Some(&lowered));
    }

    // Drop the default port for the scheme so `:80`/`:443` don't cause
    // spurious dedup misses.
    let default_port = match scheme.as_str() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    if parsed.port() == default_port {
        let _ = parsed.set_port(None);
    }

    if !keep_fragment {
        parsed.set_fragment(None);
    }

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        let query = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }

    parsed.to_string()
}

/// Derives a stable `id` from `unique_key` by hashing (see DESIGN.md Open
/// Question 1 for why `sha2` over a non-cryptographic hash).
pub fn unique_key_to_request_id(unique_key: &str) -> String {
    let digest = Sha256::digest(unique_key.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_host_and_sorts_query_params() {
        let a = canonicalize_url("https://EXAMPLE.com/a?b=1&a=2", false);
        let b = canonicalize_url("https://example.com/a?a=2&b=1", false);
        assert_eq!(a, b);
        assert!(a.ends_with("a=2&b=1"));
    }

    #[test]
    fn strips_fragment_unless_kept() {
        let stripped = canonicalize_url("https://example.com/a#frag", false);
        let kept = canonicalize_url("https://example.com/a#frag", true);
        assert!(!stripped.contains('#'));
        assert!(kept.contains("#frag"));
    }

    #[test]
    fn drops_default_port() {
        let with_port = canonicalize_url("https://example.com:443/a", false);
        let without_port = canonicalize_url("https://example.com/a", false);
        assert_eq!(with_port, without_port);
    }

    #[test]
    fn id_is_deterministic_from_unique_key() {
        let id1 = unique_key_to_request_id("https://example.com/a");
        let id2 = unique_key_to_request_id("https://example.com/a");
        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 16);
    }

    #[test]
    fn always_enqueue_rejects_explicit_unique_key() {
        let opts = UniqueKeyOptions {
            always_enqueue: true,
            ..Default::default()
        };
        let err = Request::from_url(
            "https://example.com",
            Some("custom-key".to_string()),
            &opts,
        )
        .expect_err("always_enqueue with explicit unique_key must be rejected");
        assert!(matches!(err, ValidationError::AlwaysEnqueueWithUniqueKey));
    }

    #[test]
    fn rejects_non_http_scheme() {
        let err = Request::from_url("ftp://example.com", None, &UniqueKeyOptions::default())
            .expect_err("ftp scheme must be rejected");
        assert!(matches!(err, ValidationError::InvalidUrl(_)));
    }
}
