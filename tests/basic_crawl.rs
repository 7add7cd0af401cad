//! End-to-end scenarios from `spec.md` §8, driven entirely through the
//! public API: a `BasicCrawler` wired to in-memory storage, a labeled
//! `Router`, and a small `AutoscaledPool`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crawlee_core::error::UserDefinedErrorHandlerError;
use crawlee_core::storage::memory::{MemoryDataset, MemoryKeyValueStore, MemoryRequestQueueClient};
use crawlee_core::{
    AutoscaledPoolConfig, BasicCrawler, BasicCrawlerConfig, CrawlerError, Request, RequestQueue,
    RequestQueueConfig, Router, SessionPool, SessionPoolConfig, Snapshotter, SnapshotterConfig,
    UniqueKeyOptions,
};

fn request(url: &str, label: Option<&str>) -> Request {
    let mut request = Request::from_url(url, None, &UniqueKeyOptions::default()).expect("valid url");
    request.meta.label = label.map(str::to_string);
    request
}

#[tokio::test]
async fn crawl_drains_queue_and_pushes_data_through_labeled_handler() {
    let queue = Arc::new(RequestQueue::new(
        Arc::new(MemoryRequestQueueClient::new()),
        RequestQueueConfig::default(),
    ));
    let dataset: Arc<dyn crawlee_core::storage::DatasetClient> = Arc::new(MemoryDataset::default());
    let kvs: Arc<dyn crawlee_core::storage::KeyValueStoreClient> = Arc::new(MemoryKeyValueStore::default());
    let sessions = Arc::new(SessionPool::new(SessionPoolConfig::default(), None));
    let snapshotter = Snapshotter::new(SnapshotterConfig::default(), None, None);

    queue.add_request(request("https://example.com/", Some("list")), false).await.unwrap();
    queue
        .add_request(request("https://example.com/a", Some("detail")), false)
        .await
        .unwrap();
    queue
        .add_request(request("https://example.com/b", Some("detail")), false)
        .await
        .unwrap();

    let mut router: Router<crawlee_core::CrawlingContext> = Router::new();
    router.set_for_label("list", |ctx: crawlee_core::CrawlingContext| async move {
        ctx.enqueue_link(
            Request::from_url("https://example.com/c", None, &UniqueKeyOptions::default())
                .map_err(|e| CrawlerError::UserDefinedHandler(UserDefinedErrorHandlerError(anyhow::anyhow!(e))))?,
            false,
        );
        Ok(())
    });
    router.set_for_label("detail", |ctx: crawlee_core::CrawlingContext| async move {
        ctx.push_data(serde_json::json!({ "url": ctx.request.url }));
        Ok(())
    });

    let crawler = Arc::new(BasicCrawler::new(
        BasicCrawlerConfig::default(),
        AutoscaledPoolConfig::new(1, 4).unwrap(),
        Arc::clone(&queue),
        sessions,
        Arc::clone(&dataset),
        kvs,
        Arc::new(router),
        crawlee_core::domain::UrlPatterns::new(&[], &[]).unwrap(),
        snapshotter,
    ));

    crawler.run(|ctx| ctx).await.expect("crawl completes without a fatal error");

    assert!(queue.is_finished().await.unwrap());
    let items = dataset.iterate_items().await.unwrap();
    assert_eq!(items.len(), 2, "only the two 'detail' requests push data");
}

#[tokio::test]
async fn non_retryable_handler_failure_does_not_requeue() {
    let queue = Arc::new(RequestQueue::new(
        Arc::new(MemoryRequestQueueClient::new()),
        RequestQueueConfig::default(),
    ));
    let dataset: Arc<dyn crawlee_core::storage::DatasetClient> = Arc::new(MemoryDataset::default());
    let kvs: Arc<dyn crawlee_core::storage::KeyValueStoreClient> = Arc::new(MemoryKeyValueStore::default());
    let sessions = Arc::new(SessionPool::new(SessionPoolConfig::default(), None));
    let snapshotter = Snapshotter::new(SnapshotterConfig::default(), None, None);

    queue.add_request(request("https://example.com/bad", None), false).await.unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let mut router: Router<crawlee_core::CrawlingContext> = Router::new();
    {
        let attempts = Arc::clone(&attempts);
        router.set_default(move |_ctx: crawlee_core::CrawlingContext| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async move {
                Err(CrawlerError::UserDefinedHandler(UserDefinedErrorHandlerError(anyhow::anyhow!(
                    "deliberately broken"
                ))))
            }
        });
    }

    let crawler = Arc::new(BasicCrawler::new(
        BasicCrawlerConfig::default(),
        AutoscaledPoolConfig::new(1, 2).unwrap(),
        Arc::clone(&queue),
        sessions,
        dataset,
        kvs,
        Arc::new(router),
        crawlee_core::domain::UrlPatterns::new(&[], &[]).unwrap(),
        snapshotter,
    ));

    crawler.run(|ctx| ctx).await.expect("crawl completes without a fatal error");

    assert!(queue.is_finished().await.unwrap());
    assert_eq!(attempts.load(Ordering::Relaxed), 1, "a non-retryable failure must not be retried");
}

/// A handler that always raises a session error rotates sessions up to
/// `max_session_rotations` times, then fails the request once, invoking
/// `failed_request_handler` exactly once, per `spec.md` §7/§8 (S6).
#[tokio::test]
async fn session_rotation_budget_exhausted_fails_request_end_to_end() {
    let queue = Arc::new(RequestQueue::new(
        Arc::new(MemoryRequestQueueClient::new()),
        RequestQueueConfig::default(),
    ));
    let dataset: Arc<dyn crawlee_core::storage::DatasetClient> = Arc::new(MemoryDataset::default());
    let kvs: Arc<dyn crawlee_core::storage::KeyValueStoreClient> = Arc::new(MemoryKeyValueStore::default());
    let sessions = Arc::new(SessionPool::new(
        SessionPoolConfig {
            max_pool_size: 4,
            ..SessionPoolConfig::default()
        },
        None,
    ));
    let snapshotter = Snapshotter::new(SnapshotterConfig::default(), None, None);

    queue.add_request(request("https://example.com/a", None), false).await.unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = Arc::clone(&attempts);
    let mut router: Router<crawlee_core::CrawlingContext> = Router::new();
    router.set_default(move |_ctx: crawlee_core::CrawlingContext| {
        let attempts = Arc::clone(&attempts_clone);
        async move {
            attempts.fetch_add(1, Ordering::Relaxed);
            Err(CrawlerError::Session(crawlee_core::error::SessionError("blocked".to_string())))
        }
    });

    let failed_calls = Arc::new(AtomicUsize::new(0));
    let failed_calls_clone = Arc::clone(&failed_calls);

    let crawler = Arc::new(
        BasicCrawler::new(
            BasicCrawlerConfig {
                max_session_rotations: 2,
                ..BasicCrawlerConfig::default()
            },
            AutoscaledPoolConfig::new(1, 1).unwrap(),
            Arc::clone(&queue),
            sessions,
            dataset,
            kvs,
            Arc::new(router),
            crawlee_core::domain::UrlPatterns::new(&[], &[]).unwrap(),
            snapshotter,
        )
        .with_failed_request_handler(move |_request, _err| {
            let failed_calls = Arc::clone(&failed_calls_clone);
            async move {
                failed_calls.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }),
    );

    crawler.run(|ctx| ctx).await.expect("crawl completes without a fatal error");

    assert_eq!(attempts.load(Ordering::Relaxed), 3, "two reclaims plus the final failing attempt");
    assert_eq!(failed_calls.load(Ordering::Relaxed), 1, "failed_request_handler must fire exactly once");
    assert!(queue.is_finished().await.unwrap());
}
