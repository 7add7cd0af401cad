//! `CrawlerConfig` env/builder precedence, exercised against a real
//! filesystem path rather than a hardcoded string.

use crawlee_core::CrawlerConfig;

#[test]
fn storage_dir_round_trips_through_env_and_builder() {
    let dir = tempfile::tempdir().expect("create temp dir");

    // SAFETY: single-threaded test, no other code reads this var concurrently.
    unsafe {
        std::env::set_var("CRAWLEE_STORAGE_DIR", dir.path());
    }
    let from_env = CrawlerConfig::from_env();
    assert_eq!(from_env.storage_dir(), dir.path());

    let overridden = CrawlerConfig::builder().storage_dir("/overridden/path").build();
    assert_eq!(overridden.storage_dir(), std::path::Path::new("/overridden/path"));

    unsafe {
        std::env::remove_var("CRAWLEE_STORAGE_DIR");
    }
}
