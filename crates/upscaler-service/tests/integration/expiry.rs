use std::time::Duration;

use upscaler_service::caching::CacheKey;

use crate::{FakeFetcher, FakeTransformer, request, setup_service};

const FIRST: &str = "https://s2.mangadex.org/data/0a1b2c/x1.jpg";
const SECOND: &str = "https://s2.mangadex.org/data/0a1b2c/x2.jpg";

#[tokio::test(start_paused = true)]
async fn test_entries_expire_in_admission_order() {
    let fetcher = FakeFetcher::new();
    let transformer = FakeTransformer::new();
    let test = setup_service(fetcher.clone(), transformer.clone(), |config| {
        config.max_age = Duration::from_secs(600);
    });
    let store = test.service.store();

    let first = test.service.resolve(request(FIRST)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;
    let second = test.service.resolve(request(SECOND)).await.unwrap();

    // Five minutes later, only the first image is old enough.
    tokio::time::sleep(Duration::from_secs(301)).await;
    assert!(store.lookup(&CacheKey::from_url(FIRST)).await.is_none());
    assert!(!first.exists());
    assert!(store.lookup(&CacheKey::from_url(SECOND)).await.is_some());

    // Reads do not refresh the age.
    test.service.resolve(request(SECOND)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(store.is_empty().await);
    assert!(!second.exists());
    assert_eq!(fetcher.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_max_age_has_a_floor() {
    let fetcher = FakeFetcher::new();
    let transformer = FakeTransformer::new();
    let test = setup_service(fetcher.clone(), transformer.clone(), |config| {
        config.max_age = Duration::from_secs(1);
    });

    test.service.resolve(request(FIRST)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(9 * 60)).await;
    assert_eq!(test.service.store().len().await, 1);

    tokio::time::sleep(Duration::from_secs(2 * 60)).await;
    assert!(test.service.store().is_empty().await);
}
