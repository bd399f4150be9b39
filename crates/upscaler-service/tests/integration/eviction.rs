use std::time::Duration;

use upscaler_service::caching::CacheKey;

use crate::{FakeFetcher, FakeTransformer, request, setup_service};

fn url(n: usize) -> String {
    format!("https://s2.mangadex.org/data/chapter/x{n}.png")
}

#[tokio::test(start_paused = true)]
async fn test_oldest_entry_is_evicted() {
    let fetcher = FakeFetcher::new();
    let transformer = FakeTransformer::new();
    let test = setup_service(fetcher.clone(), transformer.clone(), |config| {
        config.cache_limit = 2;
    });

    let first = test.service.resolve(request(&url(1))).await.unwrap();
    let second = test.service.resolve(request(&url(2))).await.unwrap();
    let third = test.service.resolve(request(&url(3))).await.unwrap();

    let store = test.service.store();
    assert_eq!(store.len().await, 2);
    assert!(store.lookup(&CacheKey::from_url(&url(1))).await.is_none());
    assert!(!first.exists());
    assert!(second.exists());
    assert!(third.exists());

    // The survivors are served without another download.
    assert_eq!(test.service.resolve(request(&url(2))).await.unwrap(), second);
    assert_eq!(test.service.resolve(request(&url(3))).await.unwrap(), third);
    assert_eq!(fetcher.call_count(), 3);

    // The evicted image is populated again.
    test.service.resolve(request(&url(1))).await.unwrap();
    assert_eq!(fetcher.call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_capacity_holds_under_load() {
    let fetcher = FakeFetcher::with_delay(Duration::from_millis(500));
    let transformer = FakeTransformer::with_delay(Duration::from_secs(2));
    let test = setup_service(fetcher.clone(), transformer.clone(), |config| {
        config.cache_limit = 2;
        config.download.interval = Duration::from_millis(100);
    });

    let requests: Vec<_> = (1..=6)
        .map(|n| test.spawn_resolve(request(&url(n))))
        .collect();

    // Sample the store while the populations are running.
    let store = test.service.store().clone();
    let monitor = tokio::spawn(async move {
        let mut max_len = 0;
        for _ in 0..200 {
            max_len = max_len.max(store.len().await);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        max_len
    });

    for request in requests {
        request.await.unwrap().unwrap();
    }
    assert!(monitor.await.unwrap() <= 3);

    assert_eq!(test.service.store().len().await, 2);
    assert_eq!(fetcher.call_count(), 6);
    assert_eq!(transformer.max_running(), 1);
}
