use std::time::Duration;

use upscaler_service::UpscaleError;

use crate::{FakeFetcher, FakeTransformer, request, setup_service};

fn url(n: usize) -> String {
    format!("https://s2.mangadex.org/data/chapter/x{n}.png")
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_every_waiter() {
    let fetcher = FakeFetcher::new();
    let transformer = FakeTransformer::with_delay(Duration::from_secs(3600));
    let test = setup_service(fetcher.clone(), transformer.clone(), |config| {
        config.download.interval = Duration::from_millis(10);
    });

    // One job is running, the others are queued in the scheduler.
    let requests: Vec<_> = (1..=4)
        .flat_map(|n| [test.spawn_resolve(request(&url(n))), test.spawn_resolve(request(&url(n)))])
        .collect();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transformer.call_count(), 1);

    test.shutdown.cancel();
    for request in requests {
        assert_eq!(request.await.unwrap(), Err(UpscaleError::Closed));
    }
    test.settle(0).await;
    assert!(test.cached_files().is_empty());

    test.workers.join().await;
    assert_eq!(transformer.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_throttled_requests() {
    let fetcher = FakeFetcher::new();
    let transformer = FakeTransformer::new();
    let test = setup_service(fetcher.clone(), transformer.clone(), |config| {
        config.download.interval = Duration::from_secs(3600);
    });

    test.service.resolve(request(&url(1))).await.unwrap();
    let throttled = test.spawn_resolve(request(&url(2)));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!throttled.is_finished());

    test.shutdown.cancel();
    assert_eq!(throttled.await.unwrap(), Err(UpscaleError::Closed));
    test.workers.join().await;
    assert_eq!(fetcher.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_requests_after_shutdown_are_closed() {
    let fetcher = FakeFetcher::new();
    let transformer = FakeTransformer::new();
    let test = setup_service(fetcher.clone(), transformer.clone(), |_| {});

    let cached = test.service.resolve(request(&url(1))).await.unwrap();
    test.shutdown.cancel();
    test.workers.join().await;

    assert_eq!(
        test.service.resolve(request(&url(1))).await,
        Err(UpscaleError::Closed)
    );
    assert_eq!(
        test.service.resolve(request(&url(2))).await,
        Err(UpscaleError::Closed)
    );
    assert!(cached.exists());
    assert_eq!(fetcher.call_count(), 1);
}

#[tokio::test]
async fn test_cache_dir_is_removed_with_the_service() {
    let test = setup_service(FakeFetcher::new(), FakeTransformer::new(), |_| {});
    let cache_dir = test.service.cache_dir().to_owned();
    assert!(cache_dir.starts_with(test.temp_dir.path()));
    assert!(cache_dir.exists());

    test.service.resolve(request(&url(1))).await.unwrap();
    test.shutdown.cancel();
    test.workers.join().await;
    drop(test.service);

    assert!(!cache_dir.exists());
}
