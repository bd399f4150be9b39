use std::time::Duration;

use upscaler_service::UpscaleError;

use crate::{FakeFetcher, FakeTransformer, request, setup_service};

const URL: &str = "https://s2.mangadex.org/data/0a1b2c/x1.jpg";

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_coalesce() {
    let fetcher = FakeFetcher::with_delay(Duration::from_secs(1));
    let transformer = FakeTransformer::with_delay(Duration::from_secs(5));
    let test = setup_service(fetcher.clone(), transformer.clone(), |_| {});

    let requests: Vec<_> = (0..10).map(|_| test.spawn_resolve(request(URL))).collect();

    let mut paths = Vec::new();
    for request in requests {
        paths.push(request.await.unwrap().unwrap());
    }

    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(transformer.call_count(), 1);
    assert!(paths.iter().all(|path| path == &paths[0]));
    assert_eq!(
        std::fs::read_to_string(&paths[0]).unwrap(),
        format!("upscaled:{URL}")
    );
}

#[tokio::test(start_paused = true)]
async fn test_mirrors_share_an_entry() {
    let fetcher = FakeFetcher::new();
    let transformer = FakeTransformer::new();
    let test = setup_service(fetcher.clone(), transformer.clone(), |_| {});

    let first = test.service.resolve(request(URL)).await.unwrap();
    let mirror = test
        .service
        .resolve(request("https://abc.mangadex.network/token/data/0a1b2c/x1.jpg"))
        .await
        .unwrap();

    assert_eq!(first, mirror);
    assert_eq!(fetcher.calls(), [URL]);
}

#[tokio::test(start_paused = true)]
async fn test_repeat_reads_are_served_from_cache() {
    let fetcher = FakeFetcher::new();
    let transformer = FakeTransformer::new();
    let test = setup_service(fetcher.clone(), transformer.clone(), |_| {});

    let first = test.service.resolve(request(URL)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    let second = test.service.resolve(request(URL)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(transformer.call_count(), 1);

    // Only the upscaled image is kept.
    assert_eq!(test.cached_files(), [first]);
}

#[tokio::test(start_paused = true)]
async fn test_download_failure_reaches_all_waiters() {
    let fetcher = FakeFetcher::with_delay(Duration::from_secs(1));
    let transformer = FakeTransformer::new();
    let test = setup_service(fetcher.clone(), transformer.clone(), |_| {});
    let url = "https://s2.mangadex.org/data/0a1b2c/missing.jpg";

    let requests: Vec<_> = (0..5).map(|_| test.spawn_resolve(request(url))).collect();
    for request in requests {
        assert_eq!(
            request.await.unwrap(),
            Err(UpscaleError::Download("404 Not Found".into()))
        );
    }

    test.settle(0).await;
    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(transformer.call_count(), 0);
    assert!(test.cached_files().is_empty());

    // Failures are not cached, the next request tries again.
    let retry = test.service.resolve(request(url)).await;
    assert!(retry.is_err());
    assert_eq!(fetcher.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transform_failure_cleans_up() {
    let fetcher = FakeFetcher::new();
    let transformer = FakeTransformer::with_delay(Duration::from_secs(1));
    let test = setup_service(fetcher.clone(), transformer.clone(), |_| {});
    let url = "https://s2.mangadex.org/data/0a1b2c/broken.png";

    let requests: Vec<_> = (0..3).map(|_| test.spawn_resolve(request(url))).collect();
    for request in requests {
        assert_eq!(
            request.await.unwrap(),
            Err(UpscaleError::Transform("exit status: 1".into()))
        );
    }

    test.settle(0).await;
    assert_eq!(transformer.call_count(), 1);
    // Neither the downloaded original nor a partial output are left behind.
    assert!(test.cached_files().is_empty());
}
