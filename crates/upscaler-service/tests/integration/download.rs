use std::time::Duration;

use upscaler_service::UpscaleError;
use upscaler_service::config::DownloadConfig;
use upscaler_service::download::{Fetcher, HttpFetcher};
use upscaler_test as test;

use crate::{FakeTransformer, ImageServer, request, setup_service};

#[tokio::test]
async fn test_fetch_image() {
    test::setup();
    let server = ImageServer::new();
    server.insert("0a1b/x1.jpg", "jpeg bytes");
    let dir = test::tempdir();
    let destination = dir.path().join("x1.jpg");

    let fetcher = HttpFetcher::new(&DownloadConfig::default()).unwrap();
    fetcher
        .fetch(&server.url("0a1b/x1.jpg"), &destination)
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&destination).unwrap(), "jpeg bytes");
    assert_eq!(server.hits("0a1b/x1.jpg"), 1);
}

#[tokio::test]
async fn test_fetch_missing_image() {
    test::setup();
    let server = ImageServer::new();
    let dir = test::tempdir();

    let fetcher = HttpFetcher::new(&DownloadConfig::default()).unwrap();
    let result = fetcher
        .fetch(&server.url("0a1b/x404.jpg"), &dir.path().join("x404.jpg"))
        .await;

    assert_eq!(result, Err(UpscaleError::Download("404 Not Found".into())));
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_fetch_timeout() {
    test::setup();
    let server = ImageServer::new();
    server.insert("0a1b/x1.jpg", "jpeg bytes");
    let dir = test::tempdir();

    let timeout = Duration::from_millis(200);
    let fetcher = HttpFetcher::new(&DownloadConfig {
        timeout: Some(timeout),
        ..Default::default()
    })
    .unwrap();
    let result = fetcher
        .fetch(
            &server.delayed_url("0a1b/x1.jpg", "1h"),
            &dir.path().join("x1.jpg"),
        )
        .await;

    assert_eq!(result, Err(UpscaleError::DownloadTimeout(timeout)));
}

#[tokio::test]
async fn test_origin_is_hit_once() {
    let server = ImageServer::new();
    server.insert("0a1b/x1.jpg", "page one");
    let transformer = FakeTransformer::with_delay(Duration::from_millis(100));
    let fetcher = HttpFetcher::new(&DownloadConfig::default()).unwrap();
    let test = setup_service(std::sync::Arc::new(fetcher), transformer.clone(), |config| {
        config.scheduler.grace_period = Duration::from_millis(10);
    });

    let url = server.url("0a1b/x1.jpg");
    let requests: Vec<_> = (0..5).map(|_| test.spawn_resolve(request(&url))).collect();
    for request in requests {
        let path = request.await.unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "upscaled:page one");
    }

    assert_eq!(server.hits("0a1b/x1.jpg"), 1);
    assert_eq!(transformer.calls(), ["page one"]);
}
