use std::time::Duration;

use tokio::time::Instant;

use crate::{FakeFetcher, FakeTransformer, page_request, request, setup_service};

fn page(chapter: &str, page: &str) -> String {
    format!("https://s2.mangadex.org/data/c{chapter}/p{page}.jpg")
}

#[tokio::test(start_paused = true)]
async fn test_queued_pages_run_in_reading_order() {
    let fetcher = FakeFetcher::new();
    let transformer = FakeTransformer::with_delay(Duration::from_secs(10));
    let test = setup_service(fetcher.clone(), transformer.clone(), |config| {
        config.download.interval = Duration::from_millis(10);
    });

    // Keeps the worker busy while the other pages are downloaded.
    let busy = test.spawn_resolve(page_request(&page("1", "1"), "1", "1"));
    tokio::time::sleep(Duration::from_secs(1)).await;

    let requests: Vec<_> = [("2", "10"), ("2", "2"), ("10", "1")]
        .into_iter()
        .map(|(chapter, p)| test.spawn_resolve(page_request(&page(chapter, p), chapter, p)))
        .collect();

    busy.await.unwrap().unwrap();
    for request in requests {
        request.await.unwrap().unwrap();
    }

    assert_eq!(
        transformer.calls(),
        [page("1", "1"), page("2", "2"), page("2", "10"), page("10", "1")]
    );
    assert_eq!(transformer.max_running(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_on_demand_reads_overtake_prefetch() {
    let fetcher = FakeFetcher::new();
    let transformer = FakeTransformer::with_delay(Duration::from_secs(10));
    let test = setup_service(fetcher.clone(), transformer.clone(), |config| {
        config.download.interval = Duration::from_millis(10);
    });

    let busy = test.spawn_resolve(page_request(&page("1", "1"), "1", "1"));
    tokio::time::sleep(Duration::from_secs(1)).await;

    let prefetch = test.spawn_resolve(page_request(&page("1", "2"), "1", "2"));
    tokio::time::sleep(Duration::from_secs(1)).await;
    let direct = test.spawn_resolve(request("https://s2.mangadex.org/data/cover/full.png"));

    for request in [busy, prefetch, direct] {
        request.await.unwrap().unwrap();
    }

    assert_eq!(
        transformer.calls(),
        [
            page("1", "1"),
            "https://s2.mangadex.org/data/cover/full.png".to_owned(),
            page("1", "2"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_downloads_are_paced() {
    let fetcher = FakeFetcher::new();
    let transformer = FakeTransformer::new();
    let test = setup_service(fetcher.clone(), transformer.clone(), |_| {});

    let start = Instant::now();
    let requests: Vec<_> = ["1", "2", "3"]
        .into_iter()
        .map(|p| test.spawn_resolve(page_request(&page("1", p), "1", p)))
        .collect();
    for request in requests {
        request.await.unwrap().unwrap();
    }

    // Three downloads need two quiet periods of three seconds in between.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(6), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(7), "{elapsed:?}");
    assert_eq!(fetcher.call_count(), 3);
}
