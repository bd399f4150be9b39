use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use upscaler_service::UpscaleError;
use upscaler_service::config::Config;
use upscaler_service::download::Fetcher;
use upscaler_service::scheduler::PriorityHints;
use upscaler_service::service::{ImageRequest, UpscaleService, Workers};
use upscaler_service::transform::Transformer;
use upscaler_test as test;

pub use test::{FakeFetcher, FakeTransformer, ImageServer};

/// A running service together with everything needed to inspect and stop it.
pub struct TestService {
    pub service: UpscaleService,
    pub workers: Workers,
    pub shutdown: CancellationToken,
    // Parent of the service's private cache directory.
    pub temp_dir: test::TempDir,
}

impl TestService {
    /// Resolves `request` on a separate task, like the gateway does for every connection.
    pub fn spawn_resolve(
        &self,
        request: ImageRequest,
    ) -> tokio::task::JoinHandle<Result<PathBuf, UpscaleError>> {
        let service = self.service.clone();
        tokio::spawn(async move { service.resolve(request).await })
    }

    /// Waits until the number of cache entries drops to `len`.
    ///
    /// A failed population that finds the store lock taken releases its waiters before it
    /// removes its entry.
    pub async fn settle(&self, len: usize) {
        while self.service.store().len().await > len {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// The files currently in the cache directory.
    pub fn cached_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<_> = std::fs::read_dir(self.service.cache_dir())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        files.sort();
        files
    }
}

/// Setup tests and create a test service.
///
/// The service keeps its cache in a private directory below [`TestService::temp_dir`]. The
/// `update_config` closure can modify the default configuration before the service is created.
pub fn setup_service(
    fetcher: Arc<dyn Fetcher>,
    transformer: Arc<dyn Transformer>,
    update_config: impl FnOnce(&mut Config),
) -> TestService {
    test::setup();

    let temp_dir = test::tempdir();
    let mut config = Config {
        temp_directory: Some(temp_dir.path().to_owned()),
        ..Default::default()
    };
    update_config(&mut config);

    let shutdown = CancellationToken::new();
    let (service, workers) =
        UpscaleService::create(config, fetcher, transformer, shutdown.clone()).unwrap();

    TestService {
        service,
        workers,
        shutdown,
        temp_dir,
    }
}

/// Creates a request for `url` without priority hints.
pub fn request(url: &str) -> ImageRequest {
    ImageRequest::new(url.parse().unwrap(), PriorityHints::default())
}

/// Creates a request for `url` that belongs to page `page` of chapter `chapter`.
pub fn page_request(url: &str, chapter: &str, page: &str) -> ImageRequest {
    ImageRequest::new(url.parse().unwrap(), PriorityHints::new(chapter, page))
}
