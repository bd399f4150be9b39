//! The upscaling service that ties the cache, the throttle and the scheduler together.
//!
//! [`UpscaleService::resolve`] is the single operation offered to the outside. It returns the
//! path of an upscaled image, populating the cache if necessary:
//!
//!  - On a cache hit, it waits for the entry to become ready, which may still be in progress.
//!  - On a cache miss, it registers a new entry and spawns its population: acquire a download
//!    token, fetch the original, submit it to the scheduler and wait for the upscaled result.
//!    The population runs on its own task, so a client that goes away does not abort it.
//!
//! Every wait is cut short with [`UpscaleError::Closed`] once the service shuts down.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::string::FromUtf8Error;
use std::sync::Arc;

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use url::Url;

use crate::UpscaleError;
use crate::caching::{Begin, CacheEntry, CacheKey, CacheStore, Population};
use crate::config::Config;
use crate::download::Fetcher;
use crate::expiry;
use crate::scheduler::{PriorityHints, UpscaleScheduler};
use crate::throttle::DownloadThrottle;
use crate::transform::Transformer;

/// A request key that could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64 encoding")]
    Base64(#[from] base64::DecodeError),
    #[error("decoded url is not valid UTF-8")]
    Utf8(#[from] FromUtf8Error),
    #[error("invalid image url")]
    Url(#[from] url::ParseError),
}

/// A request for one upscaled image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    /// The URL the original is downloaded from.
    pub url: String,
    /// The cache key derived from the URL.
    pub key: CacheKey,
    /// Where the image belongs, for scheduling.
    pub hints: PriorityHints,
    /// The extension of the original, including the leading dot, or empty.
    extension: String,
}

impl ImageRequest {
    pub fn new(url: Url, hints: PriorityHints) -> Self {
        let extension = url_extension(&url);
        let url = String::from(url);
        Self {
            key: CacheKey::from_url(&url),
            url,
            hints,
            extension,
        }
    }

    /// Decodes a request from the standard base64 encoding of the image URL.
    ///
    /// `chapter` and `page` become the priority hints. Empty values count as absent.
    pub fn decode(
        encoded: &str,
        chapter: Option<String>,
        page: Option<String>,
    ) -> Result<Self, DecodeError> {
        let bytes = STANDARD.decode(encoded)?;
        let url = Url::parse(&String::from_utf8(bytes)?)?;

        let hints = PriorityHints {
            group: chapter.filter(|chapter| !chapter.is_empty()),
            sequence: page.filter(|page| !page.is_empty()),
        };
        Ok(Self::new(url, hints))
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }
}

/// The extension of the last path segment of `url`, including the leading dot.
///
/// Extensions become part of a file name in the cache directory, so anything other than ASCII
/// alphanumerics is dropped.
fn url_extension(url: &Url) -> String {
    let name = url.path().rsplit('/').next().unwrap_or_default();
    match name.rfind('.') {
        Some(pos) if name[pos + 1..].chars().all(|c| c.is_ascii_alphanumeric()) => {
            name[pos..].to_owned()
        }
        _ => String::new(),
    }
}

/// Handles to the background workers of an [`UpscaleService`].
#[derive(Debug)]
pub struct Workers {
    throttle: JoinHandle<()>,
    scheduler: JoinHandle<()>,
    sweeper: JoinHandle<()>,
    populations: TaskTracker,
}

impl Workers {
    /// Waits until all workers and populations have resolved their outstanding work and exited.
    ///
    /// Workers only exit after the service's shutdown token has been cancelled.
    pub async fn join(self) {
        let workers = [
            ("throttle", self.throttle),
            ("scheduler", self.scheduler),
            ("sweeper", self.sweeper),
        ];
        for (worker, handle) in workers {
            if let Err(err) = handle.await {
                tracing::error!(
                    error = &err as &dyn Error,
                    worker,
                    "Background worker failed"
                );
            }
        }

        self.populations.close();
        self.populations.wait().await;
    }
}

#[derive(Debug)]
struct ServiceInner {
    store: Arc<CacheStore>,
    throttle: DownloadThrottle,
    fetcher: Arc<dyn Fetcher>,
    scheduler: UpscaleScheduler,
    populations: TaskTracker,
    shutdown: CancellationToken,
    // Removed with the last handle to the service.
    cache_dir: TempDir,
}

/// The upscaling service.
///
/// This is a cheap handle, clones share the same cache.
#[derive(Debug, Clone)]
pub struct UpscaleService {
    inner: Arc<ServiceInner>,
}

impl UpscaleService {
    /// Creates the service and starts its background workers.
    ///
    /// The configuration is clamped to its allowed minimums first. Cached files are kept in a
    /// new private directory inside `temp_directory`, which is removed when the service is
    /// dropped. Must be called within a tokio runtime.
    pub fn create(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        transformer: Arc<dyn Transformer>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<(Self, Workers)> {
        let config = config.clamped();

        let mut builder = tempfile::Builder::new();
        builder.prefix("manga-upscaler-");
        let cache_dir = match &config.temp_directory {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .context("failed to create cache directory")?;
        tracing::info!(
            cache_dir = %cache_dir.path().display(),
            limit = config.cache_limit,
            max_age = ?config.max_age,
            "Created image cache"
        );

        let store = CacheStore::new(cache_dir.path(), config.cache_limit);
        let (throttle, throttle_handle) =
            DownloadThrottle::spawn(config.download.interval, shutdown.clone());
        let (scheduler, scheduler_handle) =
            UpscaleScheduler::spawn(transformer, config.scheduler, shutdown.clone());
        let sweeper_handle =
            expiry::spawn_sweeper(Arc::clone(&store), config.max_age, shutdown.clone());

        let populations = TaskTracker::new();

        let inner = ServiceInner {
            store,
            throttle,
            fetcher,
            scheduler,
            populations: populations.clone(),
            shutdown,
            cache_dir,
        };
        let workers = Workers {
            throttle: throttle_handle,
            scheduler: scheduler_handle,
            sweeper: sweeper_handle,
            populations,
        };

        Ok((
            Self {
                inner: Arc::new(inner),
            },
            workers,
        ))
    }

    /// The private directory holding the cached files.
    pub fn cache_dir(&self) -> &Path {
        self.inner.cache_dir.path()
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.inner.store
    }

    /// Returns the path of the upscaled image for `request`, populating the cache on a miss.
    ///
    /// Concurrent requests for the same key share one download and one upscale, and all of them
    /// observe the same result.
    pub async fn resolve(&self, request: ImageRequest) -> Result<PathBuf, UpscaleError> {
        let shutdown = &self.inner.shutdown;
        if shutdown.is_cancelled() {
            return Err(UpscaleError::Closed);
        }

        let entry = match self.inner.store.lookup(&request.key).await {
            Some(entry) => {
                metric!(counter("cache.hit") += 1);
                entry
            }
            None => self.begin(request).await,
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(UpscaleError::Closed),
            outcome = entry.wait() => outcome,
        }
    }

    async fn begin(&self, request: ImageRequest) -> Arc<CacheEntry> {
        // Admitting a new entry may wait for an eviction. That wait is bounded by the victim's
        // population, which resolves on shutdown, so it does not race the shutdown signal.
        let begin = self
            .inner
            .store
            .begin_population(&request.key, request.extension())
            .await;

        match begin {
            Begin::Existing(entry) => {
                metric!(counter("cache.hit") += 1);
                entry
            }
            Begin::New(population) => {
                metric!(counter("cache.miss") += 1);
                let entry = Arc::clone(population.entry());
                self.inner
                    .populations
                    .spawn(self.clone().populate(population, request));
                entry
            }
        }
    }

    async fn populate(self, population: Population, request: ImageRequest) {
        let result = self.fetch_and_upscale(population.entry(), &request).await;
        match &result {
            Ok(()) => tracing::debug!(key = %request.key, "Image is ready"),
            Err(UpscaleError::Closed) => {}
            Err(error) => tracing::warn!(
                error = error as &dyn Error,
                url = %request.url,
                "Failed to populate image"
            ),
        }
        population.complete(result).await;
    }

    async fn fetch_and_upscale(
        &self,
        entry: &CacheEntry,
        request: &ImageRequest,
    ) -> Result<(), UpscaleError> {
        let inner = &self.inner;
        inner.throttle.acquire().await?;

        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => return Err(UpscaleError::Closed),
            result = inner.fetcher.fetch(&request.url, entry.input_path()) => result?,
        }

        inner
            .scheduler
            .upscale(
                request.url.clone(),
                entry.input_path().to_owned(),
                entry.output_path().to_owned(),
                request.hints.clone(),
            )
            .await
    }
}
