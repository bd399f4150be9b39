//! Helpers for testing the upscaler service and its web server.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`ImageServer`], make sure that the server is held until all requests to it
//!    have been made. It stops serving when dropped, and downloads from it fail afterwards.
//!
//!  - [`FakeFetcher`] writes the requested URL into the downloaded file, and [`FakeTransformer`]
//!    reads it back. That way the transformer can tell which image it is upscaling, and record
//!    the order of its calls by URL.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use upscaler_service::UpscaleError;
use upscaler_service::download::Fetcher;
use upscaler_service::transform::Transformer;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the upscaler crates and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new(
            "upscaler_service=trace,manga_upscaler=trace,upscaler_test=trace",
        ))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped. Use it as a guard to
/// automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    /// Serves `router` on an ephemeral port of the loopback interface.
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://127.0.0.1:{}/{}", self.port(), path)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

type Images = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;
type Hits = Arc<Mutex<BTreeMap<String, usize>>>;

/// An origin serving registered images below `/data/`.
///
/// Unknown images are answered with `404`. Every request is counted by its path. Images can
/// also be requested through `/delay/<duration>/data/...`, which answers after the given time.
pub struct ImageServer {
    server: Server,
    images: Images,
    hits: Hits,
}

fn serve_image(images: &Images, hits: &Hits, path: String) -> Response {
    *hits.lock().unwrap().entry(path.clone()).or_default() += 1;

    match images.lock().unwrap().get(&path) {
        Some(bytes) => ([("Content-Type", "image/jpeg")], bytes.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

impl ImageServer {
    pub fn new() -> Self {
        let images = Images::default();
        let hits = Hits::default();

        let router = Router::new()
            .route(
                "/data/*path",
                get({
                    let images = images.clone();
                    let hits = hits.clone();
                    move |extract::Path(path): extract::Path<String>| async move {
                        serve_image(&images, &hits, path)
                    }
                }),
            )
            .route(
                "/delay/:time/data/*path",
                get({
                    let images = images.clone();
                    let hits = hits.clone();
                    move |extract::Path((time, path)): extract::Path<(String, String)>| async move {
                        let duration = humantime::parse_duration(&time).unwrap();
                        tokio::time::sleep(duration).await;
                        serve_image(&images, &hits, path)
                    }
                }),
            );

        Self {
            server: Server::with_router(router),
            images,
            hits,
        }
    }

    /// Registers an image under `/data/<path>`.
    pub fn insert(&self, path: &str, bytes: impl Into<Vec<u8>>) {
        self.images
            .lock()
            .unwrap()
            .insert(path.trim_start_matches('/').to_owned(), bytes.into());
    }

    /// The URL of the image registered under `path`.
    pub fn url(&self, path: &str) -> String {
        self.server
            .url(&format!("data/{}", path.trim_start_matches('/')))
    }

    /// The URL of the image registered under `path`, answered after `delay`.
    pub fn delayed_url(&self, path: &str, delay: &str) -> String {
        self.server
            .url(&format!("delay/{delay}/data/{}", path.trim_start_matches('/')))
    }

    /// How often the image under `path` was requested.
    pub fn hits(&self, path: &str) -> usize {
        let hits = self.hits.lock().unwrap();
        hits.get(path.trim_start_matches('/')).copied().unwrap_or_default()
    }

    /// The total number of requests.
    pub fn accesses(&self) -> usize {
        self.hits.lock().unwrap().values().sum()
    }
}

impl Default for ImageServer {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`Fetcher`] that writes the requested URL into the destination.
///
/// URLs containing `missing` fail like a `404` from the origin.
#[derive(Debug, Default)]
pub struct FakeFetcher {
    delay: Duration,
    calls: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    /// Every fetch takes `delay`.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: Default::default(),
        })
    }

    /// The fetched URLs, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<(), UpscaleError> {
        self.calls.lock().unwrap().push(url.to_owned());
        tokio::time::sleep(self.delay).await;

        if url.contains("missing") {
            return Err(UpscaleError::Download("404 Not Found".into()));
        }
        tokio::fs::write(destination, url).await?;
        Ok(())
    }
}

/// A [`Transformer`] that records which URLs it upscaled.
///
/// Inputs containing `broken` fail like a non-zero exit of the upscaler. Others are copied to
/// the output with an `upscaled:` prefix.
#[derive(Debug, Default)]
pub struct FakeTransformer {
    delay: Duration,
    calls: Mutex<Vec<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeTransformer {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    /// Every transformation takes `delay`.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }

    /// The URLs of the upscaled images, in the order the transformations started.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// The highest number of transformations that ever ran at the same time.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transformer for FakeTransformer {
    async fn transform(&self, input: &Path, output: &Path) -> Result<(), UpscaleError> {
        let url = tokio::fs::read_to_string(input).await?;
        self.calls.lock().unwrap().push(url.clone());

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        if url.contains("broken") {
            return Err(UpscaleError::Transform("exit status: 1".into()));
        }
        tokio::fs::write(output, format!("upscaled:{url}")).await?;
        Ok(())
    }
}
