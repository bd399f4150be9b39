//! Support to download original images from their origin.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, header};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::UpscaleError;
use crate::config::DownloadConfig;
use crate::utils::futures::{timed, with_timeout};

/// The User-Agent sent with every download.
pub const USER_AGENT: &str = concat!("manga-upscaler/", env!("CARGO_PKG_VERSION"));

/// Fetches the original image for a URL.
///
/// The download throttle is acquired by the caller, implementations just transfer the bytes.
#[async_trait]
pub trait Fetcher: fmt::Debug + Send + Sync {
    /// Downloads `url` into a newly created file at `destination`.
    ///
    /// A partially written file may be left behind on failure.
    async fn fetch(&self, url: &str, destination: &Path) -> Result<(), UpscaleError>;
}

/// Downloads images over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Option<Duration>,
}

impl HttpFetcher {
    pub fn new(config: &DownloadConfig) -> anyhow::Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            timeout: config.timeout,
        })
    }

    async fn download(&self, url: &str, destination: &Path) -> Result<(), UpscaleError> {
        tracing::debug!("Fetching image from `{}`", url);

        let response = self
            .client
            .get(url)
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%status, url, "Origin rejected download");
            return Err(UpscaleError::Download(status.to_string()));
        }

        let mut file = File::create(destination).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await.transpose()? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<(), UpscaleError> {
        let download = async {
            with_timeout(self.timeout, self.download(url, destination))
                .await
                .unwrap_or_else(|timeout| Err(UpscaleError::DownloadTimeout(timeout)))
        };

        let result = timed("download.duration", download).await;
        match &result {
            Ok(()) => metric!(counter("download.success") += 1),
            Err(error) => {
                tracing::debug!(error = error as &dyn std::error::Error, url, "Failed to download image");
                metric!(counter("download.failure") += 1, "kind" => error.kind());
            }
        }
        result
    }
}
