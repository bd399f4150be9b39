use std::error::Error;
use std::time::Duration;

use thiserror::Error;

/// An error that happens while populating or resolving a cache entry.
///
/// The error is shared between every request that was coalesced onto the same population,
/// which is why it only carries plain string details and is [`Clone`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpscaleError {
    /// The service is shutting down.
    ///
    /// This is not a failure of the request itself and should never be reported as one.
    #[error("closed")]
    Closed,
    /// The origin could not be reached or answered with a non-success status.
    #[error("download failed: {0}")]
    Download(String),
    /// The download did not finish in time.
    #[error("download timed out after {0:?}")]
    DownloadTimeout(Duration),
    /// The transformation exited unsuccessfully.
    ///
    /// The process output is logged where the failure happens and is not part of this error.
    #[error("upscaling failed: {0}")]
    Transform(String),
    /// The transformation did not finish in time and was killed.
    #[error("upscaling timed out after {0:?}")]
    TransformTimeout(Duration),
    /// Reading or writing a local file failed.
    #[error("i/o error: {0}")]
    Io(String),
    /// An unexpected error in the upscaler itself, e.g. a population task that went away.
    #[error("internal error")]
    Internal,
}

impl UpscaleError {
    /// Whether this error just signals shutdown.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// A short, stable name for the error kind, used as a metrics tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Download(_) => "download",
            Self::DownloadTimeout(_) => "download_timeout",
            Self::Transform(_) => "transform",
            Self::TransformTimeout(_) => "transform_timeout",
            Self::Io(_) => "io",
            Self::Internal => "internal",
        }
    }

    fn download_error(mut error: &dyn Error) -> Self {
        while let Some(src) = error.source() {
            error = src;
        }

        Self::Download(error.to_string())
    }
}

impl From<std::io::Error> for UpscaleError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for UpscaleError {
    fn from(error: reqwest::Error) -> Self {
        Self::download_error(&error)
    }
}
