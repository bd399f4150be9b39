//! Paces how often a new download from the origin may start.
//!
//! A single throttler task hands out one token at a time. After a token was taken, it stays
//! quiet for a fixed interval before it offers the next one. Acquirers queue up in arrival
//! order. Once the service shuts down no more tokens are issued and every acquirer gets
//! [`UpscaleError::Closed`].

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::UpscaleError;

type TokenRequest = oneshot::Sender<()>;

/// A handle to acquire download tokens.
#[derive(Debug, Clone)]
pub struct DownloadThrottle {
    requests: mpsc::UnboundedSender<TokenRequest>,
    shutdown: CancellationToken,
}

impl DownloadThrottle {
    /// Starts the throttler task.
    ///
    /// The task exits once `shutdown` is cancelled.
    pub fn spawn(interval: Duration, shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let (requests, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_throttler(interval, receiver, shutdown.clone()));
        (Self { requests, shutdown }, handle)
    }

    /// Waits for the next download token.
    pub async fn acquire(&self) -> Result<(), UpscaleError> {
        if self.shutdown.is_cancelled() {
            return Err(UpscaleError::Closed);
        }

        let (sender, receiver) = oneshot::channel();
        self.requests
            .send(sender)
            .map_err(|_| UpscaleError::Closed)?;

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(UpscaleError::Closed),
            // The throttler drops pending requests when it exits.
            token = receiver => token.map_err(|_| UpscaleError::Closed),
        }
    }
}

async fn run_throttler(
    interval: Duration,
    mut requests: mpsc::UnboundedReceiver<TokenRequest>,
    shutdown: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        // An acquirer that gave up in the meantime does not use up a token.
        if request.send(()).is_err() {
            continue;
        }

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    requests.close();
    tracing::debug!("Download throttle stopped");
}
