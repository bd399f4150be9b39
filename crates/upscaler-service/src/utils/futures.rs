use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::UpscaleError;

/// Reports the time since its creation as a timer metric when dropped.
///
/// The metric is tagged with the status passed to [`finish`](Self::finish), or `"canceled"` if
/// the stopwatch is dropped without finishing. That happens when the measured work is aborted,
/// e.g. on shutdown.
struct Stopwatch {
    metric_name: &'static str,
    started: Instant,
    status: &'static str,
}

impl Stopwatch {
    fn start(metric_name: &'static str) -> Self {
        Self {
            metric_name,
            started: Instant::now(),
            status: "canceled",
        }
    }

    fn finish(mut self, status: &'static str) {
        self.status = status;
    }
}

impl Drop for Stopwatch {
    fn drop(&mut self) {
        metric!(
            timer(self.metric_name) = self.started.elapsed(),
            "status" => self.status,
        );
    }
}

/// The status tag of a result: `"ok"`, or the [kind](UpscaleError::kind) of the error.
pub fn status<T>(result: &Result<T, UpscaleError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(error) => error.kind(),
    }
}

/// Awaits `f` and reports its duration as the timer `metric_name`, tagged with its [`status`].
pub async fn timed<T, F>(metric_name: &'static str, f: F) -> Result<T, UpscaleError>
where
    F: Future<Output = Result<T, UpscaleError>>,
{
    let stopwatch = Stopwatch::start(metric_name);
    let result = f.await;
    stopwatch.finish(status(&result));
    result
}

/// Awaits `f`, giving up after `timeout` if there is one.
///
/// Returns the exceeded timeout as the error, `f` is dropped at that point.
pub async fn with_timeout<F>(timeout: Option<Duration>, f: F) -> Result<F::Output, Duration>
where
    F: Future,
{
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, f).await.map_err(|_| timeout),
        None => Ok(f.await),
    }
}
