//! Serializes upscaling onto a single worker and picks the most urgent job first.
//!
//! Upscaling saturates the GPU, so exactly one job runs at a time. Jobs are not started in
//! arrival order: whenever the worker is free it looks at everything that is pending and runs
//! the job that comes first by [`execution_order`]. After an idle period the worker waits for a
//! short grace period before it picks, so a burst of requests for a freshly opened chapter is
//! ordered as a whole.

use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::UpscaleError;
use crate::config::SchedulerConfig;
use crate::transform::Transformer;

mod job;

pub use job::{PriorityHints, UpscaleJob, execution_order};

/// A handle to submit jobs to the upscale worker.
#[derive(Debug, Clone)]
pub struct UpscaleScheduler {
    jobs: mpsc::UnboundedSender<UpscaleJob>,
    shutdown: CancellationToken,
}

impl UpscaleScheduler {
    /// Starts the worker task.
    ///
    /// The worker exits once `shutdown` is cancelled, resolving every job it has not started
    /// with [`UpscaleError::Closed`].
    pub fn spawn(
        transformer: Arc<dyn Transformer>,
        config: SchedulerConfig,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (jobs, receiver) = mpsc::unbounded_channel();
        let worker = Worker {
            transformer,
            config,
            gpu: Mutex::new(()),
            jobs: receiver,
            pending: BinaryHeap::new(),
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(worker.run());
        (Self { jobs, shutdown }, handle)
    }

    /// Upscales `input` into `output` and waits for the result.
    pub async fn upscale(
        &self,
        url: String,
        input: PathBuf,
        output: PathBuf,
        hints: PriorityHints,
    ) -> Result<(), UpscaleError> {
        if self.shutdown.is_cancelled() {
            return Err(UpscaleError::Closed);
        }

        let (result, receiver) = oneshot::channel();
        let job = UpscaleJob {
            url,
            input,
            output,
            hints,
            queued_at: Instant::now(),
            result,
        };
        // The worker closes the channel when it stops.
        self.jobs.send(job).map_err(|_| UpscaleError::Closed)?;

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(UpscaleError::Closed),
            result = receiver => result.unwrap_or(Err(UpscaleError::Closed)),
        }
    }
}

struct Worker {
    transformer: Arc<dyn Transformer>,
    config: SchedulerConfig,
    /// Held for the whole duration of a transformation.
    gpu: Mutex<()>,
    jobs: mpsc::UnboundedReceiver<UpscaleJob>,
    pending: BinaryHeap<UpscaleJob>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        while let Some(job) = self.next_job().await {
            let result = self.execute(&job).await;
            if let Err(error) = &result
                && !error.is_closed()
            {
                metric!(counter("upscale.failure") += 1, "kind" => error.kind());
            }
            job.respond(result);
        }

        self.close();
    }

    /// Waits until there is work and picks the most urgent pending job.
    ///
    /// Returns `None` on shutdown.
    async fn next_job(&mut self) -> Option<UpscaleJob> {
        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }

            if self.pending.is_empty() {
                let job = tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return None,
                    job = self.jobs.recv() => job?,
                };
                self.pending.push(job);

                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return None,
                    _ = tokio::time::sleep(self.config.grace_period) => {}
                }
            }

            while let Ok(job) = self.jobs.try_recv() {
                self.pending.push(job);
            }
            metric!(gauge("scheduler.pending") = self.pending.len() as u64);

            let job = self.pending.pop()?;
            // Nobody is waiting for this one anymore.
            if job.result.is_closed() {
                tracing::debug!(url = %job.url, "Skipping abandoned upscale job");
                continue;
            }
            return Some(job);
        }
    }

    async fn execute(&self, job: &UpscaleJob) -> Result<(), UpscaleError> {
        let _gpu = self.gpu.lock().await;
        tracing::debug!(
            url = %job.url,
            group = ?job.hints.group,
            sequence = ?job.hints.sequence,
            queued_for = ?job.queued_at.elapsed(),
            "Upscaling image"
        );

        // Dropping the transformation on shutdown kills the running process.
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(UpscaleError::Closed),
            result = self.transformer.transform(&job.input, &job.output) => result,
        }
    }

    /// Rejects every job that has not been started.
    fn close(mut self) {
        self.jobs.close();
        while let Ok(job) = self.jobs.try_recv() {
            self.pending.push(job);
        }

        let rejected = self.pending.len();
        for job in self.pending.drain() {
            job.respond(Err(UpscaleError::Closed));
        }
        metric!(gauge("scheduler.pending") = 0u64);
        tracing::debug!(rejected, "Upscale scheduler stopped");
    }
}
