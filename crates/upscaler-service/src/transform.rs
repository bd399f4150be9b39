//! Upscaling of downloaded images.

use std::fmt;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::UpscaleError;
use crate::config::UpscalerConfig;
use crate::utils::futures::{timed, with_timeout};

/// Turns a downloaded original into the upscaled image.
///
/// Only one transformation runs at a time, the scheduler takes care of that.
#[async_trait]
pub trait Transformer: fmt::Debug + Send + Sync {
    /// Reads `input` and writes the upscaled PNG to `output`.
    async fn transform(&self, input: &Path, output: &Path) -> Result<(), UpscaleError>;
}

/// Runs `waifu2x-ncnn-vulkan` as a child process.
#[derive(Debug, Clone)]
pub struct Waifu2xTransformer {
    config: UpscalerConfig,
}

impl Waifu2xTransformer {
    pub fn new(config: UpscalerConfig) -> Self {
        Self { config }
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.config.executable);
        command
            .arg("-i")
            .arg(input)
            .arg("-o")
            .arg(output)
            .arg("-m")
            .arg(&self.config.models)
            .arg("-s")
            .arg(self.config.scale.to_string())
            .arg("-n")
            .arg(self.config.noise_level.to_string())
            .stdin(Stdio::null())
            // Dropping the future, e.g. on timeout or shutdown, must not leave the GPU busy.
            .kill_on_drop(true);
        command
    }

    async fn run(&self, input: &Path, output: &Path) -> Result<(), UpscaleError> {
        let mut command = self.command(input, output);
        tracing::debug!(?command, "Starting upscaler");

        let process = with_timeout(self.config.timeout, command.output())
            .await
            .map_err(UpscaleError::TransformTimeout)?;

        let process = process.map_err(|err| {
            tracing::error!(
                error = &err as &dyn std::error::Error,
                executable = %self.config.executable.display(),
                "Failed to start upscaler"
            );
            UpscaleError::Transform(format!("failed to start: {err}"))
        })?;

        if !process.status.success() {
            tracing::warn!(
                status = %process.status,
                stdout = %String::from_utf8_lossy(&process.stdout),
                stderr = %String::from_utf8_lossy(&process.stderr),
                input = %input.display(),
                "Upscaler failed"
            );
            return Err(UpscaleError::Transform(process.status.to_string()));
        }

        // waifu2x reports some decoding errors on stderr but still exits successfully.
        if tokio::fs::metadata(output).await.is_err() {
            tracing::warn!(
                stderr = %String::from_utf8_lossy(&process.stderr),
                input = %input.display(),
                "Upscaler did not write an output"
            );
            return Err(UpscaleError::Transform("no output written".into()));
        }

        Ok(())
    }
}

#[async_trait]
impl Transformer for Waifu2xTransformer {
    async fn transform(&self, input: &Path, output: &Path) -> Result<(), UpscaleError> {
        timed("upscale.duration", self.run(input, output)).await
    }
}
