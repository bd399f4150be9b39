//! Exposes the command line application.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use upscaler_service::config::Config;
use upscaler_service::metrics;

use crate::healthcheck;
use crate::logging;
use crate::server;

/// Manga Upscaler commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Run the web server.
    Run,

    /// Check the health of a running upscaler.
    Healthcheck {
        /// The address of the upscaler. Defaults to `bind` from the configuration.
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Request timeout in seconds.
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(bin_name = "manga-upscaler", version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: No runtime has been started yet, this is still single-threaded.
    unsafe { logging::init_logging(&config) };

    let hostname = hostname::get().ok().and_then(|name| name.into_string().ok());
    // Metrics are optional, the upscaler works fine without them.
    if let Err(error) = metrics::configure_statsd(&config.metrics, hostname) {
        tracing::warn!(
            error = error.as_ref() as &dyn std::error::Error,
            "Failed to configure statsd"
        );
    }

    match cli.command {
        Command::Run => server::run(config).context("failed to start the server")?,
        Command::Healthcheck { addr, timeout } => {
            healthcheck::healthcheck(config, addr, timeout)?
        }
    }

    Ok(())
}
