use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// The smallest number of entries the cache may be limited to.
pub const MIN_CACHE_LIMIT: usize = 1;

/// The smallest maximum age of cache entries.
///
/// Lower values make the expiration sweeper evict images before a reader could reasonably get
/// to them.
pub const MIN_MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the upscaler.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "manga_upscaler".into(),
            hostname_tag: None,
        }
    }
}

/// Tuning of the upscale scheduler.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long the scheduler waits after the first job of an idle period before it picks a job.
    ///
    /// Requests for a freshly opened chapter arrive in a burst, and waiting a little lets the
    /// scheduler order the whole burst instead of starting with whatever came in first.
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(100),
        }
    }
}

/// Controls how images are fetched from their origin.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    /// The quiet period after a download was admitted before the next one may start.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// The timeout for establishing a connection to the origin.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// An optional upper limit for a whole download.
    ///
    /// Unset by default, in which case a stalled origin blocks only the request that needs it.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            // The origin allows one request per second, but upscaling is a lot slower than that
            // anyway and readers still need time to read the pages.
            interval: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
            timeout: None,
        }
    }
}

/// Controls the external upscaling executable.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct UpscalerConfig {
    /// Path to the `waifu2x-ncnn-vulkan` executable.
    pub executable: PathBuf,
    /// Path to the model directory passed with `-m`.
    pub models: PathBuf,
    /// The upscale factor passed with `-s`.
    pub scale: u32,
    /// The value passed with `-n`.
    pub noise_level: i32,
    /// An optional upper limit for one upscaling run.
    ///
    /// When it elapses the process is killed and the job fails. Unset by default, so a hung
    /// process stalls the scheduler.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for UpscalerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("waifu2x-ncnn-vulkan"),
            models: PathBuf::from("models-cunet"),
            scale: 2,
            noise_level: 1,
            timeout: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// The maximum number of images kept in the cache.
    pub cache_limit: usize,

    /// The age after which cached images are removed.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,

    /// The directory in which the private cache directory is created.
    ///
    /// Defaults to the system temp directory.
    pub temp_directory: Option<PathBuf>,

    /// Fine-tune the upscale scheduler.
    pub scheduler: SchedulerConfig,

    /// Fine-tune downloads from the origin.
    pub download: DownloadConfig,

    /// The external upscaler.
    pub upscaler: UpscalerConfig,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1:8080".to_owned(),
            cache_limit: 100,
            max_age: Duration::from_secs(30 * 60),
            temp_directory: None,
            scheduler: SchedulerConfig::default(),
            download: DownloadConfig::default(),
            upscaler: UpscalerConfig::default(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    pub fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }

    /// Raises the cache limits to their allowed minimum.
    pub fn clamped(mut self) -> Self {
        if self.cache_limit < MIN_CACHE_LIMIT {
            tracing::warn!(
                configured = self.cache_limit,
                "cache_limit is too small, using {MIN_CACHE_LIMIT}"
            );
            self.cache_limit = MIN_CACHE_LIMIT;
        }
        if self.max_age < MIN_MAX_AGE {
            tracing::warn!(
                configured = ?self.max_age,
                "max_age is too small, using {MIN_MAX_AGE:?}"
            );
            self.max_age = MIN_MAX_AGE;
        }
        self
    }
}

const LOG_LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    let level = String::deserialize(deserializer)?;
    level
        .parse()
        .map_err(|_| de::Error::unknown_variant(&level, LOG_LEVELS))
}
