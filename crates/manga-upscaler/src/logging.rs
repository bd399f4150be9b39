use std::env;

use tracing::level_filters::LevelFilter;
use upscaler_service::config::Config;
use upscaler_service::logging::default_filter;

/// Initializes logging for the upscaler.
///
/// `RUST_LOG` takes precedence over the configured level. `RUST_BACKTRACE` is turned on when
/// [`enable_backtraces`](upscaler_service::config::Logging::enable_backtraces) is set.
///
/// # Safety
/// This function uses [`std::env::set_var`] to modify the environment. That function is only safe
/// to call in single-threaded contexts to prevent unsynchronized concurrent access to the environment.
pub unsafe fn init_logging(config: &Config) {
    if config.logging.enable_backtraces {
        // SAFETY: As documented, this function may only be called in a single-threaded context.
        unsafe { env::set_var("RUST_BACKTRACE", "1") };
    }

    let filter = env::var("RUST_LOG")
        .unwrap_or_else(|_| default_filter(config.logging.level).to_owned());
    upscaler_service::logging::init_logging(&config.logging, &filter, console::user_attended());
}

/// Logs an error to the configured logger or `stderr` if not yet configured.
pub fn ensure_log_error(error: &anyhow::Error) {
    if tracing::Level::ERROR <= tracing::level_filters::STATIC_MAX_LEVEL
        && tracing::Level::ERROR <= LevelFilter::current()
    {
        tracing::error!("{:?}", error);
    } else {
        eprintln!("{error:?}");
    }
}
