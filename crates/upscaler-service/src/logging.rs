//! Log output of the upscaler.
//!
//! Everything is logged through `tracing`. Errors additionally become Sentry events, and
//! warnings and infos are attached to them as logs.

use sentry::integrations::tracing::EventFilter;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;

use crate::config::{LogFormat, Logging};

/// The filter used when `RUST_LOG` is not set.
///
/// Dependencies are kept at `INFO` or quieter, the configured level applies to the upscaler and
/// the HTTP request log.
pub fn default_filter(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "",
        LevelFilter::ERROR => "ERROR",
        LevelFilter::WARN => "WARN",
        LevelFilter::INFO => "INFO,hyper=WARN,reqwest=WARN",
        LevelFilter::DEBUG => {
            "INFO,\
             hyper=WARN,\
             tower_http=DEBUG,\
             upscaler_service=DEBUG,\
             manga_upscaler=DEBUG"
        }
        LevelFilter::TRACE => {
            "INFO,\
             hyper=WARN,\
             tower_http=TRACE,\
             upscaler_service=TRACE,\
             manga_upscaler=TRACE"
        }
    }
}

/// Picks a concrete format for [`LogFormat::Auto`].
fn resolve_format(format: LogFormat, attended: bool) -> LogFormat {
    match format {
        LogFormat::Auto if attended => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        format => format,
    }
}

fn sentry_event_filter(level: &Level) -> EventFilter {
    match *level {
        Level::ERROR => EventFilter::Event | EventFilter::Log,
        Level::WARN | Level::INFO => EventFilter::Log,
        Level::DEBUG | Level::TRACE => EventFilter::Ignore,
    }
}

/// Installs the global subscriber, writing to stdout.
///
/// `filter` uses the `RUST_LOG` syntax. `attended` tells whether a human is watching the
/// terminal, which selects the format for [`LogFormat::Auto`].
pub fn init_logging(config: &Logging, filter: &str, attended: bool) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true);

    let fmt_layer = match resolve_format(config.format, attended) {
        LogFormat::Json => fmt_layer
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Simplified => fmt_layer.compact().with_ansi(false).boxed(),
        LogFormat::Pretty | LogFormat::Auto => fmt_layer.pretty().boxed(),
    };

    let sentry_layer = sentry::integrations::tracing::layer()
        .event_filter(|metadata| sentry_event_filter(metadata.level()));

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(EnvFilter::new(filter)))
        .with(sentry_layer)
        .init();
}
