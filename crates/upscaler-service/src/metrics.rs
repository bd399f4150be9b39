//! Statsd metrics.
//!
//! Metrics are sent with the [`metric!`](crate::metric) macro. Until [`configure_statsd`] has
//! been called, or when no statsd host is configured at all, the macro does nothing.
use std::collections::BTreeMap;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use cadence::{QueuingMetricSink, StatsdClient, UdpMetricSink};

use crate::config::Metrics;

static CLIENT: OnceLock<StatsdClient> = OnceLock::new();

/// The traits needed to build metrics on a [`StatsdClient`].
pub mod prelude {
    pub use cadence::prelude::*;
}

/// The tags sent with every metric.
fn global_tags(config: &Metrics, hostname: Option<String>) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    if let Some(tag) = &config.hostname_tag
        && let Some(hostname) = hostname
    {
        tags.insert(tag.clone(), hostname);
    }
    tags
}

/// Starts reporting metrics to the statsd host in `config`.
///
/// Returns `false` without doing anything if no host is configured. `hostname` is reported
/// under the configured `hostname_tag`. Only the first configured client is kept.
pub fn configure_statsd(config: &Metrics, hostname: Option<String>) -> Result<bool> {
    let Some(host) = &config.statsd else {
        return Ok(false);
    };

    let addrs: Vec<_> = host
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve statsd host `{host}`"))?
        .collect();
    let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind statsd socket")?;
    socket.set_nonblocking(true)?;
    // Sending happens on a background thread, metrics never block a request.
    let sink = QueuingMetricSink::from(UdpMetricSink::from(&addrs[..], socket)?);

    let mut builder = StatsdClient::builder(&config.prefix, sink).with_error_handler(|error| {
        tracing::debug!(error = &error as &dyn std::error::Error, "Failed to send metric");
    });
    for (tag, value) in global_tags(config, hostname) {
        builder = builder.with_tag(tag, value);
    }

    if CLIENT.set(builder.build()).is_err() {
        tracing::warn!("statsd client was already configured");
    } else {
        tracing::info!(%host, prefix = %config.prefix, "Reporting metrics to statsd");
    }
    Ok(true)
}

/// Runs `f` with the statsd client, if there is one.
///
/// Use the [`metric!`](crate::metric) macro instead of calling this directly.
#[inline(always)]
pub fn with_client(f: impl FnOnce(&StatsdClient)) {
    if let Some(client) = CLIENT.get() {
        f(client);
    }
}

/// Emits a metric.
///
/// ```ignore
/// metric!(counter("cache.hit") += 1);
/// metric!(gauge("cache.entries") = 12u64);
/// metric!(timer("upscale.duration") = elapsed, "status" => "ok");
/// ```
#[macro_export]
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send count_with_tags($id, $value) $(, $k => $v)*)
    };
    (gauge($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send gauge_with_tags($id, $value) $(, $k => $v)*)
    };
    (timer($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send time_with_tags($id, $value) $(, $k => $v)*)
    };
    (@send $method:ident($id:expr, $value:expr) $(, $k:expr => $v:expr)*) => {{
        use $crate::metrics::prelude::*;
        $crate::metrics::with_client(|client| {
            client.$method($id, $value)$(.with_tag($k, $v))*.send();
        })
    }};
}
