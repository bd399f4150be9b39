use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use upscaler_service::config::Config;

/// The address to check when none was given on the command line.
///
/// An upscaler bound to all interfaces is checked on loopback.
fn check_addr(bind: &str) -> Result<SocketAddr> {
    let mut addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address `{bind}`"))?;
    if addr.ip().is_unspecified() {
        addr.set_ip(match addr.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        });
    }
    Ok(addr)
}

/// Checks `/healthcheck` of a running upscaler and prints the verdict.
pub fn healthcheck(config: Config, addr: Option<SocketAddr>, timeout: u64) -> Result<()> {
    let addr = match addr {
        Some(addr) => addr,
        None => check_addr(&config.bind)?,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()?;

    let url = format!("http://{addr}/healthcheck");
    tracing::debug!("Sending request to: {url}");

    let result = client
        .get(url)
        .send()
        .with_context(|| format!("Failed to check upscaler ({addr}) health"))
        .and_then(|response| {
            let status = response.status();
            if !status.is_success() {
                bail!("Upscaler ({addr}) is unhealthy. Status: {status}");
            }
            Ok(())
        });

    println!("{}", if result.is_ok() { "OK" } else { "ERROR" });
    result
}
