//! Evicts cached images once they reach their maximum age.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::caching::CacheStore;

/// Starts the expiration sweeper.
///
/// The sweeper sleeps until the oldest entry expires, evicts everything that is due and goes
/// back to sleep. An empty cache is checked again after `max_age`. New entries never expire
/// before the entries admitted before them, so there is nothing to wake up for in between.
pub fn spawn_sweeper(
    store: Arc<CacheStore>,
    max_age: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = store.expire(max_age) => next,
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep_until(next) => {}
            }
        }

        tracing::debug!("Expiration sweeper stopped");
    })
}
