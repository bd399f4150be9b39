//! The key-addressed image cache.
//!
//! A [`CacheStore`] maps a [`CacheKey`] to a [`CacheEntry`], which knows where the upscaled
//! image lives on disk and whether it is ready yet. Concurrent requests for the same key share
//! one entry and wait on its readiness signal, so each image is only fetched and upscaled once
//! per entry lifetime.

mod entry;
mod key;
mod store;

pub use entry::{CacheEntry, Population, PopulationOutcome};
pub use key::CacheKey;
pub use store::{Begin, CacheStore};
