//! The cache-and-scheduling engine behind the manga upscaler.
//!
//! Images are fetched from their origin at most once per cache lifetime, pushed through a
//! strictly serial GPU transformation and kept on disk until they are evicted by capacity or
//! age. See [`service::UpscaleService`] for the entry point.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod download;
pub mod error;
pub mod expiry;
pub mod logging;
pub mod scheduler;
pub mod service;
pub mod throttle;
pub mod transform;
pub mod utils;

pub use error::UpscaleError;
