// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod coalescing;
pub mod download;
pub mod eviction;
pub mod expiry;
pub mod scheduling;
pub mod shutdown;
pub mod utils;

pub use utils::*;
