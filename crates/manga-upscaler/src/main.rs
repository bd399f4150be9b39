//! Manga Upscaler.
//!
//! A local caching proxy that serves upscaled versions of remote manga pages. Images are
//! requested by their base64 encoded URL, downloaded once, upscaled with `waifu2x-ncnn-vulkan`
//! on a single GPU slot and kept in a private cache directory until they are evicted.

#![warn(missing_debug_implementations, clippy::all)]

mod cli;
mod endpoints;
mod healthcheck;
mod logging;
mod server;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
