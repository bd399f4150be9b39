use std::fmt;

use sha2::{Digest, Sha256};

/// The marker after which the path of an image URL is stable across mirror hosts.
const DATA_MARKER: &str = "/data/";

/// Identifies one logical image.
///
/// The key is derived from the source URL. Images are served by many mirrors, so only the part
/// after `/data/` is used when the URL has one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Creates a key from an arbitrary string, without any reduction.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derives the key for an image URL.
    pub fn from_url(url: &str) -> Self {
        match url.split_once(DATA_MARKER) {
            Some((_, path)) => Self::new(path),
            None => Self::new(url),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A filesystem-safe name for files belonging to this key.
    ///
    /// This is the lowercase hex SHA-256 of the key.
    pub fn file_stem(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
