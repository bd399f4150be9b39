use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use tokio::time::Instant;

use crate::UpscaleError;

use super::CacheKey;
use super::store::CacheStore;

/// The result of populating a cache entry, as seen by everybody waiting on it.
pub type PopulationOutcome = Result<PathBuf, UpscaleError>;

// A shared future so that any number of waiters, including late ones, can observe the outcome.
type ReadySignal = Shared<oneshot::Receiver<PopulationOutcome>>;

/// One cached image.
///
/// The paths are fixed when the entry is created. The readiness signal fires exactly once when
/// the population of the entry finishes, successfully or not.
pub struct CacheEntry {
    key: CacheKey,
    input: PathBuf,
    output: PathBuf,
    inserted_at: Instant,
    ready: ReadySignal,
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("output", &self.output)
            .field("inserted_at", &self.inserted_at)
            .finish()
    }
}

impl CacheEntry {
    pub(super) fn new(
        key: CacheKey,
        input: PathBuf,
        output: PathBuf,
    ) -> (Arc<Self>, oneshot::Sender<PopulationOutcome>) {
        let (sender, receiver) = oneshot::channel();
        let entry = Self {
            key,
            input,
            output,
            inserted_at: Instant::now(),
            ready: receiver.shared(),
        };
        (Arc::new(entry), sender)
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Where the original image is downloaded to.
    pub fn input_path(&self) -> &Path {
        &self.input
    }

    /// Where the upscaled image is written to and served from.
    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// When the entry was admitted to the cache.
    ///
    /// Reads do not refresh this, it drives both FIFO eviction and expiration.
    pub fn inserted_at(&self) -> Instant {
        self.inserted_at
    }

    /// Waits until the population of this entry has finished and returns its outcome.
    ///
    /// This does not touch the store lock and can be called by any number of waiters.
    pub async fn wait(&self) -> PopulationOutcome {
        // The sender only goes away without a value if the population was torn down abnormally.
        self.ready.clone().await.unwrap_or(Err(UpscaleError::Internal))
    }

    /// Removes the files that may belong to this entry.
    pub(super) async fn remove_files(&self) {
        remove_file_if_exists(&self.output).await;
        if self.input != self.output {
            remove_file_if_exists(&self.input).await;
        }
    }
}

async fn remove_file_if_exists(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await
        && err.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(
            error = &err as &dyn std::error::Error,
            path = %path.display(),
            "Failed to remove cached file"
        );
    }
}

/// The exclusive right and obligation to populate a freshly created [`CacheEntry`].
///
/// Exactly one `Population` exists per entry. It must be finished with [`complete`]. If it is
/// dropped instead, e.g. because the task driving it was cancelled, the waiters are released
/// with an internal error and the entry is removed from the store in the background.
///
/// [`complete`]: Population::complete
pub struct Population {
    entry: Arc<CacheEntry>,
    sender: Option<oneshot::Sender<PopulationOutcome>>,
    store: Weak<CacheStore>,
}

impl fmt::Debug for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Population")
            .field("entry", &self.entry)
            .finish()
    }
}

impl Population {
    pub(super) fn new(
        entry: Arc<CacheEntry>,
        sender: oneshot::Sender<PopulationOutcome>,
        store: Weak<CacheStore>,
    ) -> Self {
        Self {
            entry,
            sender: Some(sender),
            store,
        }
    }

    pub fn entry(&self) -> &Arc<CacheEntry> {
        &self.entry
    }

    /// Finishes the population with the given result.
    ///
    /// On success the entry stays in the cache and becomes servable, then the downloaded
    /// original is removed. On failure the entry is unregistered from the store and its waiters
    /// are released with the error, before the files are removed. The entry is only
    /// unregistered after the release if the store lock is taken at that moment.
    pub async fn complete(mut self, result: Result<(), UpscaleError>) {
        let Some(sender) = self.sender.take() else {
            return;
        };

        match result {
            Ok(()) => {
                let entry = &self.entry;
                sender.send(Ok(entry.output.clone())).ok();
                if entry.input != entry.output {
                    remove_file_if_exists(&entry.input).await;
                }
            }
            Err(error) => match self.store.upgrade() {
                Some(store) => store.fail_population(&self.entry, sender, error).await,
                None => {
                    sender.send(Err(error)).ok();
                    self.entry.remove_files().await;
                }
            },
        }
    }
}

impl Drop for Population {
    fn drop(&mut self) {
        let Some(sender) = self.sender.take() else {
            return;
        };

        tracing::error!(key = %self.entry.key, "Population was dropped before it completed");
        sender.send(Err(UpscaleError::Internal)).ok();

        let entry = Arc::clone(&self.entry);
        let store = self.store.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Some(store) = store.upgrade() {
                    store.remove_entry(&entry).await;
                }
            });
        }
    }
}
