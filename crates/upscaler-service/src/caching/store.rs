use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::oneshot;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{CacheEntry, CacheKey, Population, PopulationOutcome};
use crate::UpscaleError;

/// The result of [`CacheStore::begin_population`].
#[derive(Debug)]
pub enum Begin {
    /// An entry for the key already exists. Wait on it instead of populating again.
    Existing(Arc<CacheEntry>),
    /// A new entry was registered and the caller has to populate it.
    New(Population),
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<CacheKey, Arc<CacheEntry>>,
    /// Entries in the order they were admitted. The head is the oldest entry.
    admissions: VecDeque<Arc<CacheEntry>>,
}

impl StoreInner {
    /// Whether `entry` is the entry currently registered for its key.
    fn is_live(&self, entry: &Arc<CacheEntry>) -> bool {
        self.entries
            .get(entry.key())
            .is_some_and(|live| Arc::ptr_eq(live, entry))
    }

    /// Unregisters `entry` if it is still the live entry for its key.
    fn unregister(&mut self, entry: &Arc<CacheEntry>) -> bool {
        if !self.is_live(entry) {
            return false;
        }
        self.entries.remove(entry.key());
        self.admissions.retain(|other| !Arc::ptr_eq(other, entry));
        metric!(gauge("cache.entries") = self.entries.len() as u64);
        true
    }

    /// Evicts the head of the admission list.
    ///
    /// An entry that is still being populated is waited for first, so a file is never deleted
    /// while it is being written. Heads that were already removed are skipped.
    async fn evict_oldest(&mut self, reason: &'static str) -> Option<Arc<CacheEntry>> {
        let entry = self.admissions.pop_front()?;
        if !self.is_live(&entry) {
            return None;
        }

        if let Err(error) = entry.wait().await {
            tracing::debug!(key = %entry.key(), %error, "Evicting failed entry");
        }

        // A failed population that found the lock taken releases its waiters before it removes
        // itself, so the entry may still be registered here.
        if self.is_live(&entry) {
            self.entries.remove(entry.key());
        }
        entry.remove_files().await;

        tracing::debug!(key = %entry.key(), reason, "Evicted cache entry");
        metric!(counter("cache.evicted") += 1, "reason" => reason);
        metric!(gauge("cache.entries") = self.entries.len() as u64);
        Some(entry)
    }

    async fn maybe_evict(&mut self, limit: usize) {
        while self.admissions.len() > limit {
            self.evict_oldest("capacity").await;
        }
    }
}

/// The image cache.
///
/// All bookkeeping happens under one lock: the mapping from keys to entries and the admission
/// order used for eviction. Waiting for a population to finish happens outside of it, except
/// when an eviction has to wait for its victim.
#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    limit: usize,
    inner: Mutex<StoreInner>,
}

impl CacheStore {
    /// Creates a store keeping at most `limit` images in `dir`.
    pub fn new(dir: impl Into<PathBuf>, limit: usize) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.into(),
            limit,
            inner: Mutex::new(StoreInner::default()),
        })
    }

    /// Returns the entry for `key`, if there is one. It may still be populating.
    pub async fn lookup(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.inner.lock().await.entries.get(key).cloned()
    }

    /// The number of registered entries, including ones that are still populating.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns the existing entry for `key`, or registers a new one.
    ///
    /// A new entry is appended to the admission list, after which the oldest entries are
    /// evicted until the list fits the limit again. This happens in the same critical section
    /// as the registration, so the cache never holds more than `limit + 1` entries. The new
    /// entry itself is never a victim of its own admission.
    ///
    /// `extension` is the extension of the original image, including the leading dot, or empty.
    pub async fn begin_population(self: &Arc<Self>, key: &CacheKey, extension: &str) -> Begin {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.entries.get(key) {
            return Begin::Existing(Arc::clone(entry));
        }

        let stem = key.file_stem();
        let output = self.dir.join(format!("{stem}.png"));
        // A png original would otherwise be downloaded right onto the output.
        let input = if extension.eq_ignore_ascii_case(".png") {
            self.dir.join(format!("{stem}.orig{extension}"))
        } else {
            self.dir.join(format!("{stem}{extension}"))
        };
        let (entry, sender) = CacheEntry::new(key.clone(), input, output);

        inner.entries.insert(key.clone(), Arc::clone(&entry));
        inner.admissions.push_back(Arc::clone(&entry));
        let population = Population::new(entry, sender, Arc::downgrade(self));

        inner.maybe_evict(self.limit.max(1)).await;
        metric!(gauge("cache.entries") = inner.entries.len() as u64);

        Begin::New(population)
    }

    /// Evicts entries, oldest first, until at most `limit` remain admitted.
    pub async fn maybe_evict(&self, limit: usize) {
        self.inner.lock().await.maybe_evict(limit).await;
    }

    /// Evicts the oldest entry, waiting for it to finish populating if necessary.
    ///
    /// Returns the key of the evicted entry, or `None` if the list was empty or its head had
    /// already been removed.
    pub async fn evict_oldest(&self) -> Option<CacheKey> {
        let mut inner = self.inner.lock().await;
        let entry = inner.evict_oldest("manual").await?;
        Some(entry.key().clone())
    }

    /// Removes `entry` and its files, if it is still registered.
    pub(super) async fn remove_entry(&self, entry: &Arc<CacheEntry>) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.unregister(entry) {
            return false;
        }
        entry.remove_files().await;
        true
    }

    /// Removes a failed `entry` and releases its waiters with `error`.
    ///
    /// If the lock is free, the entry is unregistered before the waiters are released, so a
    /// waiter that retries right away populates the key again. Otherwise an eviction may hold
    /// the lock while it waits for this very entry, and the waiters are released first.
    pub(super) async fn fail_population(
        &self,
        entry: &Arc<CacheEntry>,
        sender: oneshot::Sender<PopulationOutcome>,
        error: UpscaleError,
    ) {
        match self.inner.try_lock() {
            Ok(mut inner) => {
                let removed = inner.unregister(entry);
                sender.send(Err(error)).ok();
                if removed {
                    entry.remove_files().await;
                }
            }
            Err(_) => {
                sender.send(Err(error)).ok();
                self.remove_entry(entry).await;
            }
        }
    }

    /// Evicts every entry that was admitted `max_age` ago or earlier.
    ///
    /// Admission order is insertion order, so this stops at the first entry that is still young
    /// enough. Returns when the next entry expires, or `now + max_age` if the cache is empty.
    pub async fn expire(&self, max_age: Duration) -> Instant {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        loop {
            let Some(head) = inner.admissions.front() else {
                return now + max_age;
            };
            if !inner.is_live(head) {
                inner.admissions.pop_front();
                continue;
            }

            let expires_at = head.inserted_at() + max_age;
            if expires_at > now {
                return expires_at;
            }

            inner.evict_oldest("expired").await;
        }
    }
}
