//! In-memory image cache
//!
//! [`CacheStore`] is what the loader needs from a cache. [`ImageCache`] is
//! the bundled implementation: an LRU bounded by entry count and, optionally,
//! by the total decoded size of its images.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::debug;

use crate::decode::SharedImage;
use crate::humanize::ByteSize;
use crate::locator::Locator;

pub const DEFAULT_COUNT_LIMIT: usize = 256;

/// Thread-safe locator → image store
pub trait CacheStore: Send + Sync {
    fn get(&self, locator: &Locator) -> Option<SharedImage>;
    fn set(&self, locator: Locator, image: SharedImage);
    fn remove(&self, locator: &Locator) -> Option<SharedImage>;
    fn clear(&self);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Called once per entry pushed out by capacity pressure. Not called for
/// explicit `remove`/`clear` or when a key is overwritten.
///
/// May run while a loader holds its internal lock, so it must not call
/// back into a loader.
pub type EvictionListener = Arc<dyn Fn(&Locator, &SharedImage) + Send + Sync>;

struct Entry {
    image: SharedImage,
    cost: u64,
}

struct Inner {
    entries: LruCache<Locator, Entry>,
    total_cost: u64,
    cost_limit: Option<u64>,
}

pub struct ImageCache {
    inner: Mutex<Inner>,
    listener: RwLock<Option<EvictionListener>>,
}

/// Decoded size in bytes, the cost charged against the cost limit
pub fn image_cost(image: &SharedImage) -> u64 {
    image.as_bytes().len() as u64
}

impl ImageCache {
    pub fn new(count_limit: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(count_limit),
                total_cost: 0,
                cost_limit: None,
            }),
            listener: RwLock::new(None),
        }
    }

    /// Also bound the summed decoded size of all entries
    pub fn with_cost_limit(self, limit: ByteSize) -> Self {
        self.lock().cost_limit = Some(limit.as_u64());
        self
    }

    pub fn set_eviction_listener(&self, listener: EvictionListener) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    pub fn total_cost(&self) -> u64 {
        self.lock().total_cost
    }

    pub fn count_limit(&self) -> usize {
        self.lock().entries.cap().get()
    }

    pub fn contains(&self, locator: &Locator) -> bool {
        self.lock().entries.contains(locator)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, evicted: Vec<(Locator, SharedImage)>) {
        if evicted.is_empty() {
            return;
        }

        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (locator, image) in &evicted {
            debug!(locator = %locator, "Evicted cached image");
            if let Some(listener) = &listener {
                listener(locator, image);
            }
        }
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_COUNT_LIMIT).unwrap_or(NonZeroUsize::MIN))
    }
}

impl CacheStore for ImageCache {
    fn get(&self, locator: &Locator) -> Option<SharedImage> {
        self.lock().entries.get(locator).map(|entry| Arc::clone(&entry.image))
    }

    fn set(&self, locator: Locator, image: SharedImage) {
        let cost = image_cost(&image);
        let mut evicted = Vec::new();

        {
            let mut inner = self.lock();
            inner.total_cost += cost;

            if let Some((old_key, old)) = inner.entries.push(locator.clone(), Entry { image, cost }) {
                inner.total_cost -= old.cost;
                if old_key != locator {
                    evicted.push((old_key, old.image));
                }
            }

            if let Some(limit) = inner.cost_limit {
                while inner.total_cost > limit {
                    let Some((key, entry)) = inner.entries.pop_lru() else {
                        break;
                    };
                    inner.total_cost -= entry.cost;
                    evicted.push((key, entry.image));
                }
            }
        }

        self.notify(evicted);
    }

    fn remove(&self, locator: &Locator) -> Option<SharedImage> {
        let mut inner = self.lock();
        let entry = inner.entries.pop(locator)?;
        inner.total_cost -= entry.cost;
        Some(entry.image)
    }

    fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.total_cost = 0;
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }
}
