//! Read-through cache for store reads and derived views.
//!
//! An entry is served only while it is younger than the TTL *and* the
//! source fingerprint it was computed from still matches. Mutations drop
//! entries by key prefix before they return.

use std::collections::HashMap;
use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::clock::Clock;
use crate::model::Ms;

/// Opaque digest of whatever the cached value was derived from.
pub type Fingerprint = u64;

/// Digest any hashable source description (e.g. modification stamps).
pub fn fingerprint<T: Hash + ?Sized>(source: &T) -> Fingerprint {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

struct Entry<V> {
    value: Arc<V>,
    captured_at: Ms,
    source: Fingerprint,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    /// Bumped by every invalidation; a compute that straddles one is not stored.
    epoch: u64,
}

pub struct ReadCache<V> {
    name: &'static str,
    inner: Mutex<Inner<V>>,
    clock: Arc<dyn Clock>,
}

impl<V> ReadCache<V> {
    pub fn new(name: &'static str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                epoch: 0,
            }),
            clock,
        }
    }

    /// Return the cached value for `key`, or run `compute` and remember its result.
    ///
    /// The lock covers only map access; `compute` runs unlocked, so concurrent
    /// misses on the same key may each compute.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        ttl: Ms,
        source: Fingerprint,
        compute: F,
    ) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let now = self.clock.now();
        let epoch = {
            let inner = self.inner.lock();
            if let Some(entry) = inner.entries.get(key)
                && now - entry.captured_at < ttl
                && entry.source == source
            {
                metrics::counter!(crate::observability::CACHE_LOOKUPS_TOTAL, "cache" => self.name, "result" => "hit")
                    .increment(1);
                return Ok(entry.value.clone());
            }
            inner.epoch
        };
        metrics::counter!(crate::observability::CACHE_LOOKUPS_TOTAL, "cache" => self.name, "result" => "miss")
            .increment(1);

        let value = Arc::new(compute().await?);

        let mut inner = self.inner.lock();
        if inner.epoch == epoch {
            inner.entries.insert(
                key.to_string(),
                Entry {
                    value: value.clone(),
                    captured_at: now,
                    source,
                },
            );
        }
        Ok(value)
    }

    /// Drop every entry whose key starts with `prefix`. Returns how many went.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.starts_with(prefix));
        let dropped = before - inner.entries.len();
        debug!(cache = self.name, prefix, dropped, "cache invalidated");
        dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
