//! A process-wide, concurrently-accessible TTL cache.
//!
//! The HTTP engine uses two instances of this type to bridge sibling
//! connections that only communicate through a shared request-id: one maps a
//! request-id to a serialized tracing span context, the other to a routing
//! value. Entries are evicted lazily (checked against their insertion time on
//! every read) and opportunistically by a background [`Purge`] task so that a
//! cache that nobody reads again still shrinks back down.

#![deny(rust_2018_idioms)]

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// A concurrent map from `K` to `V` whose entries expire after `ttl`.
#[derive(Clone)]
pub struct TtlCache<K, V> {
    inner: Arc<DashMap<K, Entry<V>>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Inserts or refreshes `key` with `value`, resetting its TTL clock.
    pub fn insert(&self, key: K, value: V) {
        self.inner.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Returns a clone of the value stored under `key`, if present and not
    /// yet expired. An expired entry is removed as a side effect.
    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.inner.get(key) {
            if entry.inserted_at.elapsed() <= self.ttl {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }
        // Expired: drop it and report a miss.
        self.inner.remove(key);
        None
    }

    pub fn remove(&self, key: &K) {
        self.inner.remove(key);
    }

    /// Sweeps every expired entry eagerly. Called periodically by [`Purge`].
    pub fn purge_expired(&self) {
        self.inner
            .retain(|_, entry| entry.inserted_at.elapsed() <= self.ttl);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Spawns a background thread that periodically sweeps expired entries.
    /// The returned [`Purge`] handle stops the thread when dropped.
    pub fn spawn_purge(&self, interval: Duration) -> Purge {
        let cache = self.clone_erased();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_bg = stop.clone();
        let handle = std::thread::Builder::new()
            .name("ttl-cache-purge".into())
            .spawn(move || {
                while !stop_bg.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    cache();
                }
            })
            .expect("failed to spawn ttl-cache purge thread");
        Purge {
            stop,
            handle: Some(handle),
        }
    }

    fn clone_erased(&self) -> impl Fn() + Send + 'static {
        let this = self.clone();
        move || this.purge_expired()
    }
}

/// Handle to a background eviction thread. Dropping it stops the thread.
pub struct Purge {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Drop for Purge {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            // The sweep thread wakes on its own interval; don't block the
            // caller's drop waiting for it.
            drop(handle);
        }
    }
}
