// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A small bounded cache with cost-weighted LFU-ish eviction, used to memoize SQL/URL
//! obfuscation results keyed on the raw input string. `capacity` is a byte-cost budget, not an
//! entry count: each value's [`Costed::cost`] is charged against it, and admission evicts
//! least-frequently-used entries until the new value fits. A background task periodically
//! reports hit/miss counts; `Cache::close` blocks until that task has actually exited, following
//! the same spawn-then-handshake shutdown idiom as [`ddcommon::worker`].

use ddcommon::worker::Worker;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Admission cost of a cached value, in whatever unit `capacity` is denominated in. Defaults to
/// `1`, which makes an unweighted `Cache` behave as a plain entry-count LFU cache.
pub trait Costed {
    fn cost(&self) -> usize {
        1
    }
}

impl Costed for String {}
impl Costed for i32 {}

struct Entry<V> {
    value: V,
    hits: u64,
    cost: usize,
}

struct Shared<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Handle to the cache. Cloning shares the same underlying storage and counters.
#[derive(Clone)]
pub struct Cache<V> {
    inner: Arc<Shared<V>>,
}

impl<V: Clone + Costed> Cache<V> {
    /// `capacity` is the total cost budget admitted entries may occupy.
    pub fn new(capacity: usize) -> Self {
        Cache {
            inner: Arc::new(Shared {
                entries: Mutex::new(HashMap::new()),
                capacity,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    pub fn get_or_insert_with(&self, key: &str, compute: impl FnOnce() -> V) -> V {
        {
            let mut entries = self.inner.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(key) {
                entry.hits += 1;
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                return entry.value.clone();
            }
        }
        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        let value = compute();
        self.insert(key, value.clone());
        value
    }

    fn insert(&self, key: &str, value: V) {
        let cost = value.cost();
        let mut entries = self.inner.entries.lock().unwrap();
        if cost > self.inner.capacity {
            // Would never fit even as the sole occupant; don't cache it at all.
            return;
        }
        if let Some(existing) = entries.remove(key) {
            drop(existing);
        }
        let mut total: usize = entries.values().map(|e| e.cost).sum();
        while total + cost > self.inner.capacity {
            let evict_key = match entries
                .iter()
                .min_by_key(|(_, e)| e.hits)
                .map(|(k, _)| k.clone())
            {
                Some(k) => k,
                None => break,
            };
            if let Some(evicted) = entries.remove(&evict_key) {
                total -= evicted.cost;
            }
        }
        entries.insert(key.to_string(), Entry { value, hits: 0, cost });
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of `(hits, misses)` since the cache was created.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.inner.hits.load(Ordering::Relaxed),
            self.inner.misses.load(Ordering::Relaxed),
        )
    }
}

/// Background task that periodically hands the cache's hit/miss counters to an emitter
/// (typically a dogstatsd gauge flush). Runs until [`CacheStatsHandle::close`] is called.
pub struct CacheStatsWorker<V, F> {
    cache: Cache<V>,
    interval: Duration,
    emit: F,
    shutdown: oneshot::Receiver<()>,
}

impl<V, F> Worker for CacheStatsWorker<V, F>
where
    V: Clone + Send + Sync + 'static,
    F: FnMut(u64, u64) + Send,
{
    async fn run(&mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (hits, misses) = self.cache.stats();
                    (self.emit)(hits, misses);
                }
                _ = &mut self.shutdown => {
                    break;
                }
            }
        }
    }
}

pub struct CacheStatsHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl CacheStatsHandle {
    /// Spawns the background stats-emission loop for `cache`, firing `emit(hits, misses)` every
    /// `interval`.
    pub fn spawn<V, F>(cache: Cache<V>, interval: Duration, emit: F) -> Self
    where
        V: Clone + Send + Sync + 'static,
        F: FnMut(u64, u64) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut worker = CacheStatsWorker {
            cache,
            interval,
            emit,
            shutdown: rx,
        };
        let join = tokio::spawn(async move { worker.run().await });
        CacheStatsHandle {
            shutdown: Some(tx),
            join: Some(join),
        }
    }

    /// Signals the background task to stop and blocks until it has actually exited.
    pub async fn close(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}
