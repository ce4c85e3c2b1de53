//! Two-tier thumbnail cache with single-flight resolution.
//!
//! Lookups go memory → disk → [`CoverSource`]. Concurrent lookups of one key
//! share a single in-flight resolution. `put` and `invalidate` mark the
//! key's in-flight resolution stale before touching the tiers; a stale result
//! is handed back to its caller but never stored, so an invalidated bitmap
//! cannot reappear.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use image::DynamicImage;
use tracing::{debug, warn};

use crate::cover::{CoverSource, CoverSubject, Resolution};
use crate::disk::{DiskTier, encode_png};
use crate::error::Result;
use crate::worker::{CancelCheck, CancellationToken};

/// Capacity and location injected by whoever owns the cache instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub disk_dir: PathBuf,
}

#[derive(Debug)]
pub struct CacheEntry {
    pub key: String,
    pub image: DynamicImage,
    pub page_count: Option<u32>,
}

impl CacheEntry {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

type Hit = (Option<Arc<CacheEntry>>, Option<u32>);

enum Slot {
    Cover(Arc<CacheEntry>),
    /// Resolved without a usable cover; the page count is still known.
    Missing(Option<u32>),
}

/// Covers and negative results share one LRU bounded by entry count.
#[derive(Default)]
struct MemoryTier {
    slots: HashMap<String, Slot>,
    // Most recently used at the front.
    order: VecDeque<String>,
}

impl MemoryTier {
    fn lookup(&mut self, key: &str) -> Option<Hit> {
        let hit = match self.slots.get(key)? {
            Slot::Cover(entry) => (Some(Arc::clone(entry)), entry.page_count),
            Slot::Missing(page_count) => (None, *page_count),
        };
        if let Some(pos) = self.order.iter().position(|k| k == key)
            && let Some(k) = self.order.remove(pos)
        {
            self.order.push_front(k);
        }
        Some(hit)
    }

    fn insert(&mut self, key: &str, slot: Slot, capacity: usize) {
        if self.slots.insert(key.to_string(), slot).is_some()
            && let Some(pos) = self.order.iter().position(|k| k == key)
        {
            let _ = self.order.remove(pos);
        }
        self.order.push_front(key.to_string());
        while self.order.len() > capacity {
            if let Some(evicted) = self.order.pop_back() {
                self.slots.remove(&evicted);
                debug!(key = %evicted, "evicted thumbnail from memory");
            }
        }
    }

    fn remove(&mut self, key: &str) {
        self.slots.remove(key);
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let _ = self.order.remove(pos);
        }
    }
}

enum FlightState {
    Pending,
    Done(Option<Arc<CacheEntry>>),
    // The leader gave up (cancelled, or its result went stale); followers retry.
    Abandoned,
}

struct Flight {
    stale: AtomicBool,
    state: Mutex<FlightState>,
    done: Condvar,
}

const FOLLOWER_POLL: Duration = Duration::from_millis(25);

impl Flight {
    fn new() -> Self {
        Self {
            stale: AtomicBool::new(false),
            state: Mutex::new(FlightState::Pending),
            done: Condvar::new(),
        }
    }

    fn mark_stale(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    fn finish(&self, state: FlightState) {
        *lock(&self.state) = state;
        self.done.notify_all();
    }

    /// `Ok(Some(result))` when the leader delivered, `Ok(None)` when it
    /// abandoned the flight.
    fn wait(&self, cancel: &CancellationToken) -> Result<Option<Option<Arc<CacheEntry>>>> {
        let mut state = lock(&self.state);
        loop {
            match &*state {
                FlightState::Done(result) => return Ok(Some(result.clone())),
                FlightState::Abandoned => return Ok(None),
                FlightState::Pending => {
                    cancel.check()?;
                    state = match self.done.wait_timeout(state, FOLLOWER_POLL) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    };
                }
            }
        }
    }
}

enum Resolved {
    Disk(Arc<CacheEntry>),
    Fresh(Arc<CacheEntry>),
    Missing(Option<u32>),
}

pub struct ThumbnailCache {
    capacity: usize,
    memory: Mutex<MemoryTier>,
    disk: DiskTier,
    source: Arc<dyn CoverSource>,
    flights: DashMap<String, Arc<Flight>>,
}

impl ThumbnailCache {
    pub fn new(config: CacheConfig, source: Arc<dyn CoverSource>) -> Self {
        Self {
            capacity: config.capacity.max(1),
            memory: Mutex::new(MemoryTier::default()),
            disk: DiskTier::new(config.disk_dir),
            source,
            flights: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn disk_dir(&self) -> &Path {
        self.disk.dir()
    }

    /// Cover for `subject`, resolving it on a miss. `Ok(None)` means the
    /// subject has no usable cover (nothing found, undecodable, or extraction
    /// failed); only cancellation is reported as an error.
    pub fn get(
        &self,
        subject: &CoverSubject,
        cancel: &CancellationToken,
    ) -> Result<Option<Arc<CacheEntry>>> {
        Ok(self.lookup(subject, cancel)?.0)
    }

    /// Page count cached alongside the cover of `subject`.
    pub fn page_count(
        &self,
        subject: &CoverSubject,
        cancel: &CancellationToken,
    ) -> Result<Option<u32>> {
        Ok(self.lookup(subject, cancel)?.1)
    }

    /// Memory-tier probe that never triggers resolution.
    pub fn peek(&self, key: &str) -> Option<Arc<CacheEntry>> {
        lock(&self.memory).lookup(key).and_then(|(entry, _)| entry)
    }

    /// Entries held in memory, negative results included.
    pub fn memory_len(&self) -> usize {
        lock(&self.memory).slots.len()
    }

    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Stores a cover directly in both tiers. Any resolution of the same key
    /// still in flight is superseded.
    pub fn put(
        &self,
        key: &str,
        image: DynamicImage,
        page_count: Option<u32>,
    ) -> Result<Arc<CacheEntry>> {
        let encoded = encode_png(&image)?;
        let entry = Arc::new(CacheEntry {
            key: key.to_string(),
            image,
            page_count,
        });
        self.supersede(key);
        let mut memory = lock(&self.memory);
        memory.insert(key, Slot::Cover(Arc::clone(&entry)), self.capacity);
        self.disk
            .store(key, &encoded, entry.width(), entry.height(), page_count)?;
        Ok(entry)
    }

    /// Drops `key` from both tiers. A resolution still in flight is detached
    /// and its result discarded on arrival.
    pub fn invalidate(&self, key: &str) -> Result<()> {
        self.supersede(key);
        let mut memory = lock(&self.memory);
        memory.remove(key);
        self.disk.remove(key)?;
        debug!(key, "invalidated thumbnail");
        Ok(())
    }

    // Must run before the memory lock is taken: completions check staleness
    // under that lock.
    fn supersede(&self, key: &str) {
        if let Some((_, flight)) = self.flights.remove(key) {
            flight.mark_stale();
        }
    }

    fn lookup(&self, subject: &CoverSubject, cancel: &CancellationToken) -> Result<Hit> {
        let key = subject.cache_key();
        loop {
            cancel.check()?;
            if let Some(hit) = self.memory_hit(&key) {
                return Ok(hit);
            }

            let (flight, leader) = match self.flights.entry(key.clone()) {
                Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
                Entry::Vacant(entry) => {
                    let flight = Arc::new(Flight::new());
                    entry.insert(Arc::clone(&flight));
                    (flight, true)
                }
            };

            if leader {
                return self.lead(&key, subject, &flight, cancel);
            }

            match flight.wait(cancel)? {
                Some(Some(entry)) => {
                    let page_count = entry.page_count;
                    return Ok((Some(entry), page_count));
                }
                // Missing subjects are recorded in the memory tier; re-enter
                // so the page count comes from there.
                Some(None) | None => continue,
            }
        }
    }

    fn memory_hit(&self, key: &str) -> Option<Hit> {
        lock(&self.memory).lookup(key)
    }

    fn lead(
        &self,
        key: &str,
        subject: &CoverSubject,
        flight: &Arc<Flight>,
        cancel: &CancellationToken,
    ) -> Result<Hit> {
        // Another leader may have completed between our memory probe and
        // registering this flight.
        if let Some(hit) = self.memory_hit(key) {
            flight.finish(FlightState::Done(hit.0.clone()));
            self.retire(key, flight);
            return Ok(hit);
        }

        let resolved = match self.resolve(key, subject, cancel) {
            Ok(resolved) => resolved,
            Err(err) => {
                flight.finish(FlightState::Abandoned);
                self.retire(key, flight);
                return Err(err);
            }
        };

        let hit = match &resolved {
            Resolved::Disk(entry) | Resolved::Fresh(entry) => {
                (Some(Arc::clone(entry)), entry.page_count)
            }
            Resolved::Missing(page_count) => (None, *page_count),
        };

        if self.complete(key, flight, resolved) {
            flight.finish(FlightState::Done(hit.0.clone()));
        } else {
            debug!(key, "discarding stale thumbnail resolution");
            flight.finish(FlightState::Abandoned);
        }
        self.retire(key, flight);
        Ok(hit)
    }

    fn resolve(
        &self,
        key: &str,
        subject: &CoverSubject,
        cancel: &CancellationToken,
    ) -> Result<Resolved> {
        match self.disk.load(key) {
            Ok(Some(hit)) => {
                debug!(key, "thumbnail disk hit");
                return Ok(Resolved::Disk(Arc::new(CacheEntry {
                    key: key.to_string(),
                    image: hit.image,
                    page_count: hit.page_count,
                })));
            }
            Ok(None) => {}
            Err(err) => warn!(key, error = %err, "thumbnail disk tier unreadable"),
        }

        cancel.check()?;
        match self.source.resolve(subject, cancel) {
            Ok(Resolution {
                image: Some(image),
                page_count,
            }) => Ok(Resolved::Fresh(Arc::new(CacheEntry {
                key: key.to_string(),
                image,
                page_count,
            }))),
            Ok(Resolution {
                image: None,
                page_count,
            }) => {
                debug!(key, "no cover found");
                Ok(Resolved::Missing(page_count))
            }
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                warn!(key, error = %err, "cover resolution failed");
                Ok(Resolved::Missing(None))
            }
        }
    }

    /// Serialized completion handoff: the staleness check and both tier
    /// writes happen under the memory lock.
    fn complete(&self, key: &str, flight: &Flight, resolved: Resolved) -> bool {
        let encoded = match &resolved {
            Resolved::Fresh(entry) => match encode_png(&entry.image) {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    warn!(key, error = %err, "could not encode thumbnail for disk");
                    None
                }
            },
            _ => None,
        };

        let mut memory = lock(&self.memory);
        if flight.is_stale() {
            return false;
        }
        match resolved {
            Resolved::Disk(entry) => memory.insert(key, Slot::Cover(entry), self.capacity),
            Resolved::Fresh(entry) => {
                if let Some(bytes) = encoded
                    && let Err(err) = self.disk.store(
                        key,
                        &bytes,
                        entry.width(),
                        entry.height(),
                        entry.page_count,
                    )
                {
                    warn!(key, error = %err, "could not persist thumbnail");
                }
                memory.insert(key, Slot::Cover(entry), self.capacity);
            }
            Resolved::Missing(page_count) => {
                memory.insert(key, Slot::Missing(page_count), self.capacity);
            }
        }
        true
    }

    fn retire(&self, key: &str, flight: &Arc<Flight>) {
        self.flights
            .remove_if(key, |_, current| Arc::ptr_eq(current, flight));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
