//! The weight-bounded segment cache.
//!
//! The 2nd-level cache maps segment ids to loaded segments, bounded by a configurable total
//! weight (segment bytes plus a fixed per-entry overhead). It cooperates with the 1st-level
//! reference on each [`SegmentId`]: `loaded()` is set *before* an entry is inserted, and
//! eviction runs the id's `unloaded()` hook before the weight counter is decremented, so that
//! readers either observe a fully loaded segment or nothing.
//!
//! Eviction is least-recently-used with a second chance: hits served from the 1st-level
//! reference never touch this cache, so they set an access bit on the segment instead, and an
//! eviction candidate whose bit is set is re-queued once rather than dropped.
//!
//! Bulk segments are never cached; loading one returns it directly to the caller.


use crate::id::SegmentId;
use crate::segment::Segment;
use crate::store::ReadError;
use parking_lot::Mutex;
use schnellru::{LruMap, Unlimited};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::debug;

/// Default maximum weight of the segment cache: 256 MiB.
pub const DEFAULT_SEGMENT_CACHE_BYTES: usize = 256 * 1024 * 1024;

/// Bookkeeping weight attributed to every cache entry on top of the segment bytes.
const ENTRY_OVERHEAD: usize = 224;

/// Point-in-time statistics of a [`SegmentCache`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CacheStats {
    /// Number of cached segments
    pub element_count: usize,
    /// Total weight of cached segments in bytes
    pub current_weight: usize,
    /// Maximum total weight in bytes
    pub max_weight: usize,
    /// Lookups served from a loaded segment, including 1st-level hits
    pub hit_count: u64,
    /// Lookups that had to invoke the loader
    pub miss_count: u64,
    /// Loads that completed successfully
    pub load_success_count: u64,
    /// Loads that failed
    pub load_exception_count: u64,
    /// Cumulative time spent loading, in nanoseconds
    pub total_load_nanos: u64,
    /// Entries dropped by weight-driven eviction; explicit invalidation is not counted
    pub eviction_count: u64,
}

impl CacheStats {
    /// Total number of lookups; always `hit_count + miss_count`.
    pub const fn request_count(&self) -> u64 {
        self.hit_count + self.miss_count
    }
}

/// Weight-bounded cache of loaded segments.
pub struct SegmentCache {
    max_weight: usize,
    map: Mutex<LruMap<u128, Arc<Segment>, Unlimited>>,
    current_weight: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    load_successes: AtomicU64,
    load_failures: AtomicU64,
    load_nanos: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for SegmentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentCache")
            .field("max_weight", &self.max_weight)
            .field("current_weight", &self.current_weight.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for SegmentCache {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT_CACHE_BYTES)
    }
}

impl SegmentCache {
    /// Create new instance bounded by `max_weight` bytes.
    pub fn new(max_weight: usize) -> Self {
        Self {
            max_weight,
            map: Mutex::new(LruMap::new(Unlimited)),
            current_weight: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            load_successes: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            load_nanos: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn entry_weight(segment: &Segment) -> usize {
        segment.size() + ENTRY_OVERHEAD
    }

    /// Resolve the segment for `id`, invoking `loader` on a miss.
    ///
    /// The fast path consults the id's 1st-level reference and still counts as a hit. The slow
    /// path runs under the id's load mutex: it re-checks the reference, invokes the loader
    /// (blocking I/O permitted), records the outcome and latency, and caches the result unless
    /// the segment is bulk, which bypasses the cache entirely.
    pub fn get_segment<L>(
        &self,
        id: &Arc<SegmentId>,
        loader: L,
    ) -> Result<Arc<Segment>, ReadError>
    where
        L: FnOnce() -> Result<Arc<Segment>, ReadError>,
    {
        if let Some(segment) = id.cached() {
            segment.mark_accessed();
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(segment);
        }

        let _load_guard = id.load_lock().lock();

        if let Some(segment) = id.cached() {
            segment.mark_accessed();
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(segment);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let load_start = Instant::now();
        match loader() {
            Ok(segment) => {
                self.load_successes.fetch_add(1, Ordering::Relaxed);
                self.load_nanos.fetch_add(
                    u64::try_from(load_start.elapsed().as_nanos()).unwrap_or(u64::MAX),
                    Ordering::Relaxed,
                );

                if segment.id().is_bulk_segment() {
                    return Ok(segment);
                }
                self.put_segment(&segment);
                Ok(segment)
            }
            Err(error) => {
                self.load_failures.fetch_add(1, Ordering::Relaxed);
                self.load_nanos.fetch_add(
                    u64::try_from(load_start.elapsed().as_nanos()).unwrap_or(u64::MAX),
                    Ordering::Relaxed,
                );
                Err(error)
            }
        }
    }

    /// Insert a loaded data segment.
    ///
    /// The id's 1st-level reference is set before the cache insert, so that an eviction racing
    /// with this insert still leaves the reference consistent. Bulk segments are not cached.
    pub fn put_segment(&self, segment: &Arc<Segment>) {
        let id = segment.id();
        if !id.is_data_segment() {
            return;
        }

        id.loaded(segment);

        let mut map = self.map.lock();
        if map.peek(&id.full()).is_none() {
            map.insert(id.full(), Arc::clone(segment));
            self.current_weight
                .fetch_add(Self::entry_weight(segment), Ordering::Relaxed);
        }
        self.evict(&mut map);
    }

    /// Drop least-recently-used entries until the weight bound holds.
    ///
    /// An entry whose access bit is set was served from a 1st-level reference since it was last
    /// seen here; it gets re-queued as most recent with the bit cleared instead of being
    /// evicted.
    fn evict(&self, map: &mut LruMap<u128, Arc<Segment>, Unlimited>) {
        while self.current_weight.load(Ordering::Relaxed) > self.max_weight {
            let Some((key, segment)) = map.pop_oldest() else {
                break;
            };

            if segment.take_accessed() {
                map.insert(key, segment);
                continue;
            }

            segment.id().unloaded();
            self.current_weight
                .fetch_sub(Self::entry_weight(&segment), Ordering::Relaxed);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(segment_id = %segment.id(), "Evicted segment");
        }
    }

    /// Invalidate every entry, running the eviction hook for each.
    ///
    /// Explicit invalidation does not count towards the eviction statistic.
    pub fn clear(&self) {
        let mut map = self.map.lock();
        while let Some((_key, segment)) = map.pop_oldest() {
            segment.id().unloaded();
            self.current_weight
                .fetch_sub(Self::entry_weight(&segment), Ordering::Relaxed);
            debug!(segment_id = %segment.id(), "Invalidated segment");
        }
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            element_count: self.map.lock().len(),
            current_weight: self.current_weight.load(Ordering::Relaxed),
            max_weight: self.max_weight,
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            load_success_count: self.load_successes.load(Ordering::Relaxed),
            load_exception_count: self.load_failures.load(Ordering::Relaxed),
            total_load_nanos: self.load_nanos.load(Ordering::Relaxed),
            eviction_count: self.evictions.load(Ordering::Relaxed),
        }
    }
}
