//! In-memory segment store.
//!
//! The reference [`SegmentStore`] implementation: a byte map behind a lock, wired to a tracker
//! and a segment cache. Reads go through the cache's double-checked load; writes are durable
//! (for the process lifetime) on return and data segments become immediately readable through
//! the cache.


use crate::cache::SegmentCache;
use crate::id::{SegmentId, SegmentTracker};
use crate::segment::Segment;
use crate::store::{ReadError, SegmentNotFoundError, SegmentStore, WriteError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Segment store backed by process memory.
pub struct MemoryStore {
    tracker: SegmentTracker,
    cache: SegmentCache,
    segments: RwLock<HashMap<u128, Arc<[u8]>>>,
    write_count: AtomicU64,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("segments", &self.segments.read().len())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create new instance with the default cache weight.
    pub fn new() -> Self {
        Self::with_cache(SegmentCache::default())
    }

    /// Create new instance around the given segment cache.
    pub fn with_cache(cache: SegmentCache) -> Self {
        Self {
            tracker: SegmentTracker::new(),
            cache,
            segments: RwLock::new(HashMap::new()),
            write_count: AtomicU64::new(0),
        }
    }

    /// The segment cache of this store.
    pub fn cache(&self) -> &SegmentCache {
        &self.cache
    }

    /// Number of segments written so far.
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }
}

impl SegmentStore for MemoryStore {
    fn contains_segment(&self, id: &SegmentId) -> bool {
        self.segments.read().contains_key(&id.full())
    }

    fn read_segment(&self, id: &Arc<SegmentId>) -> Result<Arc<Segment>, ReadError> {
        self.cache.get_segment(id, || {
            let data = self
                .segments
                .read()
                .get(&id.full())
                .cloned()
                .ok_or_else(|| SegmentNotFoundError::for_id(id))?;
            let segment = Segment::parse(Arc::clone(id), data, &self.tracker)?;
            Ok(Arc::new(segment))
        })
    }

    fn write_segment(&self, id: &Arc<SegmentId>, data: &[u8]) -> Result<(), WriteError> {
        let data: Arc<[u8]> = Arc::from(data);
        self.segments.write().insert(id.full(), Arc::clone(&data));
        self.write_count.fetch_add(1, Ordering::Relaxed);

        // Data segments become readable through the cache right away
        if id.is_data_segment() {
            let segment = Segment::parse(Arc::clone(id), data, &self.tracker)?;
            self.cache.put_segment(&Arc::new(segment));
        }

        Ok(())
    }

    fn tracker(&self) -> &SegmentTracker {
        &self.tracker
    }
}
