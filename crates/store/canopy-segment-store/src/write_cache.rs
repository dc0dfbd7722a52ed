//! Write-side deduplication caches.
//!
//! Writing the same string, template or node record twice should yield the same record id
//! instead of a second copy. The record writer consults these caches before encoding anything:
//! small bounded LRUs for recently written strings and templates, and a depth-aware cache for
//! node records where shallow nodes, the expensive ones to rewrite, survive the longest.


use crate::id::RecordId;
use canopy_segment::template::Template;
use parking_lot::Mutex;
use schnellru::{ByLength, LruMap, Unlimited};
use std::fmt;
use std::hash::Hash;

/// Sizes of the write-side deduplication caches.
///
/// A size of zero disables the respective cache.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WriterCacheOptions {
    /// Number of recently written strings to remember
    pub strings_cache_size: usize,
    /// Number of recently written templates to remember
    pub templates_cache_size: usize,
    /// Number of node records to remember across all depths
    pub node_cache_size: usize,
    /// Node depth beyond which node records are not cached
    pub node_cache_depth: usize,
}

impl Default for WriterCacheOptions {
    fn default() -> Self {
        Self {
            strings_cache_size: 15000,
            templates_cache_size: 3000,
            node_cache_size: 1_000_000,
            node_cache_depth: 20,
        }
    }
}

/// Bounded LRU from a record key to the id it was last written under.
pub struct RecordCache<K> {
    inner: Option<Mutex<LruMap<K, RecordId, ByLength>>>,
}

impl<K> fmt::Debug for RecordCache<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordCache")
            .field("enabled", &self.inner.is_some())
            .finish_non_exhaustive()
    }
}

impl<K> RecordCache<K>
where
    K: Hash + Eq,
{
    /// Create new instance remembering up to `size` records; zero disables the cache.
    pub fn new(size: usize) -> Self {
        Self {
            inner: (size > 0).then(|| {
                Mutex::new(LruMap::new(ByLength::new(
                    u32::try_from(size).unwrap_or(u32::MAX),
                )))
            }),
        }
    }

    /// Record id `key` was last written under, if remembered.
    pub fn get(&self, key: &K) -> Option<RecordId> {
        self.inner.as_ref()?.lock().get(key).cloned()
    }

    /// Remember that `key` was written under `record_id`.
    pub fn put(&self, key: K, record_id: RecordId) {
        if let Some(inner) = &self.inner {
            inner.lock().insert(key, record_id);
        }
    }
}

struct NodeCacheInner {
    capacity: usize,
    /// Per-depth LRUs; nodes deeper than the last bucket are not cached
    by_depth: Vec<LruMap<String, RecordId, Unlimited>>,
    size: usize,
}

impl NodeCacheInner {
    /// Drop entries from the deepest non-empty bucket until within capacity.
    ///
    /// Shallow nodes root large subtrees, so they are the last to go.
    fn evict(&mut self) {
        while self.size > self.capacity {
            let Some(deepest) = self
                .by_depth
                .iter_mut()
                .rev()
                .find(|bucket| !bucket.is_empty())
            else {
                break;
            };
            deepest.pop_oldest();
            self.size -= 1;
        }
    }
}

/// Depth-aware cache from a node's stable id to its record id.
pub struct NodeCache {
    inner: Option<Mutex<NodeCacheInner>>,
}

impl fmt::Debug for NodeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCache")
            .field("enabled", &self.inner.is_some())
            .finish_non_exhaustive()
    }
}

impl NodeCache {
    /// Create new instance holding up to `size` nodes of depth below `max_depth`; a zero size
    /// disables the cache.
    pub fn new(size: usize, max_depth: usize) -> Self {
        Self {
            inner: (size > 0).then(|| {
                Mutex::new(NodeCacheInner {
                    capacity: size,
                    by_depth: (0..max_depth).map(|_| LruMap::new(Unlimited)).collect(),
                    size: 0,
                })
            }),
        }
    }

    /// Record id the node with `stable_id` was last written under, if remembered.
    pub fn get(&self, stable_id: &str) -> Option<RecordId> {
        let mut inner = self.inner.as_ref()?.lock();
        inner
            .by_depth
            .iter_mut()
            .find_map(|bucket| bucket.get(stable_id).cloned())
    }

    /// Remember that the node with `stable_id` at `depth` was written under `record_id`.
    ///
    /// Nodes at or beyond the configured maximum depth are not cached.
    pub fn put(&self, stable_id: String, record_id: RecordId, depth: usize) {
        let Some(inner) = &self.inner else {
            return;
        };
        let mut inner = inner.lock();
        if depth >= inner.by_depth.len() {
            return;
        }

        let inserted = {
            let bucket = &mut inner.by_depth[depth];
            let new_key = bucket.peek(&stable_id).is_none();
            bucket.insert(stable_id, record_id);
            new_key
        };
        if inserted {
            inner.size += 1;
            inner.evict();
        }
    }

    /// Number of cached nodes.
    pub fn len(&self) -> usize {
        self.inner
            .as_ref()
            .map(|inner| inner.lock().size)
            .unwrap_or_default()
    }

    /// Whether the cache holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The write-side caches of one record writer.
#[derive(Debug)]
pub struct WriterCacheManager {
    strings: RecordCache<String>,
    templates: RecordCache<Template<RecordId>>,
    nodes: NodeCache,
}

impl WriterCacheManager {
    /// Create new instance with the given cache sizes.
    pub fn new(options: WriterCacheOptions) -> Self {
        Self {
            strings: RecordCache::new(options.strings_cache_size),
            templates: RecordCache::new(options.templates_cache_size),
            nodes: NodeCache::new(options.node_cache_size, options.node_cache_depth),
        }
    }

    /// Cache of recently written strings
    pub fn strings(&self) -> &RecordCache<String> {
        &self.strings
    }

    /// Cache of recently written templates
    pub fn templates(&self) -> &RecordCache<Template<RecordId>> {
        &self.templates
    }

    /// Cache of recently written node records
    pub fn nodes(&self) -> &NodeCache {
        &self.nodes
    }
}
