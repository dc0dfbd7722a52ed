//! Segment identifiers, interning and the 1st-level segment cache.
//!
//! A [`SegmentId`] is the identity of a segment: a 128-bit `(msb, lsb)` pair whose low-half top
//! nibble distinguishes data segments (`0xA`) from bulk segments (`0xB`). Ids are interned by
//! the store's [`SegmentTracker`], so exactly one instance exists per pair and identity
//! comparisons are cheap.
//!
//! Beyond identity, each id carries the *1st-level cache*: a volatile reference to the loaded
//! [`Segment`]. A hit here avoids the shared cache entirely; the reference is set on load and
//! cleared on eviction, and a dedicated load mutex serializes the double-checked slow path.


use crate::segment::Segment;
use crate::store::{ReadError, SegmentStore};
use canopy_segment::layout::Generation;
use canopy_segment::record::RecordNumber;
use canopy_segment::{is_bulk_segment_id, is_data_segment_id};
use parking_lot::{Mutex, RwLock};
use rand::TryRng;
use rand::rngs::{SysError, SysRng};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Write;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::error;

/// Identity of a segment.
///
/// Equality and hashing are structural on the 128 bits; interning through [`SegmentTracker`]
/// additionally makes instances unique per store, so `Arc` pointer identity agrees with
/// structural equality.
pub struct SegmentId {
    msb: u64,
    lsb: u64,
    /// When this id was first referenced in this process
    created: Instant,
    /// Generation tag, lazily filled on first load of the segment
    generation: OnceLock<Generation>,
    /// Explanation recorded when the segment was reclaimed by garbage collection
    reclamation_reason: Mutex<Option<String>>,
    /// 1st-level cache: the loaded segment, if any
    segment: RwLock<Option<Arc<Segment>>>,
    /// Serializes the load slow path without blocking 1st-level readers
    load_lock: Mutex<()>,
}

impl fmt::Debug for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegmentId({self})")
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.msb, self.lsb)
    }
}

impl PartialEq for SegmentId {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.msb == other.msb && self.lsb == other.lsb
    }
}

impl Eq for SegmentId {}

impl std::hash::Hash for SegmentId {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.full().hash(state);
    }
}

impl SegmentId {
    fn new(msb: u64, lsb: u64) -> Self {
        Self {
            msb,
            lsb,
            created: Instant::now(),
            generation: OnceLock::new(),
            reclamation_reason: Mutex::new(None),
            segment: RwLock::new(None),
            load_lock: Mutex::new(()),
        }
    }

    /// Most significant half of the id
    #[inline]
    pub const fn msb(&self) -> u64 {
        self.msb
    }

    /// Least significant half of the id
    #[inline]
    pub const fn lsb(&self) -> u64 {
        self.lsb
    }

    /// The id as a single 128-bit value
    #[inline]
    pub const fn full(&self) -> u128 {
        (self.msb as u128) << 64 | self.lsb as u128
    }

    /// Whether this id identifies a data segment
    #[inline]
    pub const fn is_data_segment(&self) -> bool {
        is_data_segment_id(self.lsb)
    }

    /// Whether this id identifies a bulk segment
    #[inline]
    pub const fn is_bulk_segment(&self) -> bool {
        is_bulk_segment_id(self.lsb)
    }

    /// Generation of the segment, if known yet.
    pub fn generation(&self) -> Option<Generation> {
        self.generation.get().copied()
    }

    /// Record the generation tag; only the first call has an effect.
    pub fn set_generation(&self, generation: Generation) {
        let _ = self.generation.set(generation);
    }

    /// Record why garbage collection reclaimed this segment.
    ///
    /// The reason becomes part of the gc info reported when the segment can no longer be found.
    pub fn reclaimed(&self, reason: impl Into<String>) {
        *self.reclamation_reason.lock() = Some(reason.into());
    }

    /// Reclamation reason, if the segment was reclaimed.
    pub fn reclamation_reason(&self) -> Option<String> {
        self.reclamation_reason.lock().clone()
    }

    /// The loaded segment from the 1st-level cache, if any.
    pub fn cached(&self) -> Option<Arc<Segment>> {
        self.segment.read().clone()
    }

    /// Set the 1st-level reference.
    ///
    /// Called by the segment cache *before* its own insert, so that an immediate eviction of the
    /// inserted entry still observes a consistent reference.
    pub(crate) fn loaded(&self, segment: &Arc<Segment>) {
        *self.segment.write() = Some(Arc::clone(segment));
    }

    /// Clear the 1st-level reference; called when the cache evicts the segment.
    ///
    /// A cleared reference may be repopulated by a subsequent load.
    pub(crate) fn unloaded(&self) {
        *self.segment.write() = None;
    }

    /// The mutex serializing the load slow path for this id.
    pub(crate) fn load_lock(&self) -> &Mutex<()> {
        &self.load_lock
    }

    /// Diagnostic string describing the id's age, reclamation state and generation.
    pub fn gc_info(&self) -> String {
        let mut info = format!("SegmentId age={}ms", self.created.elapsed().as_millis());
        if let Some(reason) = self.reclamation_reason() {
            write!(info, ",reclaim-reason={reason}").expect("Writing to String never fails; qed");
        }
        if let Some(generation) = self.generation() {
            write!(info, ",segment-generation={generation}")
                .expect("Writing to String never fails; qed");
        }
        info
    }

    /// Resolve the segment behind this id.
    ///
    /// The fast path serves the 1st-level reference and refreshes the segment's access bit; on a
    /// miss the store loads the segment (through the shared cache, under this id's load mutex).
    /// A missing segment is logged with the id's gc info and surfaced unchanged.
    pub fn segment<S>(self: &Arc<Self>, store: &S) -> Result<Arc<Segment>, ReadError>
    where
        S: SegmentStore + ?Sized,
    {
        if let Some(segment) = self.cached() {
            segment.mark_accessed();
            return Ok(segment);
        }

        store.read_segment(self).inspect_err(|read_error| {
            if let ReadError::SegmentNotFound(not_found) = read_error {
                error!(segment_id = %self, gc_info = %not_found.gc_info, "Segment not found");
            }
        })
    }
}

/// A record identifier: a segment id plus a record number within that segment.
#[derive(Debug, Clone)]
pub struct RecordId {
    segment_id: Arc<SegmentId>,
    record_number: RecordNumber,
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment_id, self.record_number)
    }
}

impl PartialEq for RecordId {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.record_number == other.record_number && self.segment_id == other.segment_id
    }
}

impl Eq for RecordId {}

impl std::hash::Hash for RecordId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.segment_id.hash(state);
        self.record_number.hash(state);
    }
}

impl RecordId {
    /// Create new instance
    #[inline]
    pub fn new(segment_id: Arc<SegmentId>, record_number: RecordNumber) -> Self {
        Self {
            segment_id,
            record_number,
        }
    }

    /// Segment the record lives in
    #[inline]
    pub fn segment_id(&self) -> &Arc<SegmentId> {
        &self.segment_id
    }

    /// Number of the record within its segment
    #[inline]
    pub fn record_number(&self) -> RecordNumber {
        self.record_number
    }
}

/// Interning table for segment ids.
///
/// Owned by the store; guarantees exactly one [`SegmentId`] instance per `(msb, lsb)` pair for
/// the store's lifetime, and mints fresh random ids with the correct type nibble for newly
/// written segments.
#[derive(Debug, Default)]
pub struct SegmentTracker {
    ids: RwLock<HashMap<u128, Arc<SegmentId>>>,
}

impl SegmentTracker {
    const DATA_NIBBLE: u64 = 0xA;
    const BULK_NIBBLE: u64 = 0xB;

    /// Create new instance
    pub fn new() -> Self {
        Self::default()
    }

    /// The unique id instance for `(msb, lsb)`.
    pub fn intern(&self, msb: u64, lsb: u64) -> Arc<SegmentId> {
        let key = (msb as u128) << 64 | lsb as u128;

        if let Some(id) = self.ids.read().get(&key) {
            return Arc::clone(id);
        }

        let mut ids = self.ids.write();
        Arc::clone(
            ids.entry(key)
                .or_insert_with(|| Arc::new(SegmentId::new(msb, lsb))),
        )
    }

    /// Mint a fresh data segment id.
    pub fn new_data_segment_id(&self) -> Result<Arc<SegmentId>, SysError> {
        self.new_segment_id(Self::DATA_NIBBLE)
    }

    /// Mint a fresh bulk segment id.
    pub fn new_bulk_segment_id(&self) -> Result<Arc<SegmentId>, SysError> {
        self.new_segment_id(Self::BULK_NIBBLE)
    }

    fn new_segment_id(&self, nibble: u64) -> Result<Arc<SegmentId>, SysError> {
        let mut bytes = [0u8; 16];
        SysRng.try_fill_bytes(&mut bytes)?;

        let msb = u64::from_be_bytes(bytes[..8].try_into().expect("Slice of 8 bytes; qed"));
        let lsb = u64::from_be_bytes(bytes[8..].try_into().expect("Slice of 8 bytes; qed"));
        let lsb = (lsb & 0x0FFF_FFFF_FFFF_FFFF) | (nibble << 60);

        Ok(self.intern(msb, lsb))
    }

    /// Number of ids interned so far.
    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    /// Whether no ids were interned yet.
    pub fn is_empty(&self) -> bool {
        self.ids.read().is_empty()
    }
}
