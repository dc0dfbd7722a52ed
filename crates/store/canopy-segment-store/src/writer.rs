//! Append-only construction of a single segment.
//!
//! A [`SegmentBufferWriter`] accumulates records into a fixed-size buffer. Records are placed
//! back to front: the payload grows downward from the buffer end, so record offsets, measured
//! from the segment end, are independent of how large the header and tables turn out to be.
//! On flush the header, the deduplicated reference table and the record table are emitted in
//! front of the payload and the whole segment is handed to the store; the buffer then restarts
//! under a freshly minted segment id.
//!
//! A writer is owned by one thread at a time and is not internally synchronized; the writer
//! pool enforces the affinity.

#[cfg(test)]
mod tests;

use crate::id::{RecordId, SegmentId};
use crate::store::{SegmentStore, WriteError};
use canopy_segment::layout::{
    Generation, RECORD_TABLE_ENTRY_BYTES, RecordTableEntry, SEGMENT_HEADER_BYTES,
    SEGMENT_REFERENCE_BYTES, SegmentHeader, write_reference,
};
use canopy_segment::record::{RecordNumber, RecordType};
use canopy_segment::record_id::{RECORD_ID_BYTES, RawRecordId, SELF_REFERENCE_INDEX};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default maximum segment size: 256 KiB.
pub const DEFAULT_MAX_SEGMENT_SIZE: usize = 256 * 1024;

/// Reference-table indices are `u16`, with index 0 reserved for the segment itself.
const MAX_SEGMENT_REFERENCES: usize = u16::MAX as usize;

/// Records per segment are bounded by the `u16` record count header field.
const MAX_SEGMENT_RECORDS: usize = u16::MAX as usize;

/// Source of unique writer instance numbers; pool bookkeeping relies on these, never on the
/// rolling writer ids.
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

/// Extent of the record currently being written.
#[derive(Debug, Copy, Clone)]
struct CurrentRecord {
    cursor: usize,
    end: usize,
}

/// Buffered writer for a single segment.
pub struct SegmentBufferWriter<S> {
    store: Arc<S>,
    writer_id: String,
    instance: u64,
    generation: Generation,
    max_segment_size: usize,
    buffer: Box<[u8]>,
    /// Start of the used payload within the buffer; grows downward
    position: usize,
    segment_id: Arc<SegmentId>,
    records: Vec<RecordTableEntry>,
    references: Vec<Arc<SegmentId>>,
    reference_indices: HashMap<u128, u16>,
    current: Option<CurrentRecord>,
    dirty: bool,
}

impl<S> fmt::Debug for SegmentBufferWriter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentBufferWriter")
            .field("writer_id", &self.writer_id)
            .field("generation", &self.generation)
            .field("segment_id", &self.segment_id)
            .field("records", &self.records.len())
            .finish_non_exhaustive()
    }
}

impl<S> SegmentBufferWriter<S>
where
    S: SegmentStore,
{
    /// Create new instance writing segments of at most `max_segment_size` bytes.
    pub fn new(
        store: Arc<S>,
        writer_id: String,
        generation: Generation,
        max_segment_size: usize,
    ) -> Result<Self, WriteError> {
        let segment_id = store.tracker().new_data_segment_id()?;

        Ok(Self {
            store,
            writer_id,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            generation,
            max_segment_size,
            buffer: vec![0; max_segment_size].into_boxed_slice(),
            position: max_segment_size,
            segment_id,
            records: Vec::new(),
            references: Vec::new(),
            reference_indices: HashMap::new(),
            current: None,
            dirty: false,
        })
    }

    /// Rolling writer id, `{pool}.{NNNN}`
    pub fn writer_id(&self) -> &str {
        &self.writer_id
    }

    /// Unique instance number of this writer
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Generation this writer was created in; fixed for the writer's lifetime
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Id of the segment currently under construction
    pub fn segment_id(&self) -> &Arc<SegmentId> {
        &self.segment_id
    }

    /// Whether the writer holds unflushed records
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of distinct segments the given ids would add to the reference table.
    fn new_reference_count(&self, referenced_ids: &[Arc<SegmentId>]) -> usize {
        let mut count = 0;
        for (index, id) in referenced_ids.iter().enumerate() {
            if id.full() == self.segment_id.full()
                || self.reference_indices.contains_key(&id.full())
            {
                continue;
            }
            // Duplicates within the same prepare call count once
            if referenced_ids[..index]
                .iter()
                .any(|previous| previous.full() == id.full())
            {
                continue;
            }
            count += 1;
        }
        count
    }

    /// Reserve a record of `size` payload bytes plus one record id slot per referenced id.
    ///
    /// If the record would overflow the segment by size, reference count or record count, the
    /// current segment is flushed first and the record starts a fresh one. Returns the record
    /// id under which the record will be addressable.
    pub fn prepare(
        &mut self,
        record_type: RecordType,
        size: usize,
        referenced_ids: &[Arc<SegmentId>],
    ) -> Result<RecordId, WriteError> {
        let record_size = size + referenced_ids.len() * RECORD_ID_BYTES;
        assert!(record_size > 0, "Empty record");

        loop {
            let reference_count = self.references.len() + self.new_reference_count(referenced_ids);
            let record_count = self.records.len() + 1;
            let metadata_size = SEGMENT_HEADER_BYTES
                + reference_count * SEGMENT_REFERENCE_BYTES
                + record_count * RECORD_TABLE_ENTRY_BYTES;
            let used_payload = self.max_segment_size - self.position;

            let fits = reference_count <= MAX_SEGMENT_REFERENCES
                && record_count <= MAX_SEGMENT_RECORDS
                && metadata_size + used_payload + record_size <= self.max_segment_size;
            if fits {
                break;
            }

            if !self.dirty {
                // The record alone does not fit an empty segment
                return if reference_count > MAX_SEGMENT_REFERENCES {
                    Err(WriteError::TooManyReferences {
                        count: referenced_ids.len(),
                    })
                } else {
                    Err(WriteError::RecordTooLarge {
                        size: record_size,
                        max_segment_size: self.max_segment_size,
                    })
                };
            }
            self.flush()?;
        }

        for id in referenced_ids {
            if id.full() == self.segment_id.full()
                || self.reference_indices.contains_key(&id.full())
            {
                continue;
            }
            self.references.push(Arc::clone(id));
            self.reference_indices
                .insert(id.full(), self.references.len() as u16);
        }

        let number = RecordNumber::new(self.records.len() as u32);
        let end = self.position;
        self.position -= record_size;
        self.records.push(RecordTableEntry {
            number,
            record_type,
            offset: (self.max_segment_size - self.position) as u32,
        });
        self.current = Some(CurrentRecord {
            cursor: self.position,
            end,
        });
        self.dirty = true;

        Ok(RecordId::new(Arc::clone(&self.segment_id), number))
    }

    fn current_record(&mut self) -> &mut CurrentRecord {
        self.current
            .as_mut()
            .expect("Writes only happen into a prepared record; qed")
    }

    /// Append `bytes` to the current record.
    ///
    /// Panics when the write exceeds the extent reserved by [`Self::prepare()`].
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let current = *self.current_record();
        assert!(
            bytes.len() <= current.end - current.cursor,
            "Write of {} bytes exceeds the prepared record extent",
            bytes.len()
        );
        self.buffer[current.cursor..current.cursor + bytes.len()].copy_from_slice(bytes);
        self.current_record().cursor += bytes.len();
    }

    /// Append a byte to the current record.
    pub fn write_u8(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    /// Append a big-endian `u16` to the current record.
    pub fn write_u16(&mut self, value: u16) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Append a big-endian `u32` to the current record.
    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Append a big-endian `u64` to the current record.
    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Append the 6-byte wire form of `record_id` to the current record.
    ///
    /// The referent must be the segment under construction or one of the ids declared in
    /// [`Self::prepare()`].
    pub fn write_record_id(&mut self, record_id: &RecordId) {
        let reference_index = if record_id.segment_id().full() == self.segment_id.full() {
            SELF_REFERENCE_INDEX
        } else {
            *self
                .reference_indices
                .get(&record_id.segment_id().full())
                .expect("Referenced segments are declared in prepare; qed")
        };
        let raw = RawRecordId::new(reference_index, record_id.record_number());
        self.write_bytes(&raw.to_bytes());
    }

    /// Emit the accumulated segment to the store and restart the buffer under a fresh segment
    /// id.
    ///
    /// A writer with no records is a no-op, which makes repeated flushes idempotent.
    pub fn flush(&mut self) -> Result<(), WriteError> {
        if !self.dirty {
            return Ok(());
        }

        let header = SegmentHeader {
            generation: self.generation,
            reference_count: self.references.len() as u16,
            record_count: self.records.len() as u16,
        };

        let mut out = Vec::with_capacity(
            header.metadata_size() + (self.max_segment_size - self.position),
        );
        header.write(&mut out);
        for id in &self.references {
            write_reference(id.msb(), id.lsb(), &mut out);
        }
        for entry in &self.records {
            entry.write(&mut out);
        }
        out.extend_from_slice(&self.buffer[self.position..]);

        let segment_id = Arc::clone(&self.segment_id);
        self.store.write_segment(&segment_id, &out)?;

        self.segment_id = self.store.tracker().new_data_segment_id()?;
        self.position = self.max_segment_size;
        self.records.clear();
        self.references.clear();
        self.reference_indices.clear();
        self.current = None;
        self.dirty = false;

        Ok(())
    }
}
