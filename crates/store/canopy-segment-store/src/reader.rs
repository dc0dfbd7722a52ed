//! Cross-segment record reads.
//!
//! [`Segment`] reads stop at segment boundaries; a [`SegmentReader`] follows record ids across
//! them. It resolves segments through the 1st- and 2nd-level caches, materializes strings
//! (walking the block list of out-of-line values) and decodes blob ids, templates and lists
//! wherever their referents live.


use crate::id::RecordId;
use crate::segment::{Segment, ValueRef};
use crate::store::{ReadError, SegmentStore};
use canopy_segment::blob_id::{self, BlobIdRef};
use canopy_segment::record_id::RECORD_ID_BYTES;
use canopy_segment::template::Template;
use std::sync::Arc;

/// Number of entries a list bucket holds.
pub(crate) const LIST_BUCKET_SIZE: u64 = 255;

/// Strings of `2^31` bytes or more are not supported.
const MAX_STRING_LENGTH: u64 = 1 << 31;

/// Typed reads of records resolved through the store.
#[derive(Debug)]
pub struct SegmentReader<S> {
    store: Arc<S>,
}

impl<S> Clone for SegmentReader<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> SegmentReader<S>
where
    S: SegmentStore,
{
    /// Create new instance reading through `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    fn segment(&self, record_id: &RecordId) -> Result<Arc<Segment>, ReadError> {
        record_id.segment_id().segment(&*self.store)
    }

    /// Read a byte at `offset` within the record.
    pub fn read_u8(&self, record_id: &RecordId, offset: usize) -> Result<u8, ReadError> {
        self.segment(record_id)?
            .read_u8(record_id.record_number(), offset)
    }

    /// Read a big-endian `u16` at `offset` within the record.
    pub fn read_u16(&self, record_id: &RecordId, offset: usize) -> Result<u16, ReadError> {
        self.segment(record_id)?
            .read_u16(record_id.record_number(), offset)
    }

    /// Read a big-endian `u32` at `offset` within the record.
    pub fn read_u32(&self, record_id: &RecordId, offset: usize) -> Result<u32, ReadError> {
        self.segment(record_id)?
            .read_u32(record_id.record_number(), offset)
    }

    /// Read a big-endian `u64` at `offset` within the record.
    pub fn read_u64(&self, record_id: &RecordId, offset: usize) -> Result<u64, ReadError> {
        self.segment(record_id)?
            .read_u64(record_id.record_number(), offset)
    }

    /// Read `length` bytes at `offset` within the record.
    pub fn read_bytes(
        &self,
        record_id: &RecordId,
        offset: usize,
        length: usize,
    ) -> Result<Vec<u8>, ReadError> {
        Ok(self
            .segment(record_id)?
            .read_bytes(record_id.record_number(), offset, length)?
            .to_vec())
    }

    /// Read a record id at `offset` within the record.
    pub fn read_record_id(
        &self,
        record_id: &RecordId,
        offset: usize,
    ) -> Result<RecordId, ReadError> {
        self.segment(record_id)?
            .read_record_id(record_id.record_number(), offset)
    }

    /// Read a length at `offset` within the record.
    pub fn read_length(&self, record_id: &RecordId, offset: usize) -> Result<u64, ReadError> {
        Ok(self
            .segment(record_id)?
            .read_length(record_id.record_number(), offset)?
            .0)
    }

    /// Materialize the value record as raw bytes, following out-of-line payloads.
    pub fn read_value(&self, record_id: &RecordId) -> Result<Vec<u8>, ReadError> {
        let segment = self.segment(record_id)?;
        match segment.read_value(record_id.record_number(), 0)? {
            ValueRef::Inline(bytes) => Ok(bytes.to_vec()),
            ValueRef::External { length, list } => {
                if length >= MAX_STRING_LENGTH {
                    return Err(ReadError::StringTooLong { length });
                }
                drop(segment);

                let blocks = self.read_list(&list)?;
                let length = usize::try_from(length)
                    .expect("Checked against MAX_STRING_LENGTH above; qed");
                let mut value = Vec::with_capacity(length);
                for block in &blocks {
                    let block_segment = self.segment(block)?;
                    let block_size = block_segment.record_size(block.record_number())?;
                    let take = block_size.min(length - value.len());
                    value.extend_from_slice(block_segment.read_bytes(
                        block.record_number(),
                        0,
                        take,
                    )?);
                    if value.len() == length {
                        break;
                    }
                }

                if value.len() != length {
                    return Err(ReadError::BadRecord {
                        segment: list.segment_id().to_string(),
                        record_number: list.record_number(),
                        offset: 0,
                        length,
                    });
                }
                Ok(value)
            }
        }
    }

    /// Materialize the value record as a string.
    pub fn read_string(&self, record_id: &RecordId) -> Result<String, ReadError> {
        String::from_utf8(self.read_value(record_id)?).map_err(|_error| ReadError::InvalidUtf8)
    }

    /// Read the blob id record, materializing an out-of-line identifier if needed.
    pub fn read_blob_id(&self, record_id: &RecordId) -> Result<Vec<u8>, ReadError> {
        let segment = self.segment(record_id)?;
        let number = record_id.record_number();
        let size = segment.record_size(number)?;
        let bytes = segment.read_bytes(number, 0, size)?;

        match blob_id::read(bytes)?.0 {
            BlobIdRef::Inline(id_bytes) => Ok(id_bytes.to_vec()),
            BlobIdRef::External(raw) => {
                let referent_segment = segment.resolve_reference(raw.reference_index, number)?;
                let value_id = RecordId::new(referent_segment, raw.record_number);
                drop(segment);
                self.read_value(&value_id)
            }
        }
    }

    /// Read the template record.
    pub fn read_template(&self, record_id: &RecordId) -> Result<Template<RecordId>, ReadError> {
        self.segment(record_id)?
            .read_template(record_id.record_number(), 0)
    }

    /// Read the list record into its entries, expanding the bucket tree.
    pub fn read_list(&self, record_id: &RecordId) -> Result<Vec<RecordId>, ReadError> {
        let segment = self.segment(record_id)?;
        let number = record_id.record_number();
        let size = u64::from(segment.read_u32(number, 0)?);

        if size == 0 {
            return Ok(Vec::new());
        }
        if size == 1 {
            return Ok(vec![segment.read_record_id(number, 4)?]);
        }

        let root = segment.read_record_id(number, 4)?;
        drop(segment);

        // Coverage of each entry in the root bucket
        let mut coverage = 1;
        while coverage * LIST_BUCKET_SIZE < size {
            coverage *= LIST_BUCKET_SIZE;
        }

        let mut entries =
            Vec::with_capacity(usize::try_from(size).expect("List sizes fit usize; qed"));
        self.read_bucket(&root, size, coverage, &mut entries)?;
        Ok(entries)
    }

    fn read_bucket(
        &self,
        bucket_id: &RecordId,
        count: u64,
        coverage: u64,
        entries: &mut Vec<RecordId>,
    ) -> Result<(), ReadError> {
        let segment = self.segment(bucket_id)?;
        let number = bucket_id.record_number();
        let slots = count.div_ceil(coverage);

        let mut children = Vec::with_capacity(usize::try_from(slots).expect("At most 255; qed"));
        for slot in 0..slots {
            children.push(segment.read_record_id(
                number,
                usize::try_from(slot).expect("At most 255; qed") * RECORD_ID_BYTES,
            )?);
        }
        drop(segment);

        if coverage == 1 {
            entries.extend(children);
            return Ok(());
        }

        for (slot, child) in children.iter().enumerate() {
            let covered = (count - slot as u64 * coverage).min(coverage);
            self.read_bucket(child, covered, coverage / LIST_BUCKET_SIZE, entries)?;
        }
        Ok(())
    }
}
