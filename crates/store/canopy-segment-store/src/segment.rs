//! Loaded segments and in-segment record reads.
//!
//! A [`Segment`] is the parsed, immutable form of a segment loaded from the store or just
//! written by a buffered writer. Data segments expose typed reads addressed by
//! `(record number, offset)`; every read is bounded by the record's declared extent as derived
//! from the record table, and any access past it is a [`ReadError::BadRecord`]. Bulk segments
//! are opaque and expose only their raw bytes.

#[cfg(test)]
mod tests;

use crate::id::{RecordId, SegmentId, SegmentTracker};
use crate::store::ReadError;
use canopy_segment::layout::{Generation, RecordTableEntry, SegmentHeader, read_reference};
use canopy_segment::length::{self, LengthForm};
use canopy_segment::record::RecordNumber;
use canopy_segment::record_id::{RECORD_ID_BYTES, RawRecordId, SELF_REFERENCE_INDEX};
use canopy_segment::template::Template;
use canopy_segment::{SegmentFormatError, is_bulk_segment_id};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A value record, either inline or a descriptor of an out-of-line payload.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ValueRef<'a> {
    /// Payload stored in place
    Inline(&'a [u8]),
    /// Payload stored out-of-line as a list of block records
    External {
        /// Total payload length in bytes
        length: u64,
        /// List record enumerating the payload's blocks
        list: RecordId,
    },
}

struct DataSegmentInfo {
    header: SegmentHeader,
    /// Referent segment ids, indexed by `reference_index - 1`
    references: Vec<Arc<SegmentId>>,
    /// Record table, ordered by record number and offset alike
    records: Vec<RecordTableEntry>,
}

enum SegmentInfo {
    Data(DataSegmentInfo),
    Bulk,
}

/// An immutable, loaded segment.
pub struct Segment {
    id: Arc<SegmentId>,
    data: Arc<[u8]>,
    /// Set on 1st-level cache hits, consulted and cleared by cache eviction
    accessed: AtomicBool,
    info: SegmentInfo,
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("size", &self.data.len())
            .field("bulk", &matches!(self.info, SegmentInfo::Bulk))
            .finish_non_exhaustive()
    }
}

impl Segment {
    /// Parse segment bytes loaded for `id`.
    ///
    /// Data segments are validated (magic, version, table bounds, strict record ordering) and
    /// their reference table resolved through `tracker`; the id's generation tag is filled from
    /// the header. Bulk segments are taken as-is.
    pub fn parse(
        id: Arc<SegmentId>,
        data: Arc<[u8]>,
        tracker: &SegmentTracker,
    ) -> Result<Self, SegmentFormatError> {
        if is_bulk_segment_id(id.lsb()) {
            return Ok(Self {
                id,
                data,
                accessed: AtomicBool::new(false),
                info: SegmentInfo::Bulk,
            });
        }

        let header = SegmentHeader::read(&data)?;
        let metadata_size = header.metadata_size();
        if data.len() < metadata_size {
            return Err(SegmentFormatError::Truncated {
                length: data.len(),
                expected: metadata_size,
            });
        }
        let payload = data.len() - metadata_size;

        let references = (0..usize::from(header.reference_count))
            .map(|index| {
                let (msb, lsb) = read_reference(&data, index)?;
                Ok(tracker.intern(msb, lsb))
            })
            .collect::<Result<Vec<_>, SegmentFormatError>>()?;

        let mut records: Vec<RecordTableEntry> =
            Vec::with_capacity(usize::from(header.record_count));
        for index in 0..usize::from(header.record_count) {
            let entry = RecordTableEntry::read(&data, header.reference_count, index)?;
            if let Some(previous) = records.last()
                && (entry.number <= previous.number || entry.offset <= previous.offset)
            {
                return Err(SegmentFormatError::UnorderedRecordTable { index });
            }
            if entry.offset as usize > payload {
                return Err(SegmentFormatError::RecordOffsetOutOfBounds {
                    offset: entry.offset,
                    payload,
                });
            }
            records.push(entry);
        }

        id.set_generation(header.generation);

        Ok(Self {
            id,
            data,
            accessed: AtomicBool::new(false),
            info: SegmentInfo::Data(DataSegmentInfo {
                header,
                references,
                records,
            }),
        })
    }

    /// Identity of this segment
    #[inline]
    pub fn id(&self) -> &Arc<SegmentId> {
        &self.id
    }

    /// Raw segment bytes
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Segment size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Generation tag of a data segment
    pub fn generation(&self) -> Option<Generation> {
        match &self.info {
            SegmentInfo::Data(info) => Some(info.header.generation),
            SegmentInfo::Bulk => None,
        }
    }

    /// Number of records in the segment
    pub fn record_count(&self) -> usize {
        match &self.info {
            SegmentInfo::Data(info) => info.records.len(),
            SegmentInfo::Bulk => 0,
        }
    }

    /// Set the access bit; 1st-level cache hits call this to keep the segment warm.
    #[inline]
    pub fn mark_accessed(&self) {
        self.accessed.store(true, Ordering::Relaxed);
    }

    /// Clear and return the access bit; cache eviction uses this for a second chance.
    #[inline]
    pub(crate) fn take_accessed(&self) -> bool {
        self.accessed.swap(false, Ordering::Relaxed)
    }

    fn data_info(&self, record_number: RecordNumber) -> Result<&DataSegmentInfo, ReadError> {
        match &self.info {
            SegmentInfo::Data(info) => Ok(info),
            SegmentInfo::Bulk => Err(self.bad_record(record_number, 0, 0)),
        }
    }

    fn bad_record(&self, record_number: RecordNumber, offset: usize, length: usize) -> ReadError {
        ReadError::BadRecord {
            segment: self.id.to_string(),
            record_number,
            offset,
            length,
        }
    }

    /// The extent of `record_number` within the segment bytes.
    ///
    /// A record runs from its own start to the start of the preceding record; record 0 extends
    /// to the segment end.
    fn extent(&self, record_number: RecordNumber) -> Result<(usize, usize), ReadError> {
        let info = self.data_info(record_number)?;
        let index = info
            .records
            .binary_search_by_key(&record_number, |entry| entry.number)
            .map_err(|_| self.bad_record(record_number, 0, 0))?;

        let start = self.data.len() - info.records[index].offset as usize;
        let end = match index.checked_sub(1) {
            Some(previous) => self.data.len() - info.records[previous].offset as usize,
            None => self.data.len(),
        };
        Ok((start, end))
    }

    /// Size of `record_number`'s declared extent in bytes.
    pub fn record_size(&self, record_number: RecordNumber) -> Result<usize, ReadError> {
        let (start, end) = self.extent(record_number)?;
        Ok(end - start)
    }

    /// Read `length` bytes at `offset` within `record_number`.
    pub fn read_bytes(
        &self,
        record_number: RecordNumber,
        offset: usize,
        length: usize,
    ) -> Result<&[u8], ReadError> {
        let (start, end) = self.extent(record_number)?;
        let size = end - start;
        if length > size || offset > size - length {
            return Err(self.bad_record(record_number, offset, length));
        }
        Ok(&self.data[start + offset..start + offset + length])
    }

    /// Read a byte at `offset` within `record_number`.
    pub fn read_u8(&self, record_number: RecordNumber, offset: usize) -> Result<u8, ReadError> {
        Ok(self.read_bytes(record_number, offset, 1)?[0])
    }

    /// Read a big-endian `u16` at `offset` within `record_number`.
    pub fn read_u16(&self, record_number: RecordNumber, offset: usize) -> Result<u16, ReadError> {
        let raw = self.read_bytes(record_number, offset, 2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    /// Read a big-endian `u32` at `offset` within `record_number`.
    pub fn read_u32(&self, record_number: RecordNumber, offset: usize) -> Result<u32, ReadError> {
        let raw = self.read_bytes(record_number, offset, 4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Read a big-endian `u64` at `offset` within `record_number`.
    pub fn read_u64(&self, record_number: RecordNumber, offset: usize) -> Result<u64, ReadError> {
        let raw = self.read_bytes(record_number, offset, 8)?;
        Ok(u64::from_be_bytes(
            raw.try_into().expect("Slice of exactly 8 bytes; qed"),
        ))
    }

    /// Resolve a reference-table index to the referent segment id.
    ///
    /// Index 0 is the segment itself.
    pub fn resolve_reference(
        &self,
        reference_index: u16,
        record_number: RecordNumber,
    ) -> Result<Arc<SegmentId>, ReadError> {
        if reference_index == SELF_REFERENCE_INDEX {
            return Ok(Arc::clone(&self.id));
        }
        let info = self.data_info(record_number)?;
        info.references
            .get(usize::from(reference_index) - 1)
            .cloned()
            .ok_or_else(|| self.bad_record(record_number, 0, RECORD_ID_BYTES))
    }

    /// Read a record id at `offset` within `record_number` and resolve its referent.
    pub fn read_record_id(
        &self,
        record_number: RecordNumber,
        offset: usize,
    ) -> Result<RecordId, ReadError> {
        let raw = RawRecordId::from_bytes(self.read_bytes(record_number, offset, RECORD_ID_BYTES)?)?;
        let segment_id = self.resolve_reference(raw.reference_index, record_number)?;
        Ok(RecordId::new(segment_id, raw.record_number))
    }

    /// Read a length at `offset` within `record_number`.
    pub fn read_length(
        &self,
        record_number: RecordNumber,
        offset: usize,
    ) -> Result<(u64, LengthForm), ReadError> {
        let (start, end) = self.extent(record_number)?;
        if offset >= end - start {
            return Err(self.bad_record(record_number, offset, 1));
        }
        let (value, form) = length::read(&self.data[start + offset..end])?;
        Ok((value, form))
    }

    /// Read a value record at `offset` within `record_number`.
    ///
    /// Small and medium values are inline; long values return a descriptor pointing at the
    /// block list holding the payload.
    pub fn read_value(
        &self,
        record_number: RecordNumber,
        offset: usize,
    ) -> Result<ValueRef<'_>, ReadError> {
        let (value_length, form) = self.read_length(record_number, offset)?;

        match form {
            LengthForm::Small | LengthForm::Medium => {
                let bytes = self.read_bytes(
                    record_number,
                    offset + form.encoded_size(),
                    usize::try_from(value_length).expect("Inline lengths fit usize; qed"),
                )?;
                Ok(ValueRef::Inline(bytes))
            }
            LengthForm::Long => {
                let list = self.read_record_id(record_number, offset + form.encoded_size())?;
                Ok(ValueRef::External {
                    length: value_length,
                    list,
                })
            }
        }
    }

    /// Read a template record at `offset` within `record_number`.
    pub fn read_template(
        &self,
        record_number: RecordNumber,
        offset: usize,
    ) -> Result<Template<RecordId>, ReadError> {
        let (start, end) = self.extent(record_number)?;
        if offset >= end - start {
            return Err(self.bad_record(record_number, offset, 4));
        }
        let (template, _consumed) = Template::read(&self.data[start + offset..end])?;
        template.try_map(|raw| {
            let segment_id = self.resolve_reference(raw.reference_index, record_number)?;
            Ok(RecordId::new(segment_id, raw.record_number))
        })
    }
}
