//! On-wire layout of a data segment.
//!
//! A data segment is laid out front to back as an 8-byte magic/version field, a 4-byte
//! generation tag, two 2-byte table sizes, the reference table, the record table and the
//! payload. Record offsets are measured from the segment *end* to the start of the record;
//! records are appended back to front, so record number 0 sits nearest the end and offsets grow
//! with record numbers. Bulk segments have none of this structure.

#[cfg(test)]
mod tests;

use crate::SegmentFormatError;
use crate::record::{RecordNumber, RecordType};
use alloc::vec::Vec;
use derive_more::{Display, From, Into};

/// Magic bytes opening every data segment, followed by the format version byte.
pub const SEGMENT_MAGIC: [u8; 7] = [0x43, 0x53, 0x45, 0x47, 0x0D, 0x0A, 0x1A];

/// Current segment format version.
pub const SEGMENT_FORMAT_VERSION: u8 = 1;

/// Size of the fixed segment header in bytes.
pub const SEGMENT_HEADER_BYTES: usize = 16;

/// Size of a reference-table entry in bytes.
pub const SEGMENT_REFERENCE_BYTES: usize = 16;

/// Size of a record-table entry in bytes.
pub const RECORD_TABLE_ENTRY_BYTES: usize = 9;

/// Garbage-collection generation tag.
///
/// Every segment records the generation of the compaction cycle that wrote it; the writer pool
/// uses the tag to retire writers of stale generations.
#[derive(
    Debug, Display, Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, From, Into,
)]
#[repr(transparent)]
pub struct Generation(u32);

impl Generation {
    /// Create new instance
    #[inline]
    pub const fn new(generation: u32) -> Self {
        Self(generation)
    }

    /// Generation as `u32`
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// The generation following this one
    #[inline]
    pub const fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// Fixed header of a data segment.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SegmentHeader {
    /// Generation of the compaction cycle that wrote the segment
    pub generation: Generation,
    /// Number of entries in the reference table
    pub reference_count: u16,
    /// Number of entries in the record table
    pub record_count: u16,
}

impl SegmentHeader {
    /// Decode the header from the start of a segment.
    pub fn read(bytes: &[u8]) -> Result<Self, SegmentFormatError> {
        let raw = bytes
            .get(..SEGMENT_HEADER_BYTES)
            .ok_or(SegmentFormatError::Truncated {
                length: bytes.len(),
                expected: SEGMENT_HEADER_BYTES,
            })?;

        if raw[..SEGMENT_MAGIC.len()] != SEGMENT_MAGIC {
            return Err(SegmentFormatError::InvalidMagic);
        }
        let version = raw[SEGMENT_MAGIC.len()];
        if version != SEGMENT_FORMAT_VERSION {
            return Err(SegmentFormatError::UnsupportedVersion { version });
        }

        Ok(Self {
            generation: Generation::new(u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]])),
            reference_count: u16::from_be_bytes([raw[12], raw[13]]),
            record_count: u16::from_be_bytes([raw[14], raw[15]]),
        })
    }

    /// Append the header encoding to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&SEGMENT_MAGIC);
        out.push(SEGMENT_FORMAT_VERSION);
        out.extend_from_slice(&self.generation.as_u32().to_be_bytes());
        out.extend_from_slice(&self.reference_count.to_be_bytes());
        out.extend_from_slice(&self.record_count.to_be_bytes());
    }

    /// Total size of the header and both tables this header declares.
    #[inline]
    pub const fn metadata_size(&self) -> usize {
        SEGMENT_HEADER_BYTES
            + self.reference_count as usize * SEGMENT_REFERENCE_BYTES
            + self.record_count as usize * RECORD_TABLE_ENTRY_BYTES
    }
}

/// Decode reference-table entry `index` of a segment.
///
/// Entries are `(msb, lsb)` pairs of the referent segment identifiers, big-endian.
pub fn read_reference(bytes: &[u8], index: usize) -> Result<(u64, u64), SegmentFormatError> {
    let start = SEGMENT_HEADER_BYTES + index * SEGMENT_REFERENCE_BYTES;
    let raw = bytes
        .get(start..start + SEGMENT_REFERENCE_BYTES)
        .ok_or(SegmentFormatError::Truncated {
            length: bytes.len(),
            expected: start + SEGMENT_REFERENCE_BYTES,
        })?;

    let msb = u64::from_be_bytes(raw[..8].try_into().expect("Slice of exactly 8 bytes; qed"));
    let lsb = u64::from_be_bytes(raw[8..].try_into().expect("Slice of exactly 8 bytes; qed"));
    Ok((msb, lsb))
}

/// Append a reference-table entry to `out`.
pub fn write_reference(msb: u64, lsb: u64, out: &mut Vec<u8>) {
    out.extend_from_slice(&msb.to_be_bytes());
    out.extend_from_slice(&lsb.to_be_bytes());
}

/// Entry of the record table, mapping a record number to its type and location.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RecordTableEntry {
    /// Record number
    pub number: RecordNumber,
    /// Record type
    pub record_type: RecordType,
    /// Offset from the segment end to the start of the record
    pub offset: u32,
}

impl RecordTableEntry {
    /// Decode record-table entry `index` of a segment whose header declares `reference_count`
    /// references.
    pub fn read(
        bytes: &[u8],
        reference_count: u16,
        index: usize,
    ) -> Result<Self, SegmentFormatError> {
        let start = SEGMENT_HEADER_BYTES
            + usize::from(reference_count) * SEGMENT_REFERENCE_BYTES
            + index * RECORD_TABLE_ENTRY_BYTES;
        let raw = bytes
            .get(start..start + RECORD_TABLE_ENTRY_BYTES)
            .ok_or(SegmentFormatError::Truncated {
                length: bytes.len(),
                expected: start + RECORD_TABLE_ENTRY_BYTES,
            })?;

        Ok(Self {
            number: RecordNumber::new(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
            record_type: RecordType::try_from(raw[4])?,
            offset: u32::from_be_bytes([raw[5], raw[6], raw[7], raw[8]]),
        })
    }

    /// Append the entry encoding to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.number.as_u32().to_be_bytes());
        out.push(self.record_type as u8);
        out.extend_from_slice(&self.offset.to_be_bytes());
    }
}
