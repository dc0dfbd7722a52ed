//! The store boundary and the error kinds it surfaces.
//!
//! [`SegmentStore`] is the contract between the record layer and whatever container persists
//! segments (an on-disk archive, an in-memory map, a remote). Implementations differ only below
//! this seam; the reader, cache and writer pool never observe the difference.

use crate::id::{SegmentId, SegmentTracker};
use crate::segment::Segment;
use canopy_segment::record::RecordNumber;
use canopy_segment::{RecordFormatError, SegmentFormatError};
use rand::rngs::SysError;
use std::sync::Arc;
use std::{fmt, io};

/// A segment id has no corresponding segment in the store.
///
/// Carries the gc info composed from the id's age, reclamation reason and generation. Never
/// retried; surfaced to the caller unchanged.
#[derive(Debug, thiserror::Error)]
#[error("Segment {msb:016x}{lsb:016x} not found: {gc_info}")]
pub struct SegmentNotFoundError {
    /// Most significant half of the segment id
    pub msb: u64,
    /// Least significant half of the segment id
    pub lsb: u64,
    /// Diagnostic composed from the id's age, reclamation reason and generation
    pub gc_info: String,
}

impl SegmentNotFoundError {
    /// Create new instance for `id`, composing the gc info from the id's state.
    pub fn for_id(id: &SegmentId) -> Self {
        Self {
            msb: id.msb(),
            lsb: id.lsb(),
            gc_info: id.gc_info(),
        }
    }
}

/// Errors that happen while reading segments and records.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// Segment not found in the store
    #[error(transparent)]
    SegmentNotFound(#[from] SegmentNotFoundError),
    /// Segment bytes do not form a valid segment
    #[error("Segment format error: {error}")]
    Format {
        /// Low-level error
        #[from]
        error: SegmentFormatError,
    },
    /// Record bytes do not form a valid encoding
    #[error("Record format error: {error}")]
    Record {
        /// Low-level error
        #[from]
        error: RecordFormatError,
    },
    /// Access outside a record's declared extent, or to a record that does not exist
    #[error(
        "Bad record {record_number} in segment {segment}: {length} bytes at offset {offset}"
    )]
    BadRecord {
        /// Segment the record was addressed in
        segment: String,
        /// Record number
        record_number: RecordNumber,
        /// Offset of the access within the record
        offset: usize,
        /// Length of the access
        length: usize,
    },
    /// String value exceeds the supported maximum of `i32::MAX` bytes
    #[error("String of {length} bytes exceeds the supported maximum")]
    StringTooLong {
        /// Declared string length
        length: u64,
    },
    /// Value record holds bytes that are not valid UTF-8
    #[error("Value record is not valid UTF-8")]
    InvalidUtf8,
    /// Store I/O failure
    #[error("Store read error: {error}")]
    Io {
        /// Low-level error
        #[from]
        error: io::Error,
    },
}

/// Errors that happen while writing segments and records.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// A single record is too large to fit an empty segment
    #[error("Record of {size} bytes cannot fit a segment of {max_segment_size} bytes")]
    RecordTooLarge {
        /// Total record size, including its record id slots
        size: usize,
        /// Maximum segment size the writer was configured with
        max_segment_size: usize,
    },
    /// A single record references more segments than the reference table can hold
    #[error("Record references {count} segments, more than the reference table can hold")]
    TooManyReferences {
        /// Number of distinct referenced segments
        count: usize,
    },
    /// String value exceeds the supported maximum of `i32::MAX` bytes
    #[error("String of {length} bytes exceeds the supported maximum")]
    StringTooLong {
        /// String length
        length: usize,
    },
    /// Template is not encodable
    #[error("Record format error: {error}")]
    Record {
        /// Low-level error
        #[from]
        error: RecordFormatError,
    },
    /// Failed to mint a fresh segment id
    #[error("Failed to generate segment id: {error}")]
    FailedToGenerateSegmentId {
        /// Low-level error
        #[from]
        error: SysError,
    },
    /// A segment written to the store did not read back as a valid segment
    #[error("Segment format error: {error}")]
    Format {
        /// Low-level error
        #[from]
        error: SegmentFormatError,
    },
    /// Store I/O failure
    #[error("Store write error: {error}")]
    Io {
        /// Low-level error
        #[from]
        error: io::Error,
    },
}

/// Boundary contract between the record layer and the segment container.
///
/// `write_segment` is durable on return. `read_segment` is expected to consult the segment
/// cache; loading a missing segment surfaces [`SegmentNotFoundError`].
pub trait SegmentStore: fmt::Debug + Send + Sync + 'static {
    /// Whether the store holds a segment for `id`.
    fn contains_segment(&self, id: &SegmentId) -> bool;

    /// Read the segment identified by `id`, loading it into the cache on a miss.
    fn read_segment(&self, id: &Arc<SegmentId>) -> Result<Arc<Segment>, ReadError>;

    /// Durably persist `data` as the segment identified by `id`.
    fn write_segment(&self, id: &Arc<SegmentId>, data: &[u8]) -> Result<(), WriteError>;

    /// The id interning table of this store.
    fn tracker(&self) -> &SegmentTracker;
}
