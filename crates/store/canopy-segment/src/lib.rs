//! Segment record format primitives.
//!
//! A *segment* is a fixed-size, immutable byte container and the atomic unit of I/O of the
//! segment storage engine. Segments come in two flavors, distinguished by the top nibble of the
//! low half of their 128-bit identifier: *data segments* (`0xA`) carry a structured header, a
//! reference table, a record table and a payload of variable-length *records*; *bulk segments*
//! (`0xB`) are opaque bytes with no outbound references.
//!
//! This crate defines the bit-exact wire encodings shared by readers and writers:
//!
//! * variable-length [`length`] markers (small/medium/long) used by strings and inline values,
//! * 6-byte [`record_id`] references indirected through the enclosing segment's reference table,
//! * [`blob_id`] encodings for external binary identifiers,
//! * [`template`] records describing the shape of a node,
//! * the data segment [`layout`] itself (header, reference table, record table).
//!
//! Everything here is pure: no I/O, no logging, no retries. Encodings that cannot occur in a
//! valid segment surface as [`RecordFormatError`] or [`SegmentFormatError`] and are never
//! produced by a healthy writer.

#![no_std]

extern crate alloc;

pub mod blob_id;
pub mod layout;
pub mod length;
pub mod record;
pub mod record_id;
pub mod template;

/// Errors produced when decoding or encoding individual records.
///
/// A healthy reader operating on segments produced by this crate's writers never observes any of
/// these; they indicate either corruption or a logic error in the caller.
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum RecordFormatError {
    /// Length marker byte has a bit pattern that no valid encoding produces
    #[error("Invalid length marker byte {marker:#04x}")]
    InvalidLengthMarker {
        /// The offending marker byte
        marker: u8,
    },
    /// Length does not fit any encoding form
    #[error("Length {length} does not fit any encoding form")]
    InvalidLength {
        /// The offending length
        length: u64,
    },
    /// Blob id marker byte has a bit pattern that no valid encoding produces
    #[error("Invalid blob id marker byte {marker:#04x}")]
    InvalidBlobIdMarker {
        /// The offending marker byte
        marker: u8,
    },
    /// Blob id is too long for the inline encoding
    #[error("Blob id of {length} bytes is too long for the inline encoding")]
    BlobIdTooLong {
        /// Length of the binary identifier
        length: usize,
    },
    /// Record type byte is not a known record type
    #[error("Unknown record type {value:#04x}")]
    UnknownRecordType {
        /// The offending type byte
        value: u8,
    },
    /// Template header carries an impossible combination of child-node bits
    #[error("Invalid template header {header:#010x}")]
    InvalidTemplateHeader {
        /// The offending 32-bit header
        header: u32,
    },
    /// Template mixin count exceeds the 10-bit field
    #[error("Template mixin count {count} exceeds the maximum of 1023")]
    TooManyMixins {
        /// Requested mixin count
        count: usize,
    },
    /// Template property count exceeds the 18-bit field
    #[error("Template property count {count} exceeds the maximum of 262143")]
    TooManyProperties {
        /// Requested property count
        count: usize,
    },
    /// Template has properties without a property-name list, or the other way around
    #[error("Template property names and property types do not agree")]
    InconsistentTemplate,
    /// Input ended before the encoding was complete
    #[error("Unexpected end of record after {offset} bytes")]
    UnexpectedEnd {
        /// Offset at which more input was required
        offset: usize,
    },
}

/// Errors produced when decoding the fixed layout of a data segment.
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum SegmentFormatError {
    /// Segment does not start with the magic bytes
    #[error("Invalid segment magic")]
    InvalidMagic,
    /// Segment format version is not supported
    #[error("Unsupported segment format version {version}")]
    UnsupportedVersion {
        /// Version byte found in the header
        version: u8,
    },
    /// Segment is too short for its declared tables
    #[error("Segment of {length} bytes is truncated, {expected} bytes required")]
    Truncated {
        /// Actual segment length
        length: usize,
        /// Minimum length implied by the header
        expected: usize,
    },
    /// Record table entry carries an unknown record type
    #[error(transparent)]
    Record(#[from] RecordFormatError),
    /// Record table offsets or numbers are not strictly increasing
    #[error("Record table is not strictly ordered at entry {index}")]
    UnorderedRecordTable {
        /// Index of the first out-of-order entry
        index: usize,
    },
    /// Record table offset points outside the segment payload
    #[error("Record offset {offset} exceeds the payload of {payload} bytes")]
    RecordOffsetOutOfBounds {
        /// Offending offset, measured from the segment end
        offset: u32,
        /// Payload size in bytes
        payload: usize,
    },
}

/// Whether `lsb` is the low half of a data segment identifier.
#[inline]
pub const fn is_data_segment_id(lsb: u64) -> bool {
    (lsb >> 60) == 0xA
}

/// Whether `lsb` is the low half of a bulk segment identifier.
#[inline]
pub const fn is_bulk_segment_id(lsb: u64) -> bool {
    (lsb >> 60) == 0xB
}
