//! Wire form of record identifiers.
//!
//! A record identifier names `(segment, record number)`. On the wire it is 6 bytes: a `u16`
//! index into the *enclosing* segment's reference table followed by the `u32` record number,
//! both big-endian. Index 0 denotes the enclosing segment itself; external referents occupy
//! indices `1..=reference_count`.

use crate::RecordFormatError;
use crate::record::RecordNumber;
use alloc::vec::Vec;

/// Size of a record identifier on the wire.
pub const RECORD_ID_BYTES: usize = 6;

/// Reference-table index of the enclosing segment itself.
pub const SELF_REFERENCE_INDEX: u16 = 0;

/// Record identifier as stored on the wire, before reference-table resolution.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RawRecordId {
    /// Index into the enclosing segment's reference table
    pub reference_index: u16,
    /// Number of the record within the referent segment
    pub record_number: RecordNumber,
}

impl RawRecordId {
    /// Create new instance
    #[inline]
    pub const fn new(reference_index: u16, record_number: RecordNumber) -> Self {
        Self {
            reference_index,
            record_number,
        }
    }

    /// Serialize into the 6-byte wire form.
    #[inline]
    pub fn to_bytes(self) -> [u8; RECORD_ID_BYTES] {
        let index = self.reference_index.to_be_bytes();
        let number = self.record_number.as_u32().to_be_bytes();
        [index[0], index[1], number[0], number[1], number[2], number[3]]
    }

    /// Deserialize from the start of `bytes`.
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordFormatError> {
        let raw = bytes
            .get(..RECORD_ID_BYTES)
            .ok_or(RecordFormatError::UnexpectedEnd {
                offset: bytes.len(),
            })?;
        Ok(Self {
            reference_index: u16::from_be_bytes([raw[0], raw[1]]),
            record_number: RecordNumber::new(u32::from_be_bytes([raw[2], raw[3], raw[4], raw[5]])),
        })
    }

    /// Append the 6-byte wire form to `out`.
    #[inline]
    pub fn write(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_bytes());
    }
}
