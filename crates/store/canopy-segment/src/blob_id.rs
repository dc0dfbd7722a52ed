//! Encodings for external binary identifiers.
//!
//! Binary values kept outside the segment store (in an external blob store) are referenced by an
//! opaque binary identifier. Two encodings exist:
//!
//! * small (identifier shorter than 4096 bytes): `1110LLLL LLLLLLLL`, a 12-bit big-endian
//!   length followed by the identifier bytes in place;
//! * long: the marker byte `11110000` followed by a 6-byte record id pointing to a value record
//!   holding the identifier bytes.

use crate::RecordFormatError;
use crate::record_id::{RECORD_ID_BYTES, RawRecordId};
use alloc::vec::Vec;

/// Exclusive upper bound on the length of an inline blob id.
pub const SMALL_BLOB_ID_LIMIT: usize = 1 << 12;

/// Marker byte of the long blob id form.
pub const LONG_BLOB_ID_MARKER: u8 = 0xF0;

/// A decoded blob id reference.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BlobIdRef<'a> {
    /// Identifier bytes stored in place
    Inline(&'a [u8]),
    /// Identifier bytes stored behind a record id
    External(RawRecordId),
}

/// Append the inline encoding of `id_bytes` to `out`.
///
/// Refused for identifiers of [`SMALL_BLOB_ID_LIMIT`] bytes or more; those take the external
/// form.
pub fn write_inline(id_bytes: &[u8], out: &mut Vec<u8>) -> Result<(), RecordFormatError> {
    if id_bytes.len() >= SMALL_BLOB_ID_LIMIT {
        return Err(RecordFormatError::BlobIdTooLong {
            length: id_bytes.len(),
        });
    }

    let length = id_bytes.len() as u16;
    out.push(0xE0 | (length >> 8) as u8);
    out.push((length & 0xFF) as u8);
    out.extend_from_slice(id_bytes);
    Ok(())
}

/// Append the external encoding, a marker byte followed by `record_id`, to `out`.
pub fn write_external(record_id: RawRecordId, out: &mut Vec<u8>) {
    out.push(LONG_BLOB_ID_MARKER);
    record_id.write(out);
}

/// Decode a blob id reference from the start of `bytes`.
///
/// Returns the reference together with the number of bytes consumed.
pub fn read(bytes: &[u8]) -> Result<(BlobIdRef<'_>, usize), RecordFormatError> {
    let marker = *bytes
        .first()
        .ok_or(RecordFormatError::UnexpectedEnd { offset: 0 })?;

    if marker & 0xF0 == 0xE0 {
        let low = *bytes
            .get(1)
            .ok_or(RecordFormatError::UnexpectedEnd { offset: 1 })?;
        let length = usize::from(marker & 0x0F) << 8 | usize::from(low);
        let id_bytes = bytes
            .get(2..2 + length)
            .ok_or(RecordFormatError::UnexpectedEnd { offset: 2 })?;
        return Ok((BlobIdRef::Inline(id_bytes), 2 + length));
    }

    if marker == LONG_BLOB_ID_MARKER {
        let record_id = RawRecordId::from_bytes(&bytes[1..])?;
        return Ok((BlobIdRef::External(record_id), 1 + RECORD_ID_BYTES));
    }

    Err(RecordFormatError::InvalidBlobIdMarker { marker })
}
