//! Record numbers and record types.

use crate::RecordFormatError;
use derive_more::{Display, From, Into};

/// Number of a record within its segment.
///
/// Record numbers are assigned sequentially starting from 0 as records are appended to a
/// segment; the segment's record table maps each number to the record's type and offset.
#[derive(
    Debug, Display, Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, From, Into,
)]
#[repr(transparent)]
pub struct RecordNumber(u32);

impl RecordNumber {
    /// Record number 0, the first record of a segment.
    pub const ZERO: RecordNumber = RecordNumber(0);

    /// Create new instance
    #[inline]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    /// Record number as `u32`
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Type of a record.
///
/// The type determines how a record's bytes are decoded; all records are byte-addressable
/// uniformly regardless of their type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum RecordType {
    /// Leaf of a map record
    Leaf = 0,
    /// Branch of a map record
    Branch = 1,
    /// Bucket of a list record
    Bucket = 2,
    /// List record
    List = 3,
    /// String or binary value record
    Value = 4,
    /// Raw block of value payload bytes
    Block = 5,
    /// Template record
    Template = 6,
    /// Node record
    Node = 7,
}

impl TryFrom<u8> for RecordType {
    type Error = RecordFormatError;

    #[inline]
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Leaf,
            1 => Self::Branch,
            2 => Self::Bucket,
            3 => Self::List,
            4 => Self::Value,
            5 => Self::Block,
            6 => Self::Template,
            7 => Self::Node,
            _ => {
                return Err(RecordFormatError::UnknownRecordType { value });
            }
        })
    }
}
