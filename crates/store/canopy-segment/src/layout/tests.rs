use super::{
    Generation, RECORD_TABLE_ENTRY_BYTES, RecordTableEntry, SEGMENT_HEADER_BYTES,
    SEGMENT_MAGIC, SegmentHeader, read_reference, write_reference,
};
use crate::record::{RecordNumber, RecordType};
use crate::{RecordFormatError, SegmentFormatError};
use alloc::vec::Vec;

#[test]
fn header_round_trip() {
    let header = SegmentHeader {
        generation: Generation::new(7),
        reference_count: 3,
        record_count: 250,
    };

    let mut out = Vec::new();
    header.write(&mut out);
    assert_eq!(out.len(), SEGMENT_HEADER_BYTES);
    assert_eq!(SegmentHeader::read(&out).unwrap(), header);
}

#[test]
fn header_rejects_bad_magic() {
    let header = SegmentHeader {
        generation: Generation::default(),
        reference_count: 0,
        record_count: 0,
    };
    let mut out = Vec::new();
    header.write(&mut out);
    out[0] ^= 0xFF;
    assert_eq!(
        SegmentHeader::read(&out),
        Err(SegmentFormatError::InvalidMagic)
    );
}

#[test]
fn header_rejects_unknown_version() {
    let header = SegmentHeader {
        generation: Generation::default(),
        reference_count: 0,
        record_count: 0,
    };
    let mut out = Vec::new();
    header.write(&mut out);
    out[SEGMENT_MAGIC.len()] = 99;
    assert_eq!(
        SegmentHeader::read(&out),
        Err(SegmentFormatError::UnsupportedVersion { version: 99 })
    );
}

#[test]
fn header_rejects_truncated_input() {
    assert_eq!(
        SegmentHeader::read(&[0x43]),
        Err(SegmentFormatError::Truncated {
            length: 1,
            expected: SEGMENT_HEADER_BYTES,
        })
    );
}

#[test]
fn reference_round_trip() {
    let header = SegmentHeader {
        generation: Generation::new(1),
        reference_count: 2,
        record_count: 0,
    };
    let mut out = Vec::new();
    header.write(&mut out);
    write_reference(0x0123_4567_89AB_CDEF, 0xA000_0000_0000_0001, &mut out);
    write_reference(u64::MAX, 0xB000_0000_0000_0002, &mut out);

    assert_eq!(
        read_reference(&out, 0).unwrap(),
        (0x0123_4567_89AB_CDEF, 0xA000_0000_0000_0001)
    );
    assert_eq!(
        read_reference(&out, 1).unwrap(),
        (u64::MAX, 0xB000_0000_0000_0002)
    );
    assert!(matches!(
        read_reference(&out, 2),
        Err(SegmentFormatError::Truncated { .. })
    ));
}

#[test]
fn record_table_entry_round_trip() {
    let header = SegmentHeader {
        generation: Generation::new(1),
        reference_count: 0,
        record_count: 2,
    };
    let mut out = Vec::new();
    header.write(&mut out);

    let entries = [
        RecordTableEntry {
            number: RecordNumber::ZERO,
            record_type: RecordType::Value,
            offset: 128,
        },
        RecordTableEntry {
            number: RecordNumber::new(1),
            record_type: RecordType::Template,
            offset: 160,
        },
    ];
    for entry in &entries {
        entry.write(&mut out);
    }
    assert_eq!(
        out.len(),
        SEGMENT_HEADER_BYTES + 2 * RECORD_TABLE_ENTRY_BYTES
    );

    for (index, entry) in entries.iter().enumerate() {
        assert_eq!(&RecordTableEntry::read(&out, 0, index).unwrap(), entry);
    }
}

#[test]
fn record_table_entry_rejects_unknown_type() {
    let header = SegmentHeader {
        generation: Generation::new(1),
        reference_count: 0,
        record_count: 1,
    };
    let mut out = Vec::new();
    header.write(&mut out);
    RecordTableEntry {
        number: RecordNumber::ZERO,
        record_type: RecordType::Value,
        offset: 1,
    }
    .write(&mut out);
    out[SEGMENT_HEADER_BYTES + 4] = 0xAA;

    assert_eq!(
        RecordTableEntry::read(&out, 0, 0),
        Err(SegmentFormatError::Record(
            RecordFormatError::UnknownRecordType { value: 0xAA }
        ))
    );
}
