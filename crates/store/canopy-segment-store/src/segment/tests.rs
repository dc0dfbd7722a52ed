use super::{Segment, ValueRef};
use crate::id::SegmentTracker;
use crate::store::ReadError;
use crate::test_util::{bulk_segment, segment_bytes};
use canopy_segment::layout::{Generation, SEGMENT_HEADER_BYTES};
use canopy_segment::record::{RecordNumber, RecordType};
use canopy_segment::record_id::RawRecordId;
use canopy_segment::template::{ChildNodes, PropertyTypeTag, Template};
use canopy_segment::{SegmentFormatError, length};
use std::sync::Arc;

const REF_MSB: u64 = 0x1111_2222_3333_4444;
const REF_LSB: u64 = 0xA000_0000_0000_0009;

fn parse(tracker: &SegmentTracker, bytes: Vec<u8>) -> Result<Segment, SegmentFormatError> {
    let id = tracker.new_data_segment_id().unwrap();
    Segment::parse(id, Arc::from(bytes), tracker)
}

#[test]
fn empty_segment() {
    let tracker = SegmentTracker::new();
    let segment = parse(&tracker, segment_bytes(Generation::new(7), &[], &[])).unwrap();

    assert_eq!(segment.record_count(), 0);
    assert_eq!(segment.generation(), Some(Generation::new(7)));
    // Parsing fills the id's generation tag
    assert_eq!(segment.id().generation(), Some(Generation::new(7)));
}

#[test]
fn rejects_corrupted_input() {
    let tracker = SegmentTracker::new();

    let mut bytes = segment_bytes(Generation::new(1), &[], &[]);
    bytes[0] ^= 0xFF;
    assert_eq!(
        parse(&tracker, bytes).unwrap_err(),
        SegmentFormatError::InvalidMagic
    );

    let bytes = segment_bytes(Generation::new(1), &[], &[])[..8].to_vec();
    assert!(matches!(
        parse(&tracker, bytes).unwrap_err(),
        SegmentFormatError::Truncated { .. }
    ));

    // A record table declaring more records than the segment holds
    let mut bytes = segment_bytes(Generation::new(1), &[], &[]);
    bytes[SEGMENT_HEADER_BYTES - 1] = 3;
    assert!(matches!(
        parse(&tracker, bytes).unwrap_err(),
        SegmentFormatError::Truncated { .. }
    ));
}

#[test]
fn rejects_unordered_record_table() {
    let tracker = SegmentTracker::new();
    let records = [
        (RecordType::Block, vec![1, 2, 3]),
        (RecordType::Block, vec![4, 5]),
    ];
    let mut bytes = segment_bytes(Generation::new(1), &[], &records);

    // Rewrite the second entry's offset to equal the first's
    let entry_offset = SEGMENT_HEADER_BYTES + 9 + 5;
    bytes[entry_offset..entry_offset + 4].copy_from_slice(&3u32.to_be_bytes());
    assert_eq!(
        parse(&tracker, bytes).unwrap_err(),
        SegmentFormatError::UnorderedRecordTable { index: 1 }
    );
}

#[test]
fn rejects_out_of_bounds_record_offset() {
    let tracker = SegmentTracker::new();
    let mut bytes = segment_bytes(
        Generation::new(1),
        &[],
        &[(RecordType::Block, vec![1, 2, 3])],
    );

    let entry_offset = SEGMENT_HEADER_BYTES + 5;
    bytes[entry_offset..entry_offset + 4].copy_from_slice(&100u32.to_be_bytes());
    assert_eq!(
        parse(&tracker, bytes).unwrap_err(),
        SegmentFormatError::RecordOffsetOutOfBounds {
            offset: 100,
            payload: 3,
        }
    );
}

#[test]
fn typed_reads() {
    let tracker = SegmentTracker::new();
    let payload = vec![
        0x01, // u8
        0x02, 0x03, // u16
        0x04, 0x05, 0x06, 0x07, // u32
        0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, // u64
    ];
    let segment = parse(
        &tracker,
        segment_bytes(Generation::new(1), &[], &[(RecordType::Value, payload.clone())]),
    )
    .unwrap();
    let number = RecordNumber::ZERO;

    assert_eq!(segment.read_u8(number, 0).unwrap(), 0x01);
    assert_eq!(segment.read_u16(number, 1).unwrap(), 0x0203);
    assert_eq!(segment.read_u32(number, 3).unwrap(), 0x0405_0607);
    assert_eq!(segment.read_u64(number, 7).unwrap(), 0x0809_0A0B_0C0D_0E0F);
    assert_eq!(segment.read_bytes(number, 0, 15).unwrap(), payload.as_slice());
    assert_eq!(segment.record_size(number).unwrap(), 15);
}

#[test]
fn reads_are_bounded_by_the_record_extent() {
    let tracker = SegmentTracker::new();
    let records = [
        (RecordType::Block, vec![1, 2, 3]),
        (RecordType::Block, vec![4, 5, 6, 7]),
    ];
    let segment = parse(&tracker, segment_bytes(Generation::new(1), &[], &records)).unwrap();

    assert_eq!(
        segment.read_bytes(RecordNumber::ZERO, 0, 3).unwrap(),
        &[1, 2, 3]
    );
    assert_eq!(
        segment.read_bytes(RecordNumber::new(1), 0, 4).unwrap(),
        &[4, 5, 6, 7]
    );

    // Record 0 is bounded by the segment end, record 1 by record 0's start
    assert!(matches!(
        segment.read_bytes(RecordNumber::ZERO, 0, 4),
        Err(ReadError::BadRecord { .. })
    ));
    assert!(matches!(
        segment.read_bytes(RecordNumber::new(1), 2, 3),
        Err(ReadError::BadRecord { .. })
    ));

    // Unknown record number
    assert!(matches!(
        segment.read_u8(RecordNumber::new(7), 0),
        Err(ReadError::BadRecord { .. })
    ));
}

#[test]
fn record_zero_sits_nearest_the_segment_end() {
    let tracker = SegmentTracker::new();
    let records = [
        (RecordType::Block, vec![1, 2, 3]),
        (RecordType::Block, vec![4, 5, 6, 7]),
    ];
    let segment = parse(&tracker, segment_bytes(Generation::new(1), &[], &records)).unwrap();

    let data = segment.data();
    assert_eq!(&data[data.len() - 3..], &[1, 2, 3]);
    assert_eq!(&data[data.len() - 7..data.len() - 3], &[4, 5, 6, 7]);
}

#[test]
fn reference_resolution() {
    let tracker = SegmentTracker::new();
    let payload = RawRecordId::new(1, RecordNumber::new(7)).to_bytes().to_vec();
    let segment = parse(
        &tracker,
        segment_bytes(
            Generation::new(1),
            &[(REF_MSB, REF_LSB)],
            &[(RecordType::Value, payload)],
        ),
    )
    .unwrap();
    let number = RecordNumber::ZERO;

    let record_id = segment.read_record_id(number, 0).unwrap();
    assert!(Arc::ptr_eq(
        record_id.segment_id(),
        &tracker.intern(REF_MSB, REF_LSB)
    ));
    assert_eq!(record_id.record_number(), RecordNumber::new(7));

    // Index 0 resolves to the segment itself
    assert!(Arc::ptr_eq(&segment.resolve_reference(0, number).unwrap(), segment.id()));
    // Out-of-range index
    assert!(matches!(
        segment.resolve_reference(2, number),
        Err(ReadError::BadRecord { .. })
    ));
}

#[test]
fn value_records() {
    let tracker = SegmentTracker::new();

    let mut inline = Vec::new();
    length::write(3, &mut inline).unwrap();
    inline.extend_from_slice(b"abc");

    let mut long = Vec::new();
    length::write(16512, &mut long).unwrap();
    long.extend_from_slice(&RawRecordId::new(0, RecordNumber::new(1)).to_bytes());

    let records = [
        (RecordType::Value, inline),
        (RecordType::Value, long),
    ];
    let segment = parse(&tracker, segment_bytes(Generation::new(1), &[], &records)).unwrap();

    assert_eq!(
        segment.read_value(RecordNumber::ZERO, 0).unwrap(),
        ValueRef::Inline(b"abc".as_slice())
    );
    match segment.read_value(RecordNumber::new(1), 0).unwrap() {
        ValueRef::External { length, list } => {
            assert_eq!(length, 16512);
            assert!(Arc::ptr_eq(list.segment_id(), segment.id()));
            assert_eq!(list.record_number(), RecordNumber::new(1));
        }
        other => panic!("Expected an external value, got {other:?}"),
    }
}

#[test]
fn template_record() {
    let tracker = SegmentTracker::new();
    let template = Template {
        primary_type: Some(RawRecordId::new(1, RecordNumber::new(3))),
        mixin_types: vec![RawRecordId::new(0, RecordNumber::new(4))],
        children: ChildNodes::Many,
        property_names: Some(RawRecordId::new(1, RecordNumber::new(5))),
        property_types: vec![PropertyTypeTag::new(1), PropertyTypeTag::new(2)],
    };
    let mut payload = Vec::new();
    template.write(&mut payload).unwrap();

    let segment = parse(
        &tracker,
        segment_bytes(
            Generation::new(1),
            &[(REF_MSB, REF_LSB)],
            &[(RecordType::Template, payload)],
        ),
    )
    .unwrap();

    let decoded = segment.read_template(RecordNumber::ZERO, 0).unwrap();
    let referent = tracker.intern(REF_MSB, REF_LSB);
    assert!(Arc::ptr_eq(decoded.primary_type.as_ref().unwrap().segment_id(), &referent));
    assert!(Arc::ptr_eq(decoded.mixin_types[0].segment_id(), segment.id()));
    assert_eq!(decoded.children, ChildNodes::Many);
    assert_eq!(decoded.property_types.len(), 2);
}

#[test]
fn bulk_segments_are_opaque() {
    let tracker = SegmentTracker::new();
    let segment = bulk_segment(&tracker, 100);

    assert_eq!(segment.data().len(), 100);
    assert_eq!(segment.generation(), None);
    assert_eq!(segment.record_count(), 0);
    assert!(matches!(
        segment.read_u8(RecordNumber::ZERO, 0),
        Err(ReadError::BadRecord { .. })
    ));
}
