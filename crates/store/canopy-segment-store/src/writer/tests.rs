use super::{DEFAULT_MAX_SEGMENT_SIZE, SegmentBufferWriter};
use crate::id::RecordId;
use crate::memory::MemoryStore;
use crate::store::{SegmentStore, WriteError};
use canopy_segment::layout::Generation;
use canopy_segment::record::{RecordNumber, RecordType};
use std::sync::Arc;

fn writer(store: &Arc<MemoryStore>, max_segment_size: usize) -> SegmentBufferWriter<MemoryStore> {
    SegmentBufferWriter::new(
        Arc::clone(store),
        "t.0000".to_owned(),
        Generation::new(1),
        max_segment_size,
    )
    .unwrap()
}

#[test]
fn single_record_round_trip() {
    let store = Arc::new(MemoryStore::new());
    let mut writer = writer(&store, DEFAULT_MAX_SEGMENT_SIZE);

    let record_id = writer.prepare(RecordType::Value, 4, &[]).unwrap();
    writer.write_bytes(&[0x03, b'a', b'b', b'c']);
    assert!(writer.is_dirty());
    writer.flush().unwrap();
    assert!(!writer.is_dirty());

    assert_eq!(store.write_count(), 1);
    let segment = store.read_segment(record_id.segment_id()).unwrap();
    assert_eq!(segment.record_count(), 1);
    assert_eq!(segment.generation(), Some(Generation::new(1)));
    assert_eq!(
        segment
            .read_bytes(record_id.record_number(), 0, 4)
            .unwrap(),
        &[0x03, b'a', b'b', b'c']
    );
}

#[test]
fn records_read_back_in_order() {
    let store = Arc::new(MemoryStore::new());
    let mut writer = writer(&store, DEFAULT_MAX_SEGMENT_SIZE);

    let mut record_ids = Vec::new();
    for (index, size) in [3_usize, 5, 7].into_iter().enumerate() {
        let record_id = writer.prepare(RecordType::Block, size, &[]).unwrap();
        assert_eq!(record_id.record_number(), RecordNumber::new(index as u32));
        writer.write_bytes(&vec![index as u8; size]);
        record_ids.push((record_id, size));
    }
    writer.flush().unwrap();

    let segment = store.read_segment(record_ids[0].0.segment_id()).unwrap();
    for (index, (record_id, size)) in record_ids.iter().enumerate() {
        assert_eq!(
            segment
                .read_bytes(record_id.record_number(), 0, *size)
                .unwrap(),
            vec![index as u8; *size].as_slice()
        );
    }

    // Record 0 sits nearest the segment end
    let data = segment.data();
    assert_eq!(&data[data.len() - 3..], &[0, 0, 0]);
}

#[test]
fn references_are_deduplicated() {
    let store = Arc::new(MemoryStore::new());
    let other1 = store.tracker().new_data_segment_id().unwrap();
    let other2 = store.tracker().new_data_segment_id().unwrap();
    let mut writer = writer(&store, DEFAULT_MAX_SEGMENT_SIZE);

    let referenced = [
        Arc::clone(&other1),
        Arc::clone(&other1),
        Arc::clone(&other2),
    ];
    let record_id = writer.prepare(RecordType::Value, 0, &referenced).unwrap();
    writer.write_record_id(&RecordId::new(Arc::clone(&other1), RecordNumber::new(5)));
    writer.write_record_id(&RecordId::new(Arc::clone(&other1), RecordNumber::new(6)));
    writer.write_record_id(&RecordId::new(Arc::clone(&other2), RecordNumber::new(7)));
    writer.flush().unwrap();

    let segment = store.read_segment(record_id.segment_id()).unwrap();
    // Two distinct referents, one table entry each
    assert_eq!(u16::from_be_bytes([segment.data()[12], segment.data()[13]]), 2);

    let number = record_id.record_number();
    for (offset, (expected_id, expected_number)) in
        [(0, (&other1, 5)), (6, (&other1, 6)), (12, (&other2, 7))]
    {
        let read = segment.read_record_id(number, offset).unwrap();
        assert!(Arc::ptr_eq(read.segment_id(), expected_id));
        assert_eq!(read.record_number(), RecordNumber::new(expected_number));
    }
}

#[test]
fn self_references_use_index_zero() {
    let store = Arc::new(MemoryStore::new());
    let mut writer = writer(&store, DEFAULT_MAX_SEGMENT_SIZE);

    let first = writer.prepare(RecordType::Block, 2, &[]).unwrap();
    writer.write_bytes(&[0xAA, 0xBB]);

    let self_id = Arc::clone(first.segment_id());
    let second = writer
        .prepare(RecordType::Value, 0, &[self_id])
        .unwrap();
    writer.write_record_id(&first);
    writer.flush().unwrap();

    let segment = store.read_segment(second.segment_id()).unwrap();
    // No reference table entry was spent on the self-reference
    assert_eq!(u16::from_be_bytes([segment.data()[12], segment.data()[13]]), 0);
    assert_eq!(
        segment
            .read_bytes(second.record_number(), 0, 6)
            .unwrap(),
        &[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
    );

    let read = segment.read_record_id(second.record_number(), 0).unwrap();
    assert!(Arc::ptr_eq(read.segment_id(), segment.id()));
    assert_eq!(read.record_number(), first.record_number());
}

#[test]
fn long_value_wire_form() {
    let store = Arc::new(MemoryStore::new());
    let other = store.tracker().new_data_segment_id().unwrap();
    let mut writer = writer(&store, DEFAULT_MAX_SEGMENT_SIZE);

    let record_id = writer
        .prepare(RecordType::Value, 8, &[Arc::clone(&other)])
        .unwrap();
    writer.write_u64(0xDFFF_FFFF_FFFF_FFFF);
    writer.write_record_id(&RecordId::new(other, RecordNumber::new(4)));
    writer.flush().unwrap();

    let segment = store.read_segment(record_id.segment_id()).unwrap();
    assert_eq!(
        segment
            .read_bytes(record_id.record_number(), 0, 14)
            .unwrap(),
        &[0xDF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x01, 0x00, 0x00, 0x00, 0x04]
    );
}

#[test]
fn long_blob_id_wire_form() {
    let store = Arc::new(MemoryStore::new());
    let other = store.tracker().new_data_segment_id().unwrap();
    let mut writer = writer(&store, DEFAULT_MAX_SEGMENT_SIZE);

    let record_id = writer
        .prepare(RecordType::Value, 1, &[Arc::clone(&other)])
        .unwrap();
    writer.write_u8(0xF0);
    writer.write_record_id(&RecordId::new(other, RecordNumber::new(4)));
    writer.flush().unwrap();

    let segment = store.read_segment(record_id.segment_id()).unwrap();
    assert_eq!(
        segment
            .read_bytes(record_id.record_number(), 0, 7)
            .unwrap(),
        &[0xF0, 0x00, 0x01, 0x00, 0x00, 0x00, 0x04]
    );
}

#[test]
fn overflowing_segment_is_flushed_first() {
    let store = Arc::new(MemoryStore::new());
    let mut writer = writer(&store, 256);

    let first = writer.prepare(RecordType::Block, 100, &[]).unwrap();
    writer.write_bytes(&[0x01; 100]);
    let second = writer.prepare(RecordType::Block, 100, &[]).unwrap();
    writer.write_bytes(&[0x02; 100]);
    assert!(Arc::ptr_eq(first.segment_id(), second.segment_id()));
    assert_eq!(store.write_count(), 0);

    // The third record does not fit; the segment is flushed and a fresh one started
    let third = writer.prepare(RecordType::Block, 100, &[]).unwrap();
    writer.write_bytes(&[0x03; 100]);
    assert!(!Arc::ptr_eq(first.segment_id(), third.segment_id()));
    assert_eq!(third.record_number(), RecordNumber::ZERO);
    assert_eq!(store.write_count(), 1);

    writer.flush().unwrap();
    assert_eq!(store.write_count(), 2);

    // Both segments read back
    assert_eq!(
        store
            .read_segment(first.segment_id())
            .unwrap()
            .read_bytes(second.record_number(), 0, 100)
            .unwrap(),
        &[0x02; 100]
    );
    assert_eq!(
        store
            .read_segment(third.segment_id())
            .unwrap()
            .read_bytes(third.record_number(), 0, 100)
            .unwrap(),
        &[0x03; 100]
    );
}

#[test]
fn oversized_records_are_refused() {
    let store = Arc::new(MemoryStore::new());
    let mut writer = writer(&store, 64);

    assert!(matches!(
        writer.prepare(RecordType::Block, 100, &[]),
        Err(WriteError::RecordTooLarge {
            size: 100,
            max_segment_size: 64,
        })
    ));
    assert_eq!(store.write_count(), 0);
}

#[test]
fn flush_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let mut writer = writer(&store, DEFAULT_MAX_SEGMENT_SIZE);

    // Flushing an empty writer writes nothing
    writer.flush().unwrap();
    assert_eq!(store.write_count(), 0);

    writer.prepare(RecordType::Block, 1, &[]).unwrap();
    writer.write_u8(0xAA);
    writer.flush().unwrap();
    writer.flush().unwrap();
    assert_eq!(store.write_count(), 1);
}

#[test]
fn writer_identity() {
    let store = Arc::new(MemoryStore::new());
    let first = writer(&store, DEFAULT_MAX_SEGMENT_SIZE);
    let second = writer(&store, DEFAULT_MAX_SEGMENT_SIZE);

    assert_eq!(first.writer_id(), "t.0000");
    assert_eq!(first.generation(), Generation::new(1));
    assert_ne!(first.instance(), second.instance());
}
