use super::{BLOCK_SIZE, RecordWriter};
use crate::id::RecordId;
use crate::memory::MemoryStore;
use crate::pool::{GenerationCounter, SegmentWriterPool};
use crate::reader::SegmentReader;
use crate::store::{SegmentStore, WriteError};
use crate::write_cache::WriterCacheOptions;
use crate::writer::DEFAULT_MAX_SEGMENT_SIZE;
use canopy_segment::template::{ChildNodes, PropertyTypeTag, Template};
use std::sync::Arc;

fn setup(
    max_segment_size: usize,
) -> (
    Arc<MemoryStore>,
    RecordWriter<MemoryStore>,
    SegmentReader<MemoryStore>,
) {
    let store = Arc::new(MemoryStore::new());
    let pool = Arc::new(SegmentWriterPool::new(
        Arc::clone(&store),
        "t",
        Arc::new(GenerationCounter::default()),
        max_segment_size,
    ));
    let writer = RecordWriter::new(pool, WriterCacheOptions::default());
    let reader = SegmentReader::new(Arc::clone(&store));
    (store, writer, reader)
}

fn record_bytes(store: &MemoryStore, record_id: &RecordId) -> Vec<u8> {
    let segment = store.read_segment(record_id.segment_id()).unwrap();
    let size = segment.record_size(record_id.record_number()).unwrap();
    segment
        .read_bytes(record_id.record_number(), 0, size)
        .unwrap()
        .to_vec()
}

#[test]
fn small_value_layout() {
    let (store, writer, reader) = setup(DEFAULT_MAX_SEGMENT_SIZE);
    let value = "x".repeat(127);

    let record_id = writer.write_string(&value).unwrap();
    writer.flush().unwrap();

    let bytes = record_bytes(&store, &record_id);
    assert_eq!(bytes.len(), 128);
    assert_eq!(bytes[0], 0x7F);
    assert!(bytes[1..].iter().all(|&byte| byte == 0x78));

    assert_eq!(reader.read_string(&record_id).unwrap(), value);
}

#[test]
fn medium_value_layout() {
    let (store, writer, reader) = setup(DEFAULT_MAX_SEGMENT_SIZE);
    let value = "x".repeat(16511);

    let record_id = writer.write_string(&value).unwrap();
    writer.flush().unwrap();

    let bytes = record_bytes(&store, &record_id);
    assert_eq!(bytes.len(), 2 + 16511);
    assert_eq!(&bytes[..2], &[0xBF, 0xFF]);
    assert!(bytes[2..].iter().all(|&byte| byte == 0x78));

    assert_eq!(reader.read_string(&record_id).unwrap(), value);
}

#[test]
fn long_value_goes_out_of_line() {
    let (store, writer, reader) = setup(DEFAULT_MAX_SEGMENT_SIZE);
    let value = "y".repeat(16512);

    let record_id = writer.write_string(&value).unwrap();
    writer.flush().unwrap();

    // 8-byte length header plus the record id of the block list
    let bytes = record_bytes(&store, &record_id);
    assert_eq!(bytes.len(), 14);
    assert_eq!(&bytes[..8], &[0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

    assert_eq!(reader.read_string(&record_id).unwrap(), value);
}

#[test]
fn long_value_spans_segments() {
    let (_store, writer, reader) = setup(8192);
    let value: String = (0..100_000)
        .map(|index| char::from(b'a' + (index % 26) as u8))
        .collect();

    let record_id = writer.write_string(&value).unwrap();
    writer.flush().unwrap();

    assert_eq!(reader.read_string(&record_id).unwrap(), value);
}

#[test]
fn strings_are_deduplicated() {
    let (store, writer, _reader) = setup(DEFAULT_MAX_SEGMENT_SIZE);

    let first = writer.write_string("repeated value").unwrap();
    let second = writer.write_string("repeated value").unwrap();
    assert_eq!(first, second);

    let third = writer.write_string("different value").unwrap();
    assert_ne!(first, third);

    writer.flush().unwrap();
    assert_eq!(store.write_count(), 1);
}

#[test]
fn small_blob_id_layout() {
    let (store, writer, reader) = setup(DEFAULT_MAX_SEGMENT_SIZE);
    let id_bytes = [0x78_u8; 16];

    let record_id = writer.write_blob_id(&id_bytes).unwrap();
    writer.flush().unwrap();

    let bytes = record_bytes(&store, &record_id);
    assert_eq!(&bytes[..2], &[0xE0, 0x10]);
    assert_eq!(&bytes[2..], id_bytes.as_slice());

    assert_eq!(reader.read_blob_id(&record_id).unwrap(), id_bytes);
}

#[test]
fn long_blob_id_goes_out_of_line() {
    let (store, writer, reader) = setup(DEFAULT_MAX_SEGMENT_SIZE);
    let id_bytes = vec![0xAB_u8; BLOCK_SIZE];

    let record_id = writer.write_blob_id(&id_bytes).unwrap();
    writer.flush().unwrap();

    let bytes = record_bytes(&store, &record_id);
    assert_eq!(bytes.len(), 7);
    assert_eq!(bytes[0], 0xF0);

    assert_eq!(reader.read_blob_id(&record_id).unwrap(), id_bytes);
}

#[test]
fn templates_round_trip_and_deduplicate() {
    let (_store, writer, reader) = setup(DEFAULT_MAX_SEGMENT_SIZE);

    let primary_type = writer.write_string("app:document").unwrap();
    let mixin = writer.write_string("mix:versionable").unwrap();
    let property_names = writer.write_string("title").unwrap();
    let template = Template {
        primary_type: Some(primary_type),
        mixin_types: vec![mixin],
        children: ChildNodes::Many,
        property_names: Some(property_names),
        property_types: vec![PropertyTypeTag::new(1)],
    };

    let first = writer.write_template(&template).unwrap();
    let second = writer.write_template(&template).unwrap();
    assert_eq!(first, second);

    writer.flush().unwrap();
    assert_eq!(reader.read_template(&first).unwrap(), template);
}

#[test]
fn lists_round_trip() {
    let (_store, writer, reader) = setup(DEFAULT_MAX_SEGMENT_SIZE);
    let entry = writer.write_string("entry").unwrap();

    for size in [0_usize, 1, 2, 255, 256, 700] {
        let entries = vec![entry.clone(); size];
        let record_id = writer.write_list(&entries).unwrap();
        writer.flush().unwrap();

        assert_eq!(reader.read_list(&record_id).unwrap(), entries, "{size}");
    }
}

#[test]
fn inconsistent_templates_are_refused() {
    let (_store, writer, _reader) = setup(DEFAULT_MAX_SEGMENT_SIZE);
    let names = writer.write_string("names").unwrap();

    let template = Template {
        primary_type: None,
        mixin_types: Vec::new(),
        children: ChildNodes::Many,
        property_names: Some(names),
        property_types: Vec::new(),
    };
    assert!(matches!(
        writer.write_template(&template),
        Err(WriteError::Record { .. })
    ));
}
