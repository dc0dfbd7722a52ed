//! Helpers shared by the unit tests.

use crate::id::SegmentTracker;
use crate::segment::Segment;
use canopy_segment::layout::{Generation, RecordTableEntry, SegmentHeader, write_reference};
use canopy_segment::record::{RecordNumber, RecordType};
use std::sync::Arc;

/// Build the byte form of a data segment from record payloads.
///
/// Records are numbered in order; the payload of record 0 ends up nearest the segment end.
pub(crate) fn segment_bytes(
    generation: Generation,
    references: &[(u64, u64)],
    records: &[(RecordType, Vec<u8>)],
) -> Vec<u8> {
    let mut out = Vec::new();
    SegmentHeader {
        generation,
        reference_count: references.len() as u16,
        record_count: records.len() as u16,
    }
    .write(&mut out);

    for &(msb, lsb) in references {
        write_reference(msb, lsb, &mut out);
    }

    let mut offset = 0u32;
    for (number, (record_type, payload)) in records.iter().enumerate() {
        offset += payload.len() as u32;
        RecordTableEntry {
            number: RecordNumber::new(number as u32),
            record_type: *record_type,
            offset,
        }
        .write(&mut out);
    }

    for (_record_type, payload) in records.iter().rev() {
        out.extend_from_slice(payload);
    }

    out
}

/// A parsed data segment holding a single block record of `payload` bytes.
pub(crate) fn data_segment(tracker: &SegmentTracker, payload: usize) -> Arc<Segment> {
    let id = tracker.new_data_segment_id().unwrap();
    let bytes = segment_bytes(
        Generation::new(1),
        &[],
        &[(RecordType::Block, vec![0xAB; payload.max(1)])],
    );
    Arc::new(Segment::parse(id, Arc::from(bytes), tracker).unwrap())
}

/// A parsed bulk segment of `payload` opaque bytes.
pub(crate) fn bulk_segment(tracker: &SegmentTracker, payload: usize) -> Arc<Segment> {
    let id = tracker.new_bulk_segment_id().unwrap();
    Arc::new(Segment::parse(id, Arc::from(vec![0xCD; payload]), tracker).unwrap())
}
