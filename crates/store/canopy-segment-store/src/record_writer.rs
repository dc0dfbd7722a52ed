//! Writing complete records through the writer pool.
//!
//! A [`RecordWriter`] turns values into records: strings (inline below the long-length
//! threshold, otherwise out-of-line as block records enumerated by a list), blob ids, templates
//! and lists. Every write goes through the pool's thread-affine buffered writer, and the
//! deduplication caches are consulted first, so writing the same string or template twice
//! yields the same record id.

#[cfg(test)]
mod tests;

use crate::id::{RecordId, SegmentId};
use crate::pool::SegmentWriterPool;
use crate::reader::LIST_BUCKET_SIZE;
use crate::store::{SegmentStore, WriteError};
use crate::write_cache::{NodeCache, WriterCacheManager, WriterCacheOptions};
use canopy_segment::blob_id;
use canopy_segment::length::{self, MEDIUM_LIMIT};
use canopy_segment::record::RecordType;
use canopy_segment::template::Template;
use std::sync::Arc;

/// Size of an out-of-line payload block.
pub const BLOCK_SIZE: usize = 4096;

/// Strings of `2^31` bytes or more are not supported.
const MAX_STRING_LENGTH: usize = 1 << 31;

/// Writer of complete records.
#[derive(Debug)]
pub struct RecordWriter<S> {
    pool: Arc<SegmentWriterPool<S>>,
    caches: WriterCacheManager,
}

impl<S> RecordWriter<S>
where
    S: SegmentStore,
{
    /// Create new instance writing through `pool`.
    pub fn new(pool: Arc<SegmentWriterPool<S>>, options: WriterCacheOptions) -> Self {
        Self {
            pool,
            caches: WriterCacheManager::new(options),
        }
    }

    /// The pool this writer borrows from.
    pub fn pool(&self) -> &Arc<SegmentWriterPool<S>> {
        &self.pool
    }

    /// The node record cache, for the node layer to consult.
    pub fn node_cache(&self) -> &NodeCache {
        self.caches.nodes()
    }

    /// Flush every buffered writer of the underlying pool.
    pub fn flush(&self) -> Result<(), WriteError> {
        self.pool.flush()
    }

    /// Write a string value record.
    ///
    /// Strings below the long-length threshold are stored inline; longer ones are split into
    /// block records behind a list, with the value record carrying the 8-byte length and the
    /// list's record id. Recently written strings are deduplicated.
    pub fn write_string(&self, string: &str) -> Result<RecordId, WriteError> {
        let key = string.to_owned();
        if let Some(record_id) = self.caches.strings().get(&key) {
            return Ok(record_id);
        }

        let bytes = string.as_bytes();
        if bytes.len() >= MAX_STRING_LENGTH {
            return Err(WriteError::StringTooLong {
                length: bytes.len(),
            });
        }

        let record_id = self.write_value_bytes(bytes)?;
        self.caches.strings().put(key, record_id.clone());
        Ok(record_id)
    }

    /// Write a raw block of out-of-line payload bytes.
    pub fn write_block(&self, bytes: &[u8]) -> Result<RecordId, WriteError> {
        self.pool.execute(|writer| {
            let record_id = writer.prepare(RecordType::Block, bytes.len(), &[])?;
            writer.write_bytes(bytes);
            Ok(record_id)
        })
    }

    /// Write a blob id record referencing an externally stored binary.
    ///
    /// Short identifiers are stored in place; longer ones become a value record with the blob
    /// id record pointing at it.
    pub fn write_blob_id(&self, id_bytes: &[u8]) -> Result<RecordId, WriteError> {
        if id_bytes.len() < blob_id::SMALL_BLOB_ID_LIMIT {
            let mut encoded = Vec::with_capacity(2 + id_bytes.len());
            blob_id::write_inline(id_bytes, &mut encoded)?;

            self.pool.execute(|writer| {
                let record_id = writer.prepare(RecordType::Value, encoded.len(), &[])?;
                writer.write_bytes(&encoded);
                Ok(record_id)
            })
        } else {
            let value = self.write_value_bytes(id_bytes)?;

            self.pool.execute(|writer| {
                let record_id = writer.prepare(
                    RecordType::Value,
                    1,
                    &[Arc::clone(value.segment_id())],
                )?;
                writer.write_u8(blob_id::LONG_BLOB_ID_MARKER);
                writer.write_record_id(&value);
                Ok(record_id)
            })
        }
    }

    /// Write raw bytes as a value record, inline or out-of-line by size.
    fn write_value_bytes(&self, bytes: &[u8]) -> Result<RecordId, WriteError> {
        if (bytes.len() as u64) < MEDIUM_LIMIT {
            let mut header = Vec::with_capacity(2);
            length::write(bytes.len() as u64, &mut header)?;

            self.pool.execute(|writer| {
                let record_id = writer.prepare(RecordType::Value, header.len() + bytes.len(), &[])?;
                writer.write_bytes(&header);
                writer.write_bytes(bytes);
                Ok(record_id)
            })
        } else {
            let blocks = bytes
                .chunks(BLOCK_SIZE)
                .map(|chunk| self.write_block(chunk))
                .collect::<Result<Vec<_>, _>>()?;
            let list = self.write_list(&blocks)?;

            let mut header = Vec::with_capacity(8);
            length::write(bytes.len() as u64, &mut header)?;

            self.pool.execute(|writer| {
                let record_id = writer.prepare(
                    RecordType::Value,
                    header.len(),
                    &[Arc::clone(list.segment_id())],
                )?;
                writer.write_bytes(&header);
                writer.write_record_id(&list);
                Ok(record_id)
            })
        }
    }

    /// Write a template record, deduplicating recently written templates.
    pub fn write_template(&self, template: &Template<RecordId>) -> Result<RecordId, WriteError> {
        if let Some(record_id) = self.caches.templates().get(template) {
            return Ok(record_id);
        }

        let header = template.header()?;
        let referenced_ids = template
            .record_ids()
            .map(|record_id| Arc::clone(record_id.segment_id()))
            .collect::<Vec<_>>();

        let record_id = self.pool.execute(|writer| {
            let record_id = writer.prepare(
                RecordType::Template,
                4 + template.property_types.len(),
                &referenced_ids,
            )?;
            writer.write_u32(header);
            for id in template.record_ids() {
                writer.write_record_id(id);
            }
            for property_type in &template.property_types {
                writer.write_u8(u8::from(*property_type));
            }
            Ok(record_id)
        })?;

        self.caches
            .templates()
            .put(template.clone(), record_id.clone());
        Ok(record_id)
    }

    /// Write a list record over `entries`, building the bucket tree above the fan-out.
    pub fn write_list(&self, entries: &[RecordId]) -> Result<RecordId, WriteError> {
        let size = u32::try_from(entries.len()).expect("List sizes fit u32; qed");

        match entries {
            [] => self.pool.execute(|writer| {
                let record_id = writer.prepare(RecordType::List, 4, &[])?;
                writer.write_u32(0);
                Ok(record_id)
            }),
            [entry] => self.pool.execute(|writer| {
                let record_id = writer.prepare(
                    RecordType::List,
                    4,
                    &[Arc::clone(entry.segment_id())],
                )?;
                writer.write_u32(1);
                writer.write_record_id(entry);
                Ok(record_id)
            }),
            _ => {
                let mut current = entries.to_vec();
                while current.len() > 1 {
                    current = current
                        .chunks(LIST_BUCKET_SIZE as usize)
                        .map(|chunk| self.write_bucket(chunk))
                        .collect::<Result<Vec<_>, _>>()?;
                }
                let root = current.pop().expect("Reduction ends at one bucket; qed");

                self.pool.execute(|writer| {
                    let record_id = writer.prepare(
                        RecordType::List,
                        4,
                        &[Arc::clone(root.segment_id())],
                    )?;
                    writer.write_u32(size);
                    writer.write_record_id(&root);
                    Ok(record_id)
                })
            }
        }
    }

    fn write_bucket(&self, entries: &[RecordId]) -> Result<RecordId, WriteError> {
        let referenced_ids = entries
            .iter()
            .map(|record_id| Arc::clone(record_id.segment_id()))
            .collect::<Vec<Arc<SegmentId>>>();

        self.pool.execute(|writer| {
            let record_id = writer.prepare(RecordType::Bucket, 0, &referenced_ids)?;
            for entry in entries {
                writer.write_record_id(entry);
            }
            Ok(record_id)
        })
    }
}
