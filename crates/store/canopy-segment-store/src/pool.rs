//! The thread-affine pool of buffered segment writers.
//!
//! Concurrent writers never share a buffer: the pool hands every thread its own
//! [`SegmentBufferWriter`], keyed by the thread's id, and reuses it across borrows as long as
//! its generation is current. Three tables track a writer's life, all under one pool mutex:
//!
//! * `active`: idle writers parked for reuse by their owner thread,
//! * `borrowed`: instance numbers of writers currently out on loan,
//! * `disposed`: writers that lost their slot (stale generation, or returned while a flush was
//!   collecting) but still hold unflushed records.
//!
//! [`SegmentWriterPool::flush()`] serializes under a dedicated flush mutex and proceeds in two
//! phases: snapshot and clear the tables, wait on a condvar until every borrowed writer has
//! been returned (such returns land in `disposed`), then flush every collected writer outside
//! all pool locks, since the store may block or re-enter. A writer that fails to flush goes
//! back to `disposed` together with the rest, so no records are ever silently dropped.


use crate::store::{SegmentStore, WriteError};
use crate::writer::SegmentBufferWriter;
use canopy_segment::layout::Generation;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, ThreadId};
use tracing::debug;

/// Writer ids roll over after this many writers.
const WRITER_ID_WRAP: u32 = 10000;

/// The current garbage-collection generation.
///
/// Compaction advances the counter; the writer pool consults it when borrowing, so writers
/// created before an advance are retired instead of reused.
#[derive(Debug, Default)]
pub struct GenerationCounter {
    current: AtomicU32,
}

impl GenerationCounter {
    /// Create new instance starting at `generation`.
    pub fn new(generation: Generation) -> Self {
        Self {
            current: AtomicU32::new(generation.as_u32()),
        }
    }

    /// The current generation.
    pub fn current(&self) -> Generation {
        Generation::new(self.current.load(Ordering::Relaxed))
    }

    /// Advance to the next generation and return it.
    pub fn advance(&self) -> Generation {
        Generation::new(self.current.fetch_add(1, Ordering::Relaxed)).next()
    }
}

#[derive(Debug)]
struct PoolState<S> {
    active: HashMap<ThreadId, SegmentBufferWriter<S>>,
    borrowed: HashSet<u64>,
    disposed: Vec<SegmentBufferWriter<S>>,
    next_writer_number: u32,
    shutdown: bool,
}

/// Thread-affine dispenser of buffered segment writers.
#[derive(Debug)]
pub struct SegmentWriterPool<S> {
    store: Arc<S>,
    pool_name: String,
    max_segment_size: usize,
    generations: Arc<GenerationCounter>,
    /// Serializes flushes
    flush_lock: Mutex<()>,
    /// Protects the writer tables
    state: Mutex<PoolState<S>>,
    /// Signalled whenever a writer is returned
    returned: Condvar,
}

impl<S> SegmentWriterPool<S>
where
    S: SegmentStore,
{
    /// Create new instance writing segments of at most `max_segment_size` bytes.
    pub fn new(
        store: Arc<S>,
        pool_name: impl Into<String>,
        generations: Arc<GenerationCounter>,
        max_segment_size: usize,
    ) -> Self {
        Self {
            store,
            pool_name: pool_name.into(),
            max_segment_size,
            generations,
            flush_lock: Mutex::new(()),
            state: Mutex::new(PoolState {
                active: HashMap::new(),
                borrowed: HashSet::new(),
                disposed: Vec::new(),
                next_writer_number: 0,
                shutdown: false,
            }),
            returned: Condvar::new(),
        }
    }

    /// The store this pool flushes into.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Borrow the calling thread's writer, minting a fresh one if the thread has none or its
    /// parked writer belongs to a stale generation.
    ///
    /// The writer returns to the pool when the guard drops, including during unwinding, so a
    /// flush never waits on a writer lost to a panicked operation.
    pub fn borrow(&self) -> Result<WriterGuard<'_, S>, WriteError> {
        let key = thread::current().id();
        let current_generation = self.generations.current();

        let mut state = self.state.lock();
        let writer = match state.active.remove(&key) {
            Some(writer) if writer.generation() == current_generation => writer,
            stale => {
                if let Some(stale) = stale {
                    debug!(
                        writer_id = stale.writer_id(),
                        generation = %stale.generation(),
                        "Disposing writer of a stale generation"
                    );
                    state.disposed.push(stale);
                }

                let number = state.next_writer_number;
                state.next_writer_number = (number + 1) % WRITER_ID_WRAP;
                let writer_id = format!("{}.{:04}", self.pool_name, number);
                SegmentBufferWriter::new(
                    Arc::clone(&self.store),
                    writer_id,
                    current_generation,
                    self.max_segment_size,
                )?
            }
        };
        state.borrowed.insert(writer.instance());

        Ok(WriterGuard {
            pool: self,
            key,
            writer: Some(writer),
        })
    }

    /// Borrow a writer, run `op` on it and return it, even when `op` fails.
    pub fn execute<T>(
        &self,
        op: impl FnOnce(&mut SegmentBufferWriter<S>) -> Result<T, WriteError>,
    ) -> Result<T, WriteError> {
        let mut writer = self.borrow()?;
        op(&mut writer)
    }

    /// Number of writers parked for reuse; for diagnostics.
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Number of writers awaiting a flush after losing their slot; for diagnostics.
    pub fn disposed_count(&self) -> usize {
        self.state.lock().disposed.len()
    }

    fn return_writer(&self, key: ThreadId, writer: SegmentBufferWriter<S>) {
        let mut state = self.state.lock();
        if state.borrowed.remove(&writer.instance()) {
            let previous = state.active.insert(key, writer);
            assert!(
                previous.is_none(),
                "Returned a writer into an already occupied slot"
            );
        } else {
            // A flush collected the tables while this writer was out on loan; hand it over
            state.disposed.push(writer);
        }
        self.returned.notify_all();
    }

    /// Flush every writer that is active or borrowed at the time of the call.
    ///
    /// Blocks until borrowed writers have been returned. Store writes happen outside all pool
    /// locks. After [`Self::shutdown()`] an ongoing wait is abandoned and the flush returns
    /// early without writing; the collected writers stay in `disposed` for a later flush.
    pub fn flush(&self) -> Result<(), WriteError> {
        let _flush_guard = self.flush_lock.lock();

        let mut to_flush;
        {
            let mut state = self.state.lock();
            to_flush = state.active.drain().map(|(_, writer)| writer).collect::<Vec<_>>();
            let awaited = mem::take(&mut state.borrowed);

            let cancelled = loop {
                let all_returned = awaited.iter().all(|instance| {
                    state
                        .disposed
                        .iter()
                        .any(|writer| writer.instance() == *instance)
                });
                if all_returned {
                    break false;
                }
                if state.shutdown {
                    break true;
                }
                self.returned.wait(&mut state);
            };

            if cancelled {
                state.disposed.append(&mut to_flush);
                return Ok(());
            }

            to_flush.append(&mut state.disposed);
        }

        // Store calls can block or re-enter the segment layer, so no pool lock is held here
        let mut remaining = to_flush.into_iter();
        while let Some(mut writer) = remaining.next() {
            if let Err(error) = writer.flush() {
                let mut state = self.state.lock();
                state.disposed.push(writer);
                state.disposed.extend(remaining);
                return Err(error);
            }
        }

        Ok(())
    }

    /// Cancel any flush waiting for borrowed writers, now and in the future.
    ///
    /// Terminal: later flushes skip the wait and drain whatever writers are present.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.returned.notify_all();
    }
}

/// Exclusive loan of a thread's writer; returns it to the pool on drop.
#[derive(Debug)]
pub struct WriterGuard<'a, S>
where
    S: SegmentStore,
{
    pool: &'a SegmentWriterPool<S>,
    key: ThreadId,
    writer: Option<SegmentBufferWriter<S>>,
}

impl<S> Deref for WriterGuard<'_, S>
where
    S: SegmentStore,
{
    type Target = SegmentBufferWriter<S>;

    fn deref(&self) -> &Self::Target {
        self.writer
            .as_ref()
            .expect("Writer is only taken on drop; qed")
    }
}

impl<S> DerefMut for WriterGuard<'_, S>
where
    S: SegmentStore,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.writer
            .as_mut()
            .expect("Writer is only taken on drop; qed")
    }
}

impl<S> Drop for WriterGuard<'_, S>
where
    S: SegmentStore,
{
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            self.pool.return_writer(self.key, writer);
        }
    }
}
