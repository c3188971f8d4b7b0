//! Fixed-capacity event storage
//!
//! The log is one boxed slice of slots allocated up front. Writers reserve
//! a slot with a single atomic increment-and-check on the record count, so
//! slot indices stay dense under concurrent writers and a full log rejects
//! writes without touching the count. Each slot publishes its contents
//! through `committed`, which holds `slot_index + 1` once the write is
//! visible (0 means empty or still being written).

use crate::error::TraceError;
use flowstamp_common::{EventRecord, Timeval};
use std::sync::atomic::{AtomicI64, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Slot {
    committed: AtomicU64,
    secs: AtomicI64,
    micros: AtomicU32,
    sequence: AtomicU32,
    worker_id: AtomicU32,
    repeat_count: AtomicU32,
    probe_id: AtomicU16,
}

impl Slot {
    fn store(&self, record: &EventRecord) {
        self.secs.store(record.timestamp.secs, Ordering::Relaxed);
        self.micros.store(record.timestamp.micros, Ordering::Relaxed);
        self.sequence.store(record.sequence, Ordering::Relaxed);
        self.worker_id.store(record.worker_id, Ordering::Relaxed);
        self.repeat_count.store(record.repeat_count, Ordering::Relaxed);
        self.probe_id.store(record.probe_id, Ordering::Relaxed);
        self.committed.store(record.slot_index + 1, Ordering::Release);
    }

    fn load(&self, index: u64) -> Option<EventRecord> {
        if self.committed.load(Ordering::Acquire) != index + 1 {
            return None;
        }
        Some(EventRecord {
            slot_index: index,
            timestamp: Timeval {
                secs: self.secs.load(Ordering::Relaxed),
                micros: self.micros.load(Ordering::Relaxed),
            },
            sequence: self.sequence.load(Ordering::Relaxed),
            worker_id: self.worker_id.load(Ordering::Relaxed),
            repeat_count: self.repeat_count.load(Ordering::Relaxed),
            probe_id: self.probe_id.load(Ordering::Relaxed),
        })
    }

    fn clear(&mut self) {
        *self = Slot::default();
    }
}

/// Preallocated, append-only record storage
pub struct EventLog {
    slots: Box<[Slot]>,
    len: AtomicUsize,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

impl EventLog {
    /// Allocate storage for `capacity` records
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| Slot::default()).collect();
        Self {
            slots,
            len: AtomicUsize::new(0),
        }
    }

    /// Bytes reserved for slot storage
    pub fn allocated_bytes(&self) -> usize {
        self.slots.len() * std::mem::size_of::<Slot>()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots handed out since the last reset
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Reserve the next free slot
    ///
    /// The capacity check and the increment are one atomic step; a full
    /// log returns `CapacityExhausted` and leaves the count untouched.
    #[inline]
    pub fn reserve(&self) -> Result<u64, TraceError> {
        let capacity = self.capacity();
        self.len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                (len < capacity).then_some(len + 1)
            })
            .map(|slot| slot as u64)
            .map_err(|_| TraceError::CapacityExhausted { capacity })
    }

    /// Write a record into the slot named by its `slot_index`
    ///
    /// The slot must have been obtained from [`EventLog::reserve`].
    #[inline]
    pub fn commit(&self, record: &EventRecord) {
        if let Some(slot) = usize::try_from(record.slot_index)
            .ok()
            .and_then(|index| self.slots.get(index))
        {
            slot.store(record);
        }
    }

    /// Reserve a slot and write one record into it, returning its index
    pub fn push(&self, mut record: EventRecord) -> Result<u64, TraceError> {
        record.slot_index = self.reserve()?;
        self.commit(&record);
        Ok(record.slot_index)
    }

    /// Read the record at `index`
    ///
    /// Fails with `NotFound` past the current count, and for a slot that
    /// another context has reserved but not finished writing.
    pub fn get(&self, index: usize) -> Result<EventRecord, TraceError> {
        let count = self.len();
        let not_found = TraceError::NotFound { index, count };
        if index >= count {
            return Err(not_found);
        }
        self.slots
            .get(index)
            .and_then(|slot| slot.load(index as u64))
            .ok_or(not_found)
    }

    /// Committed records in slot order
    pub fn iter(&self) -> impl Iterator<Item = EventRecord> + '_ {
        (0..self.len()).filter_map(move |index| self.get(index).ok())
    }

    /// Zero all storage and set the count back to zero
    ///
    /// Takes `&mut self`: no writer can be in flight while this runs.
    pub fn reset(&mut self) {
        let len = (*self.len.get_mut()).min(self.slots.len());
        for slot in self.slots.iter_mut().take(len) {
            slot.clear();
        }
        *self.len.get_mut() = 0;
    }
}
