use super::atomic_counter::AtomicCounter;
use super::clock::{EpochClock, SystemEpochClock};
use super::layout::{
    DEFAULT_TYPE_ID, FREE_FOR_REUSE_DEADLINE_OFFSET, KEY_OFFSET, LABEL_OFFSET, MAX_KEY_LENGTH,
    MAX_LABEL_LENGTH, NOT_FREE_TO_REUSE, RECORD_ALLOCATED, RECORD_RECLAIMED, TYPE_ID_OFFSET,
    counter_offset, metadata_offset,
};
use super::reader::CountersReader;
use crate::atomic_buffer::AtomicBuffer;
use crate::error::{IpcError, IpcResult};
use std::collections::VecDeque;
use std::mem::ManuallyDrop;
use std::time::Duration;
use tracing::{debug, warn};

/// Allocates and frees counters in a pair of metadata and values regions.
///
/// Exactly one manager may own a region. Allocation and freeing go through
/// `&mut self`; values can be read and written concurrently by anyone holding
/// a [`CountersReader`] or an [`AtomicCounter`].
///
/// A freed id is not handed out again until its reuse deadline,
/// `free time + reuse_timeout`, has passed. Readers that cached the id keep
/// seeing a reclaimed slot instead of someone else's counter until then.
pub struct CountersManager<'a, C: EpochClock = SystemEpochClock> {
    reader: CountersReader<'a>,
    clock: C,
    reuse_timeout_ms: i64,
    high_water_mark_id: i32,
    free_list: VecDeque<i32>,
}

impl<'a> CountersManager<'a> {
    /// Manager on the system clock with immediate reuse of freed ids.
    pub fn new(metadata: AtomicBuffer<'a>, values: AtomicBuffer<'a>) -> IpcResult<Self> {
        Self::with_clock(metadata, values, SystemEpochClock, Duration::ZERO)
    }
}

impl<'a, C: EpochClock> CountersManager<'a, C> {
    /// # Errors
    /// Same region checks as [`CountersReader::new`].
    pub fn with_clock(
        metadata: AtomicBuffer<'a>,
        values: AtomicBuffer<'a>,
        clock: C,
        reuse_timeout: Duration,
    ) -> IpcResult<Self> {
        let reader = CountersReader::new(metadata, values)?;
        debug!(
            max_counter_id = reader.max_counter_id(),
            reuse_timeout_ms = reuse_timeout.as_millis() as u64,
            "counters manager attached"
        );

        Ok(Self {
            reader,
            clock,
            reuse_timeout_ms: i64::try_from(reuse_timeout.as_millis()).unwrap_or(i64::MAX),
            high_water_mark_id: -1,
            free_list: VecDeque::new(),
        })
    }

    /// A reader over the same regions.
    #[inline]
    pub fn reader(&self) -> CountersReader<'a> {
        self.reader
    }

    #[inline]
    pub fn max_counter_id(&self) -> i32 {
        self.reader.max_counter_id()
    }

    /// Allocates a counter with the default type id and an empty key.
    pub fn allocate(&mut self, label: &str) -> IpcResult<i32> {
        self.allocate_with(DEFAULT_TYPE_ID, label, |_| {})
    }

    /// Allocates a counter, letting `key_writer` fill its zeroed key bytes.
    ///
    /// Labels longer than the slot allows are truncated on a char boundary.
    ///
    /// # Errors
    /// - `InvalidTypeId` if `type_id` is negative
    /// - `CountersExhausted` if every id is allocated or still waiting out
    ///   its reuse deadline
    pub fn allocate_with<F>(&mut self, type_id: i32, label: &str, key_writer: F) -> IpcResult<i32>
    where
        F: FnOnce(AtomicBuffer<'a>),
    {
        if type_id < 0 {
            return Err(IpcError::InvalidTypeId { type_id });
        }

        let id = self.next_counter_id()?;
        let metadata = *self.reader.metadata_buffer();
        let offset = metadata_offset(id);
        let pending = PendingAllocation { manager: self, id };

        metadata.put_i32(offset + TYPE_ID_OFFSET, type_id);
        metadata.put_i64(offset + FREE_FOR_REUSE_DEADLINE_OFFSET, NOT_FREE_TO_REUSE);

        let key = metadata.view(offset + KEY_OFFSET, MAX_KEY_LENGTH);
        key.set_memory(0, MAX_KEY_LENGTH, 0);
        key_writer(key);

        let written = metadata.put_string(offset + LABEL_OFFSET, label, MAX_LABEL_LENGTH);
        if written < label.len() {
            warn!(id, written, length = label.len(), "counter label truncated");
        }

        metadata.put_i32_ordered(offset, RECORD_ALLOCATED);
        let _ = ManuallyDrop::new(pending);
        debug!(id, type_id, label, "counter allocated");

        Ok(id)
    }

    /// Allocates a counter and wraps it for direct value access.
    pub fn new_counter(&mut self, label: &str, type_id: i32) -> IpcResult<AtomicCounter<'a>> {
        let id = self.allocate_with(type_id, label, |_| {})?;
        Ok(AtomicCounter::new(*self.reader.values_buffer(), id))
    }

    /// Returns `id` to the pool once its reuse deadline passes.
    ///
    /// # Errors
    /// - `CounterIdOutOfRange` if `id` is outside the region
    /// - `CounterNotAllocated` if `id` is not currently allocated
    pub fn free(&mut self, id: i32) -> IpcResult<()> {
        self.reader.check_id(id)?;

        let metadata = *self.reader.metadata_buffer();
        let offset = metadata_offset(id);
        if metadata.get_i32_volatile(offset) != RECORD_ALLOCATED {
            return Err(IpcError::CounterNotAllocated { id });
        }

        let deadline = self
            .clock
            .time_ms()
            .saturating_add(self.reuse_timeout_ms);
        metadata.put_i64(offset + FREE_FOR_REUSE_DEADLINE_OFFSET, deadline);
        metadata.put_i32_ordered(offset, RECORD_RECLAIMED);
        self.free_list.push_back(id);

        debug!(id, deadline, "counter freed");
        Ok(())
    }

    /// # Panics
    /// Panics if `id` is outside `0..=max_counter_id`.
    #[inline]
    pub fn set_counter_value(&self, id: i32, value: i64) {
        if let Err(e) = self.reader.check_id(id) {
            panic!("{e}");
        }
        self.reader
            .values_buffer()
            .put_i64_ordered(counter_offset(id), value);
    }

    /// # Panics
    /// Panics if `id` is outside `0..=max_counter_id`.
    #[inline]
    pub fn counter_value(&self, id: i32) -> i64 {
        self.reader.counter_value(id)
    }

    pub fn for_each<F>(&self, f: F)
    where
        F: FnMut(i32, &str),
    {
        self.reader.for_each(f);
    }

    pub fn for_each_metadata<F>(&self, f: F)
    where
        F: FnMut(i32, i32, &AtomicBuffer<'a>, &str),
    {
        self.reader.for_each_metadata(f);
    }

    /// Oldest freed id past its deadline, else the next never-used id.
    fn next_counter_id(&mut self) -> IpcResult<i32> {
        let now = self.clock.time_ms();
        let reusable = self
            .free_list
            .iter()
            .position(|&id| now >= self.reader.free_for_reuse_deadline(id));

        if let Some(id) = reusable.and_then(|index| self.free_list.remove(index)) {
            self.set_counter_value(id, 0);
            return Ok(id);
        }

        if self.high_water_mark_id >= self.reader.max_counter_id() {
            warn!(
                max_counter_id = self.reader.max_counter_id(),
                pending_reuse = self.free_list.len(),
                "counters exhausted"
            );
            return Err(IpcError::CountersExhausted {
                max: self.reader.max_counter_id(),
            });
        }

        self.high_water_mark_id += 1;
        let id = self.high_water_mark_id;
        self.set_counter_value(id, 0);
        Ok(id)
    }
}

/// An id taken for allocation whose record is not published yet.
///
/// Dropping it before publication, as when the key writer panics, hands the
/// id back as a reclaimed slot that is immediately reusable. Iteration then
/// steps over the slot instead of stopping at it.
struct PendingAllocation<'m, 'a, C: EpochClock> {
    manager: &'m mut CountersManager<'a, C>,
    id: i32,
}

impl<C: EpochClock> Drop for PendingAllocation<'_, '_, C> {
    fn drop(&mut self) {
        let manager = &mut *self.manager;
        let metadata = *manager.reader.metadata_buffer();
        let offset = metadata_offset(self.id);

        metadata.put_i64(
            offset + FREE_FOR_REUSE_DEADLINE_OFFSET,
            manager.clock.time_ms(),
        );
        metadata.put_i32_ordered(offset, RECORD_RECLAIMED);
        manager.free_list.push_front(self.id);

        warn!(id = self.id, "counter allocation abandoned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic_buffer::AlignedBuffer;
    use crate::counters::layout::{COUNTER_LENGTH, CounterState, METADATA_LENGTH};
    use std::cell::Cell;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    struct Regions {
        metadata: AlignedBuffer,
        values: AlignedBuffer,
    }

    fn regions(counters: usize) -> Regions {
        Regions {
            metadata: AlignedBuffer::new(counters * METADATA_LENGTH),
            values: AlignedBuffer::new(counters * COUNTER_LENGTH),
        }
    }

    fn labels<C: EpochClock>(manager: &CountersManager<'_, C>) -> Vec<(i32, String)> {
        let mut out = Vec::new();
        manager.for_each(|id, label| out.push((id, label.to_string())));
        out
    }

    #[test]
    fn allocate_then_set_and_read_value() {
        let r = regions(8);
        let mut manager =
            CountersManager::new(r.metadata.atomic_buffer(), r.values.atomic_buffer()).unwrap();

        let id = manager.allocate("x").unwrap();
        manager.set_counter_value(id, 7);

        assert_eq!(manager.counter_value(id), 7);
        assert_eq!(labels(&manager), vec![(id, "x".to_string())]);
        assert_eq!(manager.reader().counter_state(id), Some(CounterState::Allocated));
    }

    #[test]
    fn ids_are_handed_out_densely() {
        let r = regions(8);
        let mut manager =
            CountersManager::new(r.metadata.atomic_buffer(), r.values.atomic_buffer()).unwrap();

        assert_eq!(manager.allocate("a").unwrap(), 0);
        assert_eq!(manager.allocate("b").unwrap(), 1);
        assert_eq!(manager.allocate("c").unwrap(), 2);
        assert_eq!(
            labels(&manager),
            vec![
                (0, "a".to_string()),
                (1, "b".to_string()),
                (2, "c".to_string())
            ]
        );
    }

    #[test]
    fn freed_id_is_hidden_then_reused() {
        let r = regions(8);
        let mut manager =
            CountersManager::new(r.metadata.atomic_buffer(), r.values.atomic_buffer()).unwrap();

        let a = manager.allocate("a").unwrap();
        let b = manager.allocate("b").unwrap();
        manager.set_counter_value(a, 99);
        manager.free(a).unwrap();

        assert_eq!(labels(&manager), vec![(b, "b".to_string())]);
        assert_eq!(manager.reader().counter_state(a), Some(CounterState::Reclaimed));

        let reused = manager.allocate("c").unwrap();
        assert_eq!(reused, a);
        assert_eq!(manager.counter_value(reused), 0);
        assert_eq!(
            labels(&manager),
            vec![(a, "c".to_string()), (b, "b".to_string())]
        );
    }

    #[test]
    fn reuse_waits_for_deadline() {
        let r = regions(8);
        let now = Rc::new(Cell::new(1_000i64));
        let clock = {
            let now = Rc::clone(&now);
            move || now.get()
        };
        let mut manager = CountersManager::with_clock(
            r.metadata.atomic_buffer(),
            r.values.atomic_buffer(),
            clock,
            Duration::from_millis(1_000),
        )
        .unwrap();

        let a = manager.allocate("a").unwrap();
        manager.free(a).unwrap();
        assert_eq!(manager.reader().free_for_reuse_deadline(a), 2_000);

        now.set(1_999);
        assert_eq!(manager.allocate("b").unwrap(), 1);

        now.set(2_000);
        assert_eq!(manager.allocate("c").unwrap(), a);
        assert_eq!(manager.reader().free_for_reuse_deadline(a), NOT_FREE_TO_REUSE);
    }

    #[test]
    fn exhausted_region_reports_error() {
        let r = regions(2);
        let mut manager =
            CountersManager::new(r.metadata.atomic_buffer(), r.values.atomic_buffer()).unwrap();

        manager.allocate("a").unwrap();
        manager.allocate("b").unwrap();
        assert!(matches!(
            manager.allocate("c"),
            Err(IpcError::CountersExhausted { max: 1 })
        ));
    }

    #[test]
    fn free_rejects_bad_ids() {
        let r = regions(2);
        let mut manager =
            CountersManager::new(r.metadata.atomic_buffer(), r.values.atomic_buffer()).unwrap();

        assert!(matches!(
            manager.free(2),
            Err(IpcError::CounterIdOutOfRange { id: 2, max: 1 })
        ));
        assert!(matches!(
            manager.free(0),
            Err(IpcError::CounterNotAllocated { id: 0 })
        ));

        let id = manager.allocate("a").unwrap();
        manager.free(id).unwrap();
        assert!(matches!(
            manager.free(id),
            Err(IpcError::CounterNotAllocated { .. })
        ));
    }

    #[test]
    fn key_and_type_id_are_visible_to_readers() {
        let r = regions(4);
        let mut manager =
            CountersManager::new(r.metadata.atomic_buffer(), r.values.atomic_buffer()).unwrap();

        let id = manager
            .allocate_with(5, "keyed", |key| key.put_i64(0, 42))
            .unwrap();

        let mut seen = Vec::new();
        manager.for_each_metadata(|id, type_id, key, label| {
            seen.push((id, type_id, key.get_i64(0), key.get_i64(8), label.to_string()));
        });
        assert_eq!(seen, vec![(id, 5, 42, 0, "keyed".to_string())]);
        assert_eq!(manager.reader().counter_type_id(id), 5);
    }

    #[test]
    fn negative_type_id_is_rejected() {
        let r = regions(2);
        let mut manager =
            CountersManager::new(r.metadata.atomic_buffer(), r.values.atomic_buffer()).unwrap();
        assert!(matches!(
            manager.allocate_with(-3, "bad", |_| {}),
            Err(IpcError::InvalidTypeId { type_id: -3 })
        ));
        assert!(labels(&manager).is_empty());
    }

    #[test]
    fn long_label_is_truncated_on_char_boundary() {
        let r = regions(2);
        let mut manager =
            CountersManager::new(r.metadata.atomic_buffer(), r.values.atomic_buffer()).unwrap();

        let label = "é".repeat(200);
        let id = manager.allocate(&label).unwrap();
        let stored = manager.reader().counter_label(id);
        assert_eq!(stored.len(), MAX_LABEL_LENGTH);
        assert!(label.starts_with(&stored));
    }

    #[test]
    fn new_counter_shares_value_slot() {
        let r = regions(2);
        let mut manager =
            CountersManager::new(r.metadata.atomic_buffer(), r.values.atomic_buffer()).unwrap();

        let counter = manager.new_counter("hits", 3).unwrap();
        counter.increment();
        counter.increment();
        assert_eq!(manager.counter_value(counter.id()), 2);
        assert_eq!(manager.reader().counter_type_id(counter.id()), 3);
    }

    #[test]
    fn panicking_key_writer_leaves_iteration_intact() {
        let r = regions(4);
        let mut manager =
            CountersManager::new(r.metadata.atomic_buffer(), r.values.atomic_buffer()).unwrap();

        let first = manager.allocate("first").unwrap();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            manager.allocate_with(1, "broken", |_| panic!("key writer failed"))
        }));
        assert!(outcome.is_err());
        assert_eq!(manager.reader().counter_state(1), Some(CounterState::Reclaimed));
        assert_eq!(labels(&manager), vec![(first, "first".to_string())]);

        let retried = manager.allocate("retried").unwrap();
        let after = manager.allocate("after").unwrap();
        assert_eq!(retried, 1);
        assert_eq!(after, 2);
        assert_eq!(
            labels(&manager),
            vec![
                (first, "first".to_string()),
                (retried, "retried".to_string()),
                (after, "after".to_string())
            ]
        );
    }

    #[test]
    #[should_panic(expected = "counter id -1 out of range")]
    fn set_value_rejects_negative_id() {
        let r = regions(2);
        let manager =
            CountersManager::new(r.metadata.atomic_buffer(), r.values.atomic_buffer()).unwrap();
        manager.set_counter_value(-1, 5);
    }
}
