use super::layout::counter_offset;
use crate::atomic_buffer::AtomicBuffer;

/// Handle on one counter's value slot.
///
/// Freeing goes through the manager that allocated it:
/// `manager.free(counter.id())`.
#[derive(Debug, Clone, Copy)]
pub struct AtomicCounter<'a> {
    values: AtomicBuffer<'a>,
    id: i32,
    offset: usize,
}

impl<'a> AtomicCounter<'a> {
    /// Wraps counter `id` in a values region.
    ///
    /// # Panics
    /// Panics if `id` is negative or the slot lies outside `values`.
    pub fn new(values: AtomicBuffer<'a>, id: i32) -> Self {
        assert!(id >= 0, "counter id {id} is negative");
        let offset = counter_offset(id);
        // Touch the slot once so a bad id fails here, not on first use.
        values.get_i64(offset);
        Self { values, id, offset }
    }

    #[inline]
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Acquire load.
    #[inline]
    pub fn get(&self) -> i64 {
        self.values.get_i64_volatile(self.offset)
    }

    /// Relaxed load.
    #[inline]
    pub fn get_weak(&self) -> i64 {
        self.values.get_i64(self.offset)
    }

    /// Release store.
    #[inline]
    pub fn set(&self, value: i64) {
        self.values.put_i64_ordered(self.offset, value);
    }

    /// Relaxed store.
    #[inline]
    pub fn set_weak(&self, value: i64) {
        self.values.put_i64(self.offset, value);
    }

    /// Adds one and returns the previous value.
    #[inline]
    pub fn increment(&self) -> i64 {
        self.values.get_and_add_i64(self.offset, 1)
    }

    /// Adds `delta` and returns the previous value.
    #[inline]
    pub fn get_and_add(&self, delta: i64) -> i64 {
        self.values.get_and_add_i64(self.offset, delta)
    }

    /// Raises the value to `proposed` if that is larger. Returns whether it
    /// changed.
    pub fn propose_max(&self, proposed: i64) -> bool {
        let mut current = self.get();
        while proposed > current {
            if self
                .values
                .compare_and_set_i64(self.offset, current, proposed)
            {
                return true;
            }
            current = self.get();
        }
        false
    }
}
