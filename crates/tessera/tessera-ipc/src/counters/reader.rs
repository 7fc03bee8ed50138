use super::layout::{
    COUNTER_LENGTH, CounterState, FREE_FOR_REUSE_DEADLINE_OFFSET, KEY_OFFSET, LABEL_OFFSET,
    MAX_KEY_LENGTH, METADATA_TO_VALUES_RATIO, RECORD_ALLOCATED, RECORD_UNUSED, TYPE_ID_OFFSET,
    counter_offset, metadata_offset,
};
use crate::atomic_buffer::AtomicBuffer;
use crate::bits::ATOMIC_ALIGNMENT;
use crate::error::{IpcError, IpcResult};

/// Read-only access to a counters region.
///
/// Cheap to copy and safe to share between threads; any process that maps
/// the region can build one next to the process that owns the manager.
#[derive(Debug, Clone, Copy)]
pub struct CountersReader<'a> {
    metadata: AtomicBuffer<'a>,
    values: AtomicBuffer<'a>,
    max_counter_id: i32,
}

impl<'a> CountersReader<'a> {
    /// # Errors
    /// - `RegionTooShort` if `values` cannot hold one counter or `metadata`
    ///   is smaller than four times `values`
    /// - `Misaligned` if either region is not 8-byte aligned
    pub fn new(metadata: AtomicBuffer<'a>, values: AtomicBuffer<'a>) -> IpcResult<Self> {
        if values.capacity() < COUNTER_LENGTH {
            return Err(IpcError::RegionTooShort {
                required: COUNTER_LENGTH,
                actual: values.capacity(),
            });
        }
        let required = values.capacity() * METADATA_TO_VALUES_RATIO;
        if metadata.capacity() < required {
            return Err(IpcError::RegionTooShort {
                required,
                actual: metadata.capacity(),
            });
        }
        metadata.check_alignment(ATOMIC_ALIGNMENT)?;
        values.check_alignment(ATOMIC_ALIGNMENT)?;

        Ok(Self {
            metadata,
            values,
            max_counter_id: (values.capacity() / COUNTER_LENGTH) as i32 - 1,
        })
    }

    /// Highest id the region has room for.
    #[inline]
    pub fn max_counter_id(&self) -> i32 {
        self.max_counter_id
    }

    #[inline]
    pub fn metadata_buffer(&self) -> &AtomicBuffer<'a> {
        &self.metadata
    }

    #[inline]
    pub fn values_buffer(&self) -> &AtomicBuffer<'a> {
        &self.values
    }

    pub(crate) fn check_id(&self, id: i32) -> IpcResult<()> {
        if id < 0 || id > self.max_counter_id {
            return Err(IpcError::CounterIdOutOfRange {
                id,
                max: self.max_counter_id,
            });
        }
        Ok(())
    }

    /// Offset of `id`'s metadata record.
    ///
    /// # Panics
    /// Panics if `id` is outside `0..=max_counter_id`.
    #[inline]
    fn metadata_offset_of(&self, id: i32) -> usize {
        if let Err(e) = self.check_id(id) {
            panic!("{e}");
        }
        metadata_offset(id)
    }

    /// Current value of counter `id`.
    ///
    /// # Panics
    /// Panics if `id` is outside `0..=max_counter_id`.
    #[inline]
    pub fn counter_value(&self, id: i32) -> i64 {
        if let Err(e) = self.check_id(id) {
            panic!("{e}");
        }
        self.values.get_i64_volatile(counter_offset(id))
    }

    /// `None` if the slot holds a state this version does not know.
    ///
    /// # Panics
    /// Panics if `id` is outside `0..=max_counter_id`, as do the other
    /// per-id accessors below.
    pub fn counter_state(&self, id: i32) -> Option<CounterState> {
        CounterState::from_raw(self.metadata.get_i32_volatile(self.metadata_offset_of(id)))
    }

    pub fn counter_type_id(&self, id: i32) -> i32 {
        self.metadata.get_i32(self.metadata_offset_of(id) + TYPE_ID_OFFSET)
    }

    pub fn counter_label(&self, id: i32) -> String {
        self.metadata.get_string(self.metadata_offset_of(id) + LABEL_OFFSET)
    }

    /// Key bytes of counter `id`, zero padded to the full key length.
    pub fn counter_key(&self, id: i32) -> AtomicBuffer<'a> {
        self.metadata
            .view(self.metadata_offset_of(id) + KEY_OFFSET, MAX_KEY_LENGTH)
    }

    /// Epoch ms after which a freed counter may be handed out again.
    pub fn free_for_reuse_deadline(&self, id: i32) -> i64 {
        self.metadata
            .get_i64_volatile(self.metadata_offset_of(id) + FREE_FOR_REUSE_DEADLINE_OFFSET)
    }

    /// Visits every allocated counter in id order with its label.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(i32, &str),
    {
        self.for_each_metadata(|id, _, _, label| f(id, label));
    }

    /// Visits every allocated counter in id order with its type id, key and
    /// label. Stops at the first slot that was never allocated.
    pub fn for_each_metadata<F>(&self, mut f: F)
    where
        F: FnMut(i32, i32, &AtomicBuffer<'a>, &str),
    {
        for id in 0..=self.max_counter_id {
            let offset = metadata_offset(id);
            let state = self.metadata.get_i32_volatile(offset);
            if state == RECORD_UNUSED {
                break;
            }
            if state != RECORD_ALLOCATED {
                continue;
            }

            let type_id = self.metadata.get_i32(offset + TYPE_ID_OFFSET);
            let key = self.counter_key(id);
            let label = self.counter_label(id);
            f(id, type_id, &key, &label);
        }
    }
}
