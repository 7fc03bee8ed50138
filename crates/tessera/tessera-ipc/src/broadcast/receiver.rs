use super::descriptor::{
    LATEST_COUNTER_OFFSET, TAIL_COUNTER_OFFSET, TAIL_INTENT_COUNTER_OFFSET, TRAILER_LENGTH,
};
use crate::atomic_buffer::AtomicBuffer;
use crate::bits::{align, position_to_index};
use crate::error::IpcResult;
use crate::record::{
    HEADER_LENGTH, PADDING_MSG_TYPE_ID, RECORD_ALIGNMENT, check_region, encoded_msg_offset,
    length_offset, type_offset,
};
use std::sync::atomic::{Ordering, fence};

/// Where a new receiver begins reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverStart {
    /// Position 0. A receiver attached to a log that already wrapped is
    /// lapped on its first read.
    #[default]
    Origin,
    /// The most recently transmitted record.
    Latest,
    /// Only records transmitted after construction.
    Tail,
}

/// One reader of a broadcast log.
///
/// Readers never write to the log and keep their cursor locally, so any number
/// of them can trail a transmitter. A reader that falls a full capacity behind
/// is lapped: it jumps to the latest record and counts the event.
///
/// Reading is two-phase. After `receive_next` returns `true` the record is
/// accessed in place, then `validate` tells whether the transmitter may have
/// overwritten it meanwhile.
pub struct BroadcastReceiver<'a> {
    buffer: AtomicBuffer<'a>,
    capacity: usize,
    mask: i64,
    tail_intent_counter_index: usize,
    tail_counter_index: usize,
    latest_counter_index: usize,
    cursor: i64,
    next_record: i64,
    record_offset: usize,
    lapped_count: u64,
}

impl<'a> BroadcastReceiver<'a> {
    /// Attaches a receiver to the log laid over `buffer`.
    pub fn new(buffer: AtomicBuffer<'a>, start: ReceiverStart) -> IpcResult<Self> {
        let capacity = check_region(&buffer, TRAILER_LENGTH)?;
        let mask = capacity as i64 - 1;
        let tail_counter_index = capacity + TAIL_COUNTER_OFFSET;
        let latest_counter_index = capacity + LATEST_COUNTER_OFFSET;

        let cursor = match start {
            ReceiverStart::Origin => 0,
            ReceiverStart::Latest => buffer.get_i64_volatile(latest_counter_index),
            ReceiverStart::Tail => buffer.get_i64_volatile(tail_counter_index),
        };

        Ok(Self {
            buffer,
            capacity,
            mask,
            tail_intent_counter_index: capacity + TAIL_INTENT_COUNTER_OFFSET,
            tail_counter_index,
            latest_counter_index,
            cursor,
            next_record: cursor,
            record_offset: position_to_index(cursor, mask),
            lapped_count: 0,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Times this receiver has been lapped by the transmitter.
    #[inline]
    pub fn lapped_count(&self) -> u64 {
        self.lapped_count
    }

    /// Type id of the current record.
    #[inline]
    pub fn type_id(&self) -> i32 {
        self.buffer.get_i32(type_offset(self.record_offset))
    }

    /// Offset of the current payload within [`buffer`](Self::buffer).
    #[inline]
    pub fn offset(&self) -> usize {
        encoded_msg_offset(self.record_offset)
    }

    /// Length of the current payload.
    #[inline]
    pub fn length(&self) -> usize {
        let length = self.buffer.get_i32(length_offset(self.record_offset)).max(0);
        (length as usize).saturating_sub(HEADER_LENGTH)
    }

    #[inline]
    pub fn buffer(&self) -> &AtomicBuffer<'a> {
        &self.buffer
    }

    /// Moves to the next record if one is available.
    ///
    /// Padding is skipped within the same call. If the transmitter has lapped
    /// this receiver it resumes at the latest record and
    /// [`lapped_count`](Self::lapped_count) grows by one.
    pub fn receive_next(&mut self) -> bool {
        let tail = self.buffer.get_i64_volatile(self.tail_counter_index);
        let mut cursor = self.next_record;

        if tail <= cursor {
            return false;
        }

        if !self.is_valid_at(cursor) {
            self.lapped_count += 1;
            cursor = self.buffer.get_i64(self.latest_counter_index);
        }
        self.record_offset = position_to_index(cursor, self.mask);
        self.cursor = cursor;
        self.next_record = cursor + self.aligned_length_at(self.record_offset);

        if self.buffer.get_i32(type_offset(self.record_offset)) == PADDING_MSG_TYPE_ID {
            self.record_offset = 0;
            self.cursor = self.next_record;
            self.next_record += self.aligned_length_at(0);
        }

        true
    }

    /// Whether the record most recently returned by `receive_next` is still
    /// intact. Check it after reading the bytes and discard them on `false`.
    pub fn validate(&self) -> bool {
        fence(Ordering::Acquire);
        self.is_valid_at(self.cursor)
    }

    #[inline]
    fn is_valid_at(&self, cursor: i64) -> bool {
        cursor + self.capacity as i64
            > self.buffer.get_i64_volatile(self.tail_intent_counter_index)
    }

    #[inline]
    fn aligned_length_at(&self, record_offset: usize) -> i64 {
        let length = self.buffer.get_i32(length_offset(record_offset)).max(0) as usize;
        align(length, RECORD_ALIGNMENT) as i64
    }
}
