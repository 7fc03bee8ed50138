use super::descriptor::{
    LATEST_COUNTER_OFFSET, TAIL_COUNTER_OFFSET, TAIL_INTENT_COUNTER_OFFSET, TRAILER_LENGTH,
};
use crate::atomic_buffer::AtomicBuffer;
use crate::bits::{align, position_to_index};
use crate::error::{IpcError, IpcResult};
use crate::record::{
    HEADER_LENGTH, PADDING_MSG_TYPE_ID, RECORD_ALIGNMENT, check_region, encoded_msg_offset,
    length_offset, max_msg_length, type_offset,
};
use std::sync::atomic::{Ordering, fence};

/// The single writer of a broadcast log.
///
/// There is no backpressure: the transmitter overwrites whatever is in its
/// way and receivers that fall a full capacity behind are lapped.
///
/// # Single-Producer Guarantee
/// `transmit` takes `&mut self`, which rules out two writers in one process.
/// Across processes only one transmitter may be attached to a log.
pub struct BroadcastTransmitter<'a> {
    buffer: AtomicBuffer<'a>,
    capacity: usize,
    mask: i64,
    max_msg_length: usize,
    tail_intent_counter_index: usize,
    tail_counter_index: usize,
    latest_counter_index: usize,
}

impl<'a> BroadcastTransmitter<'a> {
    /// Lays a broadcast log over `buffer`, whose length must be a power of two
    /// plus the trailer length.
    ///
    /// # Errors
    /// Same configuration checks as the ring buffer.
    pub fn new(buffer: AtomicBuffer<'a>) -> IpcResult<Self> {
        let capacity = check_region(&buffer, TRAILER_LENGTH)?;

        Ok(Self {
            buffer,
            capacity,
            mask: capacity as i64 - 1,
            max_msg_length: max_msg_length(capacity),
            tail_intent_counter_index: capacity + TAIL_INTENT_COUNTER_OFFSET,
            tail_counter_index: capacity + TAIL_COUNTER_OFFSET,
            latest_counter_index: capacity + LATEST_COUNTER_OFFSET,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn max_msg_length(&self) -> usize {
        self.max_msg_length
    }

    /// Appends a message to the log.
    ///
    /// # Errors
    /// - `InvalidTypeId` if `msg_type_id < 1`
    /// - `MessageTooLong` if `src` exceeds [`max_msg_length`](Self::max_msg_length)
    ///
    /// Nothing is written when an error is returned.
    pub fn transmit(&mut self, msg_type_id: i32, src: &[u8]) -> IpcResult<()> {
        if msg_type_id < 1 {
            return Err(IpcError::InvalidTypeId {
                type_id: msg_type_id,
            });
        }
        if src.len() > self.max_msg_length {
            return Err(IpcError::MessageTooLong {
                length: src.len(),
                max: self.max_msg_length,
            });
        }

        let mut current_tail = self.buffer.get_i64(self.tail_counter_index);
        let mut record_offset = position_to_index(current_tail, self.mask);
        let record_length = HEADER_LENGTH + src.len();
        let aligned_record_length = align(record_length, RECORD_ALIGNMENT) as i64;
        let new_tail = current_tail + aligned_record_length;

        let to_end_of_buffer = (self.capacity - record_offset) as i64;
        if to_end_of_buffer < aligned_record_length {
            self.signal_tail_intent(new_tail + to_end_of_buffer);

            self.buffer.put_i32(
                length_offset(record_offset),
                to_end_of_buffer as i32,
            );
            self.buffer
                .put_i32(type_offset(record_offset), PADDING_MSG_TYPE_ID);

            current_tail += to_end_of_buffer;
            record_offset = 0;
        } else {
            self.signal_tail_intent(new_tail);
        }

        self.buffer
            .put_i32(length_offset(record_offset), record_length as i32);
        self.buffer.put_i32(type_offset(record_offset), msg_type_id);
        self.buffer.put_bytes(encoded_msg_offset(record_offset), src);

        self.buffer.put_i64(self.latest_counter_index, current_tail);
        self.buffer.put_i64_ordered(
            self.tail_counter_index,
            current_tail + aligned_record_length,
        );

        Ok(())
    }

    /// Announces the tail the write in progress will reach, ahead of any of
    /// its bytes.
    #[inline]
    fn signal_tail_intent(&self, new_tail: i64) {
        self.buffer
            .put_i64_ordered(self.tail_intent_counter_index, new_tail);
        fence(Ordering::Release);
    }
}
