//! Many-producer, single-consumer ring buffer over a shared region.
//!
//! # Protocol
//!
//! **Producers** (any number, any thread or process):
//! 1. Claim `align(HEADER_LENGTH + length, RECORD_ALIGNMENT)` bytes by CAS on
//!    the tail, plus a padding record if the claim would wrap
//! 2. Store the record length negated (claimed, not committed)
//! 3. Write payload and type id
//! 4. Store the positive length with Release ordering (commit)
//!
//! **Consumer** (exactly one):
//! 1. Acquire-load the length at the head; zero or negative ends the pass
//! 2. Deliver the record unless it is padding
//! 3. Zero the consumed bytes, then Release-store the new head
//!
//! A failed CAS is retried internally. A full buffer or oversized message
//! makes `write` return `false`; nothing is thrown on the hot path.

mod descriptor;

pub use descriptor::{
    CONSUMER_HEARTBEAT_OFFSET, CORRELATION_COUNTER_OFFSET, HEAD_CACHE_POSITION_OFFSET,
    HEAD_POSITION_OFFSET, TAIL_POSITION_OFFSET, TRAILER_LENGTH,
};

use crate::atomic_buffer::AtomicBuffer;
use crate::bits::{align, position_to_index};
use crate::error::IpcResult;
use crate::record::{
    HEADER_LENGTH, PADDING_MSG_TYPE_ID, RECORD_ALIGNMENT, check_region, encoded_msg_offset,
    length_offset, max_msg_length, type_offset,
};
use std::mem::ManuallyDrop;
use std::sync::atomic::{Ordering, fence};
use tracing::warn;

/// A bounded MPSC queue of typed, variable-length messages.
///
/// `write`, `try_claim` and `next_correlation_id` may be called from any
/// number of threads. `read` and `unblock` belong to the single consumer:
/// calling them concurrently from two threads corrupts the queue.
pub struct ManyToOneRingBuffer<'a> {
    buffer: AtomicBuffer<'a>,
    capacity: usize,
    mask: i64,
    max_msg_length: usize,
    tail_position_index: usize,
    head_cache_position_index: usize,
    head_position_index: usize,
    correlation_id_counter_index: usize,
    consumer_heartbeat_index: usize,
}

impl<'a> ManyToOneRingBuffer<'a> {
    /// Lays a ring buffer over `buffer`, whose length must be a power of two
    /// plus [`TRAILER_LENGTH`].
    ///
    /// # Errors
    /// - `RegionTooShort` if the buffer cannot hold the trailer and one record
    /// - `CapacityNotPowerOfTwo` if the data section is not a power of two
    /// - `CapacityTooLarge` if the data section exceeds [`MAX_CAPACITY`](crate::MAX_CAPACITY)
    /// - `Misaligned` if the base address is not 8-byte aligned
    pub fn new(buffer: AtomicBuffer<'a>) -> IpcResult<Self> {
        let capacity = check_region(&buffer, TRAILER_LENGTH)?;

        Ok(Self {
            buffer,
            capacity,
            mask: capacity as i64 - 1,
            max_msg_length: max_msg_length(capacity),
            tail_position_index: capacity + TAIL_POSITION_OFFSET,
            head_cache_position_index: capacity + HEAD_CACHE_POSITION_OFFSET,
            head_position_index: capacity + HEAD_POSITION_OFFSET,
            correlation_id_counter_index: capacity + CORRELATION_COUNTER_OFFSET,
            consumer_heartbeat_index: capacity + CONSUMER_HEARTBEAT_OFFSET,
        })
    }

    /// Data section length in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest payload `write` accepts.
    #[inline]
    pub fn max_msg_length(&self) -> usize {
        self.max_msg_length
    }

    /// The underlying region, trailer included.
    #[inline]
    pub fn buffer(&self) -> &AtomicBuffer<'a> {
        &self.buffer
    }

    /// Enqueues `src` as one message of type `msg_type_id`.
    ///
    /// Returns `false` without touching the buffer when the message is longer
    /// than [`max_msg_length`](Self::max_msg_length), when `msg_type_id < 1`,
    /// or when there is not enough free space.
    pub fn write(&self, msg_type_id: i32, src: &[u8]) -> bool {
        if msg_type_id < 1 || src.len() > self.max_msg_length {
            return false;
        }

        let record_length = src.len() + HEADER_LENGTH;
        let Some(record_index) = self.claim_capacity(record_length) else {
            return false;
        };

        self.buffer
            .put_i32_ordered(length_offset(record_index), -(record_length as i32));
        fence(Ordering::Release);

        self.buffer.put_bytes(encoded_msg_offset(record_index), src);
        self.buffer.put_i32(type_offset(record_index), msg_type_id);
        self.buffer
            .put_i32_ordered(length_offset(record_index), record_length as i32);

        true
    }

    /// Claims space for a `length` byte message to be written in place.
    ///
    /// The claim must be committed or aborted; dropping it aborts. Returns
    /// `None` under the same conditions `write` returns `false`.
    pub fn try_claim(&self, msg_type_id: i32, length: usize) -> Option<Claim<'_, 'a>> {
        if msg_type_id < 1 || length > self.max_msg_length {
            return None;
        }

        let record_length = length + HEADER_LENGTH;
        let record_index = self.claim_capacity(record_length)?;

        self.buffer
            .put_i32_ordered(length_offset(record_index), -(record_length as i32));
        fence(Ordering::Release);
        self.buffer.put_i32(type_offset(record_index), msg_type_id);

        Some(Claim {
            ring: self,
            record_index,
            length,
        })
    }

    /// Reserves space for a record by moving the tail, inserting a padding
    /// record first when the record would straddle the end of the buffer.
    ///
    /// Returns the offset of the reserved record.
    fn claim_capacity(&self, record_length: usize) -> Option<usize> {
        let required = align(record_length, RECORD_ALIGNMENT) as i64;
        let capacity = self.capacity as i64;
        let mut head = self.buffer.get_i64_volatile(self.head_cache_position_index);

        let (tail_index, padding) = loop {
            let tail = self.buffer.get_i64_volatile(self.tail_position_index);

            if required > capacity - (tail - head) {
                head = self.buffer.get_i64_volatile(self.head_position_index);
                if required > capacity - (tail - head) {
                    return None;
                }
                self.buffer
                    .put_i64_ordered(self.head_cache_position_index, head);
            }

            let mut padding = 0;
            let tail_index = position_to_index(tail, self.mask);
            let to_buffer_end = capacity - tail_index as i64;

            if required > to_buffer_end {
                // The record goes to offset 0, so the consumer must be past it.
                let mut head_index = position_to_index(head, self.mask) as i64;
                if required > head_index {
                    head = self.buffer.get_i64_volatile(self.head_position_index);
                    head_index = position_to_index(head, self.mask) as i64;
                    if required > head_index {
                        return None;
                    }
                    self.buffer
                        .put_i64_ordered(self.head_cache_position_index, head);
                }
                padding = to_buffer_end;
            }

            if self.buffer.compare_and_set_i64(
                self.tail_position_index,
                tail,
                tail + required + padding,
            ) {
                break (tail_index, padding);
            }
        };

        if padding == 0 {
            return Some(tail_index);
        }

        self.buffer
            .put_i32_ordered(length_offset(tail_index), -(padding as i32));
        fence(Ordering::Release);
        self.buffer
            .put_i32(type_offset(tail_index), PADDING_MSG_TYPE_ID);
        self.buffer
            .put_i32_ordered(length_offset(tail_index), padding as i32);

        Some(0)
    }

    /// Delivers every committed message available in one pass.
    ///
    /// See [`read_limited`](Self::read_limited).
    pub fn read<F>(&self, handler: F) -> usize
    where
        F: FnMut(i32, &AtomicBuffer<'a>, usize, usize),
    {
        self.read_limited(handler, usize::MAX)
    }

    /// Delivers up to `message_count_limit` committed messages to `handler`
    /// as `(msg_type_id, buffer, payload_offset, payload_length)`.
    ///
    /// A pass covers the contiguous bytes from the head to the end of the
    /// data section and stops at the first record that is not committed yet;
    /// the next call continues from there. Padding records are consumed but
    /// not delivered and not counted.
    ///
    /// Consumed bytes are released even if `handler` panics.
    ///
    /// # Single Consumer
    /// Must not be called concurrently with itself or with `unblock`.
    pub fn read_limited<F>(&self, mut handler: F, message_count_limit: usize) -> usize
    where
        F: FnMut(i32, &AtomicBuffer<'a>, usize, usize),
    {
        let head = self.buffer.get_i64(self.head_position_index);
        let head_index = position_to_index(head, self.mask);
        let contiguous_block_length = self.capacity - head_index;

        let mut progress = ReadProgress {
            ring: self,
            head,
            head_index,
            bytes_read: 0,
        };
        let mut messages_read = 0;

        while progress.bytes_read < contiguous_block_length && messages_read < message_count_limit
        {
            let record_index = head_index + progress.bytes_read;
            let record_length = self.buffer.get_i32_volatile(length_offset(record_index));
            if record_length <= 0 {
                break;
            }

            progress.bytes_read += align(record_length as usize, RECORD_ALIGNMENT);

            let msg_type_id = self.buffer.get_i32(type_offset(record_index));
            if msg_type_id == PADDING_MSG_TYPE_ID {
                continue;
            }

            messages_read += 1;
            handler(
                msg_type_id,
                &self.buffer,
                encoded_msg_offset(record_index),
                record_length as usize - HEADER_LENGTH,
            );
        }

        messages_read
    }

    /// Draws the next value from the shared correlation id counter.
    #[inline]
    pub fn next_correlation_id(&self) -> i64 {
        self.buffer
            .get_and_add_i64(self.correlation_id_counter_index, 1)
    }

    /// Releases the consumer from a record a producer claimed and never
    /// committed, typically because the producer died.
    ///
    /// A record stuck with a negative length becomes padding. A record whose
    /// header was never written becomes padding up to the next committed
    /// record, provided everything in between is still zero. Only call this
    /// once the consumer has been stalled long enough that the producer
    /// cannot still be writing.
    ///
    /// Returns whether anything was released.
    pub fn unblock(&self) -> bool {
        let head = self.buffer.get_i64_volatile(self.head_position_index);
        let tail = self.buffer.get_i64_volatile(self.tail_position_index);
        if head == tail {
            return false;
        }

        let consumer_index = position_to_index(head, self.mask);
        let producer_index = position_to_index(tail, self.mask);

        let mut unblocked = false;
        let length = self
            .buffer
            .get_i32_volatile(length_offset(consumer_index));

        if length < 0 {
            self.buffer
                .put_i32(type_offset(consumer_index), PADDING_MSG_TYPE_ID);
            self.buffer
                .put_i32_ordered(length_offset(consumer_index), -length);
            unblocked = true;
        } else if length == 0 {
            let limit = if producer_index > consumer_index {
                producer_index
            } else {
                self.capacity
            };

            let mut i = consumer_index + RECORD_ALIGNMENT;
            while i < limit {
                if self.buffer.get_i32_volatile(length_offset(i)) != 0 {
                    if self.scan_back_to_confirm_still_zeroed(i, consumer_index) {
                        self.buffer
                            .put_i32(type_offset(consumer_index), PADDING_MSG_TYPE_ID);
                        self.buffer.put_i32_ordered(
                            length_offset(consumer_index),
                            (i - consumer_index) as i32,
                        );
                        unblocked = true;
                    }
                    break;
                }
                i += RECORD_ALIGNMENT;
            }
        }

        if unblocked {
            warn!(position = head, "ring buffer consumer unblocked");
        }
        unblocked
    }

    fn scan_back_to_confirm_still_zeroed(&self, from: usize, limit: usize) -> bool {
        let mut i = from;
        while i > limit {
            i -= RECORD_ALIGNMENT;
            if self.buffer.get_i32_volatile(length_offset(i)) != 0 {
                return false;
            }
        }
        true
    }

    /// Last heartbeat the consumer published, in epoch milliseconds.
    #[inline]
    pub fn consumer_heartbeat_time(&self) -> i64 {
        self.buffer.get_i64_volatile(self.consumer_heartbeat_index)
    }

    #[inline]
    pub fn set_consumer_heartbeat_time(&self, time_ms: i64) {
        self.buffer
            .put_i64_ordered(self.consumer_heartbeat_index, time_ms);
    }

    /// Position producers have claimed up to.
    #[inline]
    pub fn producer_position(&self) -> i64 {
        self.buffer.get_i64_volatile(self.tail_position_index)
    }

    /// Position the consumer has released up to.
    #[inline]
    pub fn consumer_position(&self) -> i64 {
        self.buffer.get_i64_volatile(self.head_position_index)
    }

    /// Bytes claimed but not yet consumed, from a consistent head/tail pair.
    pub fn size(&self) -> usize {
        let mut head_after = self.buffer.get_i64_volatile(self.head_position_index);
        loop {
            let head_before = head_after;
            let tail = self.buffer.get_i64_volatile(self.tail_position_index);
            head_after = self.buffer.get_i64_volatile(self.head_position_index);

            if head_after == head_before {
                return (tail - head_after).clamp(0, self.capacity as i64) as usize;
            }
        }
    }
}

/// Commits the consumer's progress when a read pass ends, including by panic.
struct ReadProgress<'r, 'a> {
    ring: &'r ManyToOneRingBuffer<'a>,
    head: i64,
    head_index: usize,
    bytes_read: usize,
}

impl Drop for ReadProgress<'_, '_> {
    fn drop(&mut self) {
        if self.bytes_read == 0 {
            return;
        }
        let ring = self.ring;
        ring.buffer.set_memory(self.head_index, self.bytes_read, 0);

        let head = self.head + self.bytes_read as i64;
        ring.buffer.put_i64_ordered(ring.head_position_index, head);
        ring.buffer
            .put_i64_ordered(ring.head_cache_position_index, head);
    }
}

/// Space reserved by [`ManyToOneRingBuffer::try_claim`].
///
/// The consumer stops at a claim until it is committed or aborted, so hold
/// one only for as long as it takes to fill it.
pub struct Claim<'r, 'a> {
    ring: &'r ManyToOneRingBuffer<'a>,
    record_index: usize,
    length: usize,
}

impl<'a> Claim<'_, 'a> {
    /// Buffer the claimed payload lives in.
    #[inline]
    pub fn buffer(&self) -> &AtomicBuffer<'a> {
        &self.ring.buffer
    }

    /// Offset of the claimed payload within [`buffer`](Self::buffer).
    #[inline]
    pub fn offset(&self) -> usize {
        encoded_msg_offset(self.record_index)
    }

    /// Claimed payload length.
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Copies `src` into the claimed payload at `offset`.
    ///
    /// # Panics
    /// Panics if the bytes would extend past the claimed length.
    pub fn put_bytes(&self, offset: usize, src: &[u8]) {
        assert!(
            offset + src.len() <= self.length,
            "write of {} bytes at {offset} exceeds claim of {}",
            src.len(),
            self.length
        );
        self.ring.buffer.put_bytes(self.offset() + offset, src);
    }

    /// Makes the message visible to the consumer.
    pub fn commit(self) {
        let claim = ManuallyDrop::new(self);
        let index = length_offset(claim.record_index);
        let record_length = claim.ring.buffer.get_i32(index);
        claim.ring.buffer.put_i32_ordered(index, -record_length);
    }

    /// Turns the claim into padding the consumer skips.
    pub fn abort(self) {
        let claim = ManuallyDrop::new(self);
        claim.release_as_padding();
    }

    fn release_as_padding(&self) {
        let index = length_offset(self.record_index);
        let record_length = self.ring.buffer.get_i32(index);
        self.ring
            .buffer
            .put_i32(type_offset(self.record_index), PADDING_MSG_TYPE_ID);
        self.ring.buffer.put_i32_ordered(index, -record_length);
    }
}

impl Drop for Claim<'_, '_> {
    fn drop(&mut self) {
        self.release_as_padding();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic_buffer::AlignedBuffer;
    use crate::error::IpcError;
    use std::collections::HashSet;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    const CAPACITY: usize = 1024;
    const MSG_TYPE_ID: i32 = 101;

    fn storage() -> AlignedBuffer {
        AlignedBuffer::new(CAPACITY + TRAILER_LENGTH)
    }

    fn set_positions(ring: &ManyToOneRingBuffer<'_>, head: i64, tail: i64) {
        ring.buffer.put_i64(ring.head_position_index, head);
        ring.buffer.put_i64(ring.head_cache_position_index, head);
        ring.buffer.put_i64(ring.tail_position_index, tail);
    }

    fn drain(ring: &ManyToOneRingBuffer<'_>) -> Vec<(i32, Vec<u8>)> {
        let mut out = Vec::new();
        ring.read(|type_id, buffer, offset, length| {
            out.push((type_id, buffer.copy_to_vec(offset, length)));
        });
        out
    }

    #[test]
    fn rejects_capacity_that_is_not_power_of_two() {
        let storage = AlignedBuffer::new(1000 + TRAILER_LENGTH);
        assert!(matches!(
            ManyToOneRingBuffer::new(storage.atomic_buffer()),
            Err(IpcError::CapacityNotPowerOfTwo { capacity: 1000 })
        ));
    }

    #[test]
    fn rejects_region_shorter_than_trailer() {
        let storage = AlignedBuffer::new(TRAILER_LENGTH);
        assert!(matches!(
            ManyToOneRingBuffer::new(storage.atomic_buffer()),
            Err(IpcError::RegionTooShort { .. })
        ));
    }

    #[test]
    fn reports_capacity_and_max_message_length() {
        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();
        assert_eq!(ring.capacity(), CAPACITY);
        assert_eq!(ring.max_msg_length(), CAPACITY / 8);
    }

    #[test]
    fn write_to_empty_buffer_lays_out_record() {
        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();

        assert!(ring.write(MSG_TYPE_ID, &[7u8; 8]));

        let buffer = ring.buffer();
        assert_eq!(buffer.get_i32(length_offset(0)), (HEADER_LENGTH + 8) as i32);
        assert_eq!(buffer.get_i32(type_offset(0)), MSG_TYPE_ID);
        assert_eq!(buffer.copy_to_vec(encoded_msg_offset(0), 8), [7u8; 8]);
        assert_eq!(ring.producer_position(), RECORD_ALIGNMENT as i64);
        assert_eq!(ring.size(), RECORD_ALIGNMENT);
    }

    #[test]
    fn oversized_write_is_rejected_without_moving_tail() {
        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();

        let too_long = vec![0u8; ring.max_msg_length() + 1];
        assert!(!ring.write(MSG_TYPE_ID, &too_long));
        assert_eq!(ring.producer_position(), 0);

        let just_fits = vec![0u8; ring.max_msg_length()];
        assert!(ring.write(MSG_TYPE_ID, &just_fits));
    }

    #[test]
    fn non_positive_type_id_is_rejected() {
        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();

        assert!(!ring.write(0, b"x"));
        assert!(!ring.write(PADDING_MSG_TYPE_ID, b"x"));
        assert_eq!(ring.producer_position(), 0);
    }

    #[test]
    fn full_buffer_applies_backpressure() {
        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();

        let fits = CAPACITY / RECORD_ALIGNMENT;
        for _ in 0..fits {
            assert!(ring.write(MSG_TYPE_ID, &[1u8; 8]));
        }
        assert!(!ring.write(MSG_TYPE_ID, &[1u8; 8]));
        assert_eq!(ring.producer_position(), CAPACITY as i64);

        assert_eq!(drain(&ring).len(), fits);
        assert!(ring.write(MSG_TYPE_ID, &[1u8; 8]));
    }

    #[test]
    fn write_that_would_wrap_inserts_padding_first() {
        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();
        let start = (CAPACITY - 4 * RECORD_ALIGNMENT) as i64;
        set_positions(&ring, start, start);

        // Three 32 byte records fit back to back before the end.
        for i in 0..3u8 {
            assert!(ring.write(MSG_TYPE_ID, &[i; 8]));
        }
        let tail_index = CAPACITY - RECORD_ALIGNMENT;
        assert_eq!(ring.producer_position(), start + 3 * RECORD_ALIGNMENT as i64);

        // A 64 byte record no longer fits in the remaining 32 bytes.
        assert!(ring.write(MSG_TYPE_ID, &[9u8; 40]));

        let buffer = ring.buffer();
        assert_eq!(buffer.get_i32(type_offset(tail_index)), PADDING_MSG_TYPE_ID);
        assert_eq!(buffer.get_i32(length_offset(tail_index)), RECORD_ALIGNMENT as i32);
        assert_eq!(buffer.get_i32(type_offset(0)), MSG_TYPE_ID);
        assert_eq!(buffer.get_i32(length_offset(0)), (HEADER_LENGTH + 40) as i32);
        assert_eq!(
            ring.producer_position(),
            start + 4 * RECORD_ALIGNMENT as i64 + 64
        );

        // First pass ends at the end of the buffer, padding swallowed.
        let first = drain(&ring);
        assert_eq!(first.len(), 3);
        assert_eq!(first[2], (MSG_TYPE_ID, vec![2u8; 8]));
        assert_eq!(ring.consumer_position(), CAPACITY as i64);

        let second = drain(&ring);
        assert_eq!(second, vec![(MSG_TYPE_ID, vec![9u8; 40])]);
    }

    #[test]
    fn wrap_waits_for_consumer_to_clear_start_of_buffer() {
        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();
        let tail = (CAPACITY - RECORD_ALIGNMENT) as i64;
        set_positions(&ring, 32, tail);

        assert!(!ring.write(MSG_TYPE_ID, &[0u8; 40]));
        assert_eq!(ring.producer_position(), tail);
    }

    #[test]
    fn read_zeroes_consumed_bytes_and_advances_head() {
        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();

        assert!(ring.write(MSG_TYPE_ID, b"one"));
        assert!(ring.write(MSG_TYPE_ID + 1, b"two"));

        let messages = drain(&ring);
        assert_eq!(
            messages,
            vec![(MSG_TYPE_ID, b"one".to_vec()), (MSG_TYPE_ID + 1, b"two".to_vec())]
        );
        assert_eq!(ring.consumer_position(), 2 * RECORD_ALIGNMENT as i64);
        assert_eq!(ring.size(), 0);
        assert!(
            ring.buffer()
                .copy_to_vec(0, 2 * RECORD_ALIGNMENT)
                .iter()
                .all(|&b| b == 0)
        );
        assert_eq!(drain(&ring).len(), 0);
    }

    #[test]
    fn read_limited_stops_at_limit() {
        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();
        for i in 0..5u8 {
            assert!(ring.write(MSG_TYPE_ID, &[i]));
        }

        let mut seen = Vec::new();
        let count = ring.read_limited(|_, buffer, offset, _| seen.push(buffer.copy_to_vec(offset, 1)[0]), 3);
        assert_eq!(count, 3);
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(ring.consumer_position(), 3 * RECORD_ALIGNMENT as i64);
        assert_eq!(drain(&ring).len(), 2);
    }

    #[test]
    fn read_stops_at_uncommitted_claim() {
        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();

        let claim = ring.try_claim(MSG_TYPE_ID, 4).expect("claim");
        assert!(ring.write(MSG_TYPE_ID + 1, b"after"));

        assert_eq!(drain(&ring).len(), 0);
        assert_eq!(ring.consumer_position(), 0);

        claim.put_bytes(0, b"abcd");
        claim.commit();

        assert_eq!(
            drain(&ring),
            vec![(MSG_TYPE_ID, b"abcd".to_vec()), (MSG_TYPE_ID + 1, b"after".to_vec())]
        );
    }

    #[test]
    fn aborted_and_dropped_claims_become_padding() {
        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();

        ring.try_claim(MSG_TYPE_ID, 16).expect("claim").abort();
        drop(ring.try_claim(MSG_TYPE_ID, 16).expect("claim"));
        assert!(ring.write(MSG_TYPE_ID, b"kept"));

        assert_eq!(drain(&ring), vec![(MSG_TYPE_ID, b"kept".to_vec())]);
        assert_eq!(ring.consumer_position(), 3 * RECORD_ALIGNMENT as i64);
    }

    #[test]
    fn panicking_handler_still_releases_consumed_bytes() {
        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();
        assert!(ring.write(MSG_TYPE_ID, b"boom"));
        assert!(ring.write(MSG_TYPE_ID, b"next"));

        let result = catch_unwind(AssertUnwindSafe(|| {
            ring.read(|_, _, _, _| panic!("handler failed"));
        }));
        assert!(result.is_err());
        assert_eq!(ring.consumer_position(), RECORD_ALIGNMENT as i64);
        assert_eq!(drain(&ring), vec![(MSG_TYPE_ID, b"next".to_vec())]);
    }

    #[test]
    fn unblock_releases_abandoned_claim() {
        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();

        // A producer that dies mid-write never commits or aborts.
        std::mem::forget(ring.try_claim(MSG_TYPE_ID, 8).expect("claim"));
        assert!(ring.write(MSG_TYPE_ID, b"behind"));
        assert_eq!(drain(&ring).len(), 0);

        assert!(ring.unblock());
        assert_eq!(drain(&ring), vec![(MSG_TYPE_ID, b"behind".to_vec())]);
        assert!(!ring.unblock());
    }

    #[test]
    fn unblock_pads_over_claim_without_header() {
        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();

        // Tail moved but the producer died before writing the header.
        set_positions(&ring, 0, RECORD_ALIGNMENT as i64);
        assert!(ring.write(MSG_TYPE_ID, b"stuck"));
        assert_eq!(drain(&ring).len(), 0);

        assert!(ring.unblock());
        assert_eq!(ring.buffer().get_i32(length_offset(0)), RECORD_ALIGNMENT as i32);
        assert_eq!(drain(&ring), vec![(MSG_TYPE_ID, b"stuck".to_vec())]);
    }

    #[test]
    fn unblock_on_empty_buffer_does_nothing() {
        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();
        assert!(!ring.unblock());
    }

    #[test]
    fn correlation_ids_are_unique_across_threads() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 1_000;

        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();

        let ids: Vec<i64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let ring = &ring;
                    s.spawn(move || (0..PER_THREAD).map(|_| ring.next_correlation_id()).collect::<Vec<_>>())
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().expect("thread panicked"))
                .collect()
        });

        let unique: HashSet<i64> = ids.iter().copied().collect();
        assert_eq!(unique.len(), THREADS * PER_THREAD);
        assert_eq!(ring.next_correlation_id(), (THREADS * PER_THREAD) as i64);
    }

    #[test]
    fn heartbeat_round_trips_through_trailer() {
        let storage = storage();
        let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();
        assert_eq!(ring.consumer_heartbeat_time(), 0);
        ring.set_consumer_heartbeat_time(1_700_000_000_000);
        assert_eq!(ring.consumer_heartbeat_time(), 1_700_000_000_000);
    }
}
