//! Multi-threaded stress tests over heap-backed regions.
//!
//! ```bash
//! cargo test -p tessera-ipc --test concurrency -- --nocapture
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tessera_ipc::broadcast::TRAILER_LENGTH as BROADCAST_TRAILER_LENGTH;
use tessera_ipc::ring_buffer::TRAILER_LENGTH as RING_TRAILER_LENGTH;
use tessera_ipc::{
    AlignedBuffer, BroadcastReceiver, BroadcastTransmitter, CopyBroadcastReceiver, IpcError,
    ManyToOneRingBuffer, ReceiverStart,
};

const PRODUCERS: u32 = 4;
const MESSAGES_PER_PRODUCER: u32 = 10_000;
const RING_CAPACITY: usize = 1 << 16;

/// Payload: producer id, sequence, then filler whose length varies with the
/// sequence so records of several sizes interleave and wrap.
fn encode(producer: u32, seq: u32) -> Vec<u8> {
    let filler = (seq % 7) as usize * 5;
    let mut out = Vec::with_capacity(8 + filler);
    out.extend_from_slice(&producer.to_le_bytes());
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend(std::iter::repeat_n(producer as u8, filler));
    out
}

fn decode(bytes: &[u8]) -> (u32, u32) {
    let producer = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let seq = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    assert_eq!(bytes, encode(producer, seq).as_slice(), "payload corrupted");
    (producer, seq)
}

#[test]
fn ring_buffer_delivers_every_message_once_in_producer_order() {
    let storage = AlignedBuffer::new(RING_CAPACITY + RING_TRAILER_LENGTH);
    let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();

    let mut next_expected = vec![0u32; PRODUCERS as usize];
    let mut total = 0u64;

    std::thread::scope(|s| {
        for producer in 0..PRODUCERS {
            let ring = &ring;
            s.spawn(move || {
                for seq in 0..MESSAGES_PER_PRODUCER {
                    let msg = encode(producer, seq);
                    while !ring.write(producer as i32 + 1, &msg) {
                        std::hint::spin_loop();
                    }
                }
            });
        }

        let expected_total = (PRODUCERS * MESSAGES_PER_PRODUCER) as u64;
        while total < expected_total {
            let read = ring.read(|type_id, buffer, offset, length| {
                let bytes = buffer.copy_to_vec(offset, length);
                let (producer, seq) = decode(&bytes);
                assert_eq!(type_id, producer as i32 + 1);
                assert_eq!(
                    seq, next_expected[producer as usize],
                    "producer {producer} out of order"
                );
                next_expected[producer as usize] += 1;
            });
            if read == 0 {
                std::hint::spin_loop();
            }
            total += read as u64;
        }
    });

    assert!(next_expected.iter().all(|&n| n == MESSAGES_PER_PRODUCER));
    assert_eq!(ring.size(), 0);
    assert_eq!(ring.producer_position(), ring.consumer_position());
}

#[test]
fn correlation_ids_are_unique_under_contention() {
    const THREADS: usize = 8;
    const CALLS: usize = 5_000;

    let storage = AlignedBuffer::new(1024 + RING_TRAILER_LENGTH);
    let ring = ManyToOneRingBuffer::new(storage.atomic_buffer()).unwrap();

    let ids: Vec<i64> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let ring = &ring;
                s.spawn(move || {
                    (0..CALLS)
                        .map(|_| ring.next_correlation_id())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let distinct: HashSet<_> = ids.into_iter().collect();
    assert_eq!(distinct.len(), THREADS * CALLS);
    assert_eq!(ring.next_correlation_id(), (THREADS * CALLS) as i64);
}

#[test]
fn broadcast_receivers_never_see_reordered_or_torn_messages() {
    const MESSAGES: u64 = 200_000;
    const RECEIVERS: usize = 3;
    const CAPACITY: usize = 1 << 12;

    let storage = AlignedBuffer::new(CAPACITY + BROADCAST_TRAILER_LENGTH);
    let buffer = storage.atomic_buffer();
    let mut transmitter = BroadcastTransmitter::new(buffer).unwrap();
    let done = AtomicBool::new(false);

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..RECEIVERS)
            .map(|_| {
                let done = &done;
                let receiver = BroadcastReceiver::new(buffer, ReceiverStart::Origin).unwrap();
                s.spawn(move || {
                    let mut copy = CopyBroadcastReceiver::new(receiver);
                    let mut last: Option<u64> = None;
                    let mut received = 0u64;

                    loop {
                        let finished = done.load(Ordering::Acquire);
                        match copy.receive(|_, bytes| {
                            let value = u64::from_le_bytes(bytes[..8].try_into().unwrap());
                            assert!(bytes[8..].iter().all(|&b| b == value as u8), "torn message");
                            if let Some(prev) = last {
                                assert!(value > prev, "went backwards: {prev} then {value}");
                            }
                            last = Some(value);
                            received += 1;
                        }) {
                            Ok(0) if finished => break,
                            Ok(_) => {}
                            Err(IpcError::UnableToKeepUp) => {}
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    }
                    (last, received)
                })
            })
            .collect();

        for value in 0..MESSAGES {
            let mut msg = value.to_le_bytes().to_vec();
            msg.extend(std::iter::repeat_n(value as u8, (value % 24) as usize));
            transmitter.transmit(1, &msg).unwrap();
        }
        done.store(true, Ordering::Release);

        for handle in handles {
            let (last, received) = handle.join().unwrap();
            assert!(received > 0);
            assert!(last.is_some_and(|v| v < MESSAGES));
        }
    });
}
