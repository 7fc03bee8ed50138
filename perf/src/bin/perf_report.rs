use std::hint::black_box;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Instant;

use tessera_ipc::{
    AlignedBuffer, BroadcastReceiver, BroadcastTransmitter, CopyBroadcastReceiver,
    CountersManager, ManyToOneRingBuffer, MappedRegion, ReceiverStart, broadcast, counters,
    ring_buffer,
};
use tessera_perf::*;

const RING_CAPACITY: usize = 1 << 16;
const BROADCAST_CAPACITY: usize = 1 << 16;
const MSG_TYPE_ID: i32 = 1;
const PAYLOAD: [u8; 64] = [0xAB; 64];

const CROSS_THREAD_SAMPLES: usize = 200_000;

fn main() {
    let mut results: Vec<BenchResult> = Vec::new();

    print_section("Ring buffer (single thread)");
    section_ring_buffer(&mut results);

    print_section("Broadcast (single thread)");
    section_broadcast(&mut results);

    print_section("Counters");
    section_counters(&mut results);

    println!("\n== Ring buffer (cross thread, mapped file) ==");
    let cross_thread = section_cross_thread();

    save_results(&results, &cross_thread);
}

fn section_ring_buffer(results: &mut Vec<BenchResult>) {
    let plan = BatchPlan::default();
    let storage = AlignedBuffer::new(RING_CAPACITY + ring_buffer::TRAILER_LENGTH);
    let ring = match ManyToOneRingBuffer::new(storage.atomic_buffer()) {
        Ok(ring) => ring,
        Err(e) => {
            eprintln!("  [ring buffer setup failed: {e}]");
            return;
        }
    };

    for size in [8usize, 64] {
        let r = measure_batched(&format!("write+read ({size}B)"), plan, || {
            ring.write(MSG_TYPE_ID, &PAYLOAD[..size]);
            black_box(ring.read(|type_id, _, _, length| {
                black_box((type_id, length));
            }));
        });
        print_result(&r);
        results.push(r);
    }

    let r = measure_batched("read (empty)", plan, || {
        black_box(ring.read(|_, _, _, _| {}));
    });
    print_result(&r);
    results.push(r);

    let r = measure_batched("next_correlation_id", plan, || {
        black_box(ring.next_correlation_id());
    });
    print_result(&r);
    results.push(r);
}

fn section_broadcast(results: &mut Vec<BenchResult>) {
    let plan = BatchPlan::default();
    let storage = AlignedBuffer::new(BROADCAST_CAPACITY + broadcast::TRAILER_LENGTH);
    let setup = BroadcastTransmitter::new(storage.atomic_buffer()).and_then(|transmitter| {
        let receiver = BroadcastReceiver::new(storage.atomic_buffer(), ReceiverStart::Origin)?;
        Ok((transmitter, CopyBroadcastReceiver::new(receiver)))
    });
    let (mut transmitter, mut receiver) = match setup {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("  [broadcast setup failed: {e}]");
            return;
        }
    };

    let r = measure_batched("transmit (64B)", plan, || {
        let _ = black_box(transmitter.transmit(MSG_TYPE_ID, &PAYLOAD));
    });
    print_result(&r);
    results.push(r);

    // Skip past everything the transmit-only run left behind.
    while receiver.receive(|_, _| {}).is_ok_and(|n| n > 0) {}

    let r = measure_batched("transmit+copy receive (64B)", plan, || {
        let _ = transmitter.transmit(MSG_TYPE_ID, &PAYLOAD);
        let _ = black_box(receiver.receive(|type_id, bytes| {
            black_box((type_id, bytes.len()));
        }));
    });
    print_result(&r);
    results.push(r);
}

fn section_counters(results: &mut Vec<BenchResult>) {
    let plan = BatchPlan::default();
    const MAX_COUNTERS: usize = 64;
    let metadata = AlignedBuffer::new(MAX_COUNTERS * counters::METADATA_LENGTH);
    let values = AlignedBuffer::new(MAX_COUNTERS * counters::COUNTER_LENGTH);
    let counter = CountersManager::new(metadata.atomic_buffer(), values.atomic_buffer())
        .and_then(|mut manager| manager.new_counter("perf.increments", 0));
    let counter = match counter {
        Ok(counter) => counter,
        Err(e) => {
            eprintln!("  [counters setup failed: {e}]");
            return;
        }
    };

    let r = measure_batched("increment", plan, || {
        black_box(counter.increment());
    });
    print_result(&r);
    results.push(r);

    let r = measure_batched("set_weak", plan, || {
        counter.set_weak(black_box(7));
    });
    print_result(&r);
    results.push(r);

    let r = measure_batched("propose_max", plan, || {
        black_box(counter.propose_max(black_box(42)));
    });
    print_result(&r);
    results.push(r);
}

/// One producer thread stamps each message with `mono_now_ns`, the consumer
/// records the one-way latency.
fn section_cross_thread() -> Option<LatencyStats> {
    let path = temp_shm_path("cross_thread");
    let region = match MappedRegion::create_ring_buffer(&path, RING_CAPACITY) {
        Ok(region) => Arc::new(region),
        Err(e) => {
            eprintln!("  [cross thread setup failed: {e}]");
            return None;
        }
    };

    let barrier = Arc::new(Barrier::new(2));
    let done = Arc::new(AtomicBool::new(false));

    let producer = {
        let region = Arc::clone(&region);
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            set_thread_affinity(1);
            let Ok(ring) = ManyToOneRingBuffer::new(region.primary()) else {
                barrier.wait();
                return;
            };
            barrier.wait();
            for _ in 0..CROSS_THREAD_SAMPLES {
                let stamp = mono_now_ns().to_le_bytes();
                while !ring.write(MSG_TYPE_ID, &stamp) {
                    if done.load(Ordering::Relaxed) {
                        return;
                    }
                    std::hint::spin_loop();
                }
            }
        })
    };

    set_thread_affinity(0);
    let mut samples = Vec::with_capacity(CROSS_THREAD_SAMPLES);
    if let Ok(ring) = ManyToOneRingBuffer::new(region.primary()) {
        barrier.wait();
        let start = Instant::now();
        while samples.len() < CROSS_THREAD_SAMPLES && start.elapsed().as_secs() < 30 {
            let read = ring.read(|_, buffer, offset, _| {
                let sent = buffer.get_i64(offset) as u64;
                samples.push(mono_now_ns().saturating_sub(sent));
            });
            if read == 0 {
                std::hint::spin_loop();
            }
        }
    } else {
        barrier.wait();
    }
    done.store(true, Ordering::Relaxed);
    let _ = producer.join();

    drop(region);
    let _ = std::fs::remove_file(&path);

    let Some(stats) = LatencyStats::from_samples(&mut samples) else {
        println!("  no samples collected");
        return None;
    };
    println!(
        "  one-way latency over {} messages: p50 {} ns, p99 {} ns, p99.9 {} ns, max {} ns",
        format_count(stats.count as u64),
        stats.p50,
        stats.p99,
        stats.p999,
        stats.max
    );
    Some(stats)
}

fn save_results(results: &[BenchResult], cross_thread: &Option<LatencyStats>) {
    let timestamp = run_cmd("date", &["+%Y%m%d_%H%M%S"])
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".into());

    let results_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/results");
    let _ = std::fs::create_dir_all(results_dir);
    let json_path = format!("{results_dir}/{timestamp}_report.json");

    let output = serde_json::json!({
        "report_type": "ipc",
        "timestamp": timestamp,
        "single_thread": results,
        "cross_thread": cross_thread,
    });

    let bar = "\u{2550}".repeat(90);
    let written = serde_json::to_string_pretty(&output)
        .map_err(|e| e.to_string())
        .and_then(|json| std::fs::write(&json_path, json).map_err(|e| e.to_string()));
    match written {
        Ok(()) => {
            println!("\n{bar}");
            println!("  Results saved to: {json_path}");
            println!("{bar}\n");
        }
        Err(e) => eprintln!("\n  [failed to save results: {e}]\n"),
    }
}

/// Pins the calling thread to core `tag` on Linux; a no-op elsewhere.
fn set_thread_affinity(tag: usize) {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: `set` is a zeroed cpu_set_t owned by this frame
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_SET(tag, &mut set);
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = tag;
    }
}

fn run_cmd(cmd: &str, args: &[&str]) -> Option<String> {
    std::process::Command::new(cmd)
        .args(args)
        .output()
        .ok()
        .and_then(|o| {
            if o.status.success() {
                String::from_utf8(o.stdout).ok()
            } else {
                None
            }
        })
}
