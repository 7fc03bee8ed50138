use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use tessera_ipc::{AlignedBuffer, CountersManager, counters};

const MAX_COUNTERS: usize = 256;

fn bench_counter_ops(c: &mut Criterion) {
    let metadata = AlignedBuffer::new(MAX_COUNTERS * counters::METADATA_LENGTH);
    let values = AlignedBuffer::new(MAX_COUNTERS * counters::COUNTER_LENGTH);
    let mut manager = CountersManager::new(metadata.atomic_buffer(), values.atomic_buffer())
        .expect("failed to create manager");
    let counter = manager
        .new_counter("bench.counter", 0)
        .expect("failed to allocate counter");

    let mut group = c.benchmark_group("counters");
    group.throughput(Throughput::Elements(1));

    group.bench_function("increment", |b| {
        b.iter(|| black_box(counter.increment()));
    });

    group.bench_function("get", |b| {
        b.iter(|| black_box(counter.get()));
    });

    group.bench_function("propose_max", |b| {
        let mut next = 0i64;
        b.iter(|| {
            next += 1;
            black_box(counter.propose_max(next))
        });
    });

    group.bench_function("allocate+free", |b| {
        b.iter(|| {
            if let Ok(id) = manager.allocate(black_box("bench.transient")) {
                let _ = manager.free(id);
            }
        });
    });

    drop(group);
}

criterion_group!(benches, bench_counter_ops);
criterion_main!(benches);
