//! Microbenchmarks for the runnable queue's hot paths.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use filament::{FiberHandle, GlobalQueue, LocalQueue};
use std::sync::Arc;

fn bench_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_queue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("push_pop_cycle", |b| {
        let queue: LocalQueue<256> = LocalQueue::new(Arc::new(GlobalQueue::new()));
        b.iter_batched(
            FiberHandle::new,
            |fiber| {
                queue.push(fiber);
                queue.pop().expect("just pushed")
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("push_overflow_burst", |b| {
        let global = Arc::new(GlobalQueue::new());
        let queue: LocalQueue<32> = LocalQueue::new(Arc::clone(&global));
        b.iter_batched(
            || (0..64).map(|_| FiberHandle::new()).collect::<Vec<_>>(),
            |fibers| {
                for fiber in fibers {
                    queue.push(fiber);
                }
                while queue.pop().is_some() {}
                while global.pop().is_some() {}
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_steal(c: &mut Criterion) {
    let mut group = c.benchmark_group("steal");

    group.bench_function("steal_half_of_64", |b| {
        let victim_global = Arc::new(GlobalQueue::new());
        let thief_global = Arc::new(GlobalQueue::new());
        let victim: LocalQueue<128> = LocalQueue::new(victim_global);
        let thief: LocalQueue<128> = LocalQueue::new(thief_global);
        let stealer = victim.stealer();

        b.iter_batched(
            || {
                for _ in 0..64 {
                    victim.push(FiberHandle::new());
                }
            },
            |()| {
                let first = thief.steal_from(&stealer);
                drop(first);
                while thief.pop().is_some() {}
                while victim.pop().is_some() {}
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_push_pop, bench_steal);
criterion_main!(benches);
