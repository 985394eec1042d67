//! Work queue microbenchmarks using criterion.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use phasework::JobId;
use phasework::deque::{Steal, work_queue};
use phasework::task::TaskDescriptor;
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

const CAPACITY: usize = 4096;

fn bench_push_pop(c: &mut Criterion) {
    let (queue, _stealer) = work_queue(CAPACITY).expect("queue");
    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Elements(CAPACITY as u64));

    group.bench_function("push_pop", |b| {
        b.iter(|| {
            for i in 0..CAPACITY {
                queue
                    .push(TaskDescriptor::new(JobId::new(i as u16)))
                    .expect("push");
            }
            while let Some(task) = queue.pop() {
                black_box(task);
            }
        })
    });

    group.bench_function("push_steal", |b| {
        let stealer = queue.stealer();
        b.iter(|| {
            for i in 0..CAPACITY {
                queue
                    .push(TaskDescriptor::new(JobId::new(i as u16)))
                    .expect("push");
            }
            loop {
                match stealer.steal() {
                    Steal::Success(task) => {
                        black_box(task);
                    }
                    Steal::Retry => continue,
                    Steal::Empty => break,
                }
            }
        })
    });

    group.finish();
}

fn bench_contended_steal(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended");
    group.sample_size(10);
    group.throughput(Throughput::Elements(CAPACITY as u64));

    for thieves in [1usize, 3, 7] {
        let (queue, stealer) = work_queue(CAPACITY).expect("queue");
        let stop = Arc::new(AtomicBool::new(false));
        let handles: Vec<_> = (0..thieves)
            .map(|_| {
                let stealer = stealer.clone();
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        if let Steal::Success(task) = stealer.steal() {
                            black_box(task);
                        }
                    }
                })
            })
            .collect();

        group.bench_function(BenchmarkId::new("owner_vs_thieves", thieves), |b| {
            b.iter(|| {
                for i in 0..CAPACITY {
                    let _ = queue.push(TaskDescriptor::new(JobId::new(i as u16)));
                    if i % 2 == 0 {
                        black_box(queue.pop());
                    }
                }
                while queue.pop().is_some() {}
            })
        });

        stop.store(true, Ordering::Relaxed);
        for h in handles {
            h.join().expect("thief panicked");
        }
    }

    group.finish();
}

criterion_group!(benches, bench_push_pop, bench_contended_steal);
criterion_main!(benches);
