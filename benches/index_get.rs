use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use gencache::{CacheBuilder, GenerationalCache, Index};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
struct Row {
    id: u64,
    name: String,
}

fn row(id: u64) -> Row {
    Row {
        id,
        name: format!("row-{}", id),
    }
}

fn warmed(capacity: usize, preload: u64) -> (GenerationalCache<Row>, Index<u64, Row>) {
    let cache = CacheBuilder::new(capacity)
        .min_age(Duration::from_secs(1))
        .max_age(Duration::from_secs(60))
        .build::<Row>();
    let by_id = cache
        .add_index_with_loader("id", |r: &Row| r.id, |id: &u64| Some(row(*id)))
        .unwrap();
    cache.add_index("name", |r: &Row| r.name.clone()).unwrap();
    for i in 0..preload {
        by_id.get(&i).unwrap();
    }
    (cache, by_id)
}

fn bench_get_hot(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_get");
    group.throughput(Throughput::Elements(4096));
    group.bench_function("get_hot", |b| {
        b.iter_batched(
            || warmed(8192, 4096),
            |(_cache, by_id)| {
                for i in 0..4096u64 {
                    let _ = std::hint::black_box(by_id.get(&std::hint::black_box(i)));
                }
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

fn bench_load_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_get");
    group.throughput(Throughput::Elements(4096));
    group.bench_function("load_churn", |b| {
        b.iter_batched(
            || warmed(1024, 1024),
            |(_cache, by_id)| {
                for i in 0..4096u64 {
                    let _ = std::hint::black_box(by_id.get(&std::hint::black_box(10_000 + i)));
                }
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

fn bench_random_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_get");
    group.throughput(Throughput::Elements(4096));
    group.bench_function("random_get_remove", |b| {
        b.iter_batched(
            || {
                let mut rng = StdRng::seed_from_u64(42);
                let keys: Vec<(u64, bool)> = (0..4096)
                    .map(|_| (rng.random_range(0..2048), rng.random_range(0..10) == 0))
                    .collect();
                (warmed(1024, 1024), keys)
            },
            |((_cache, by_id), keys)| {
                for (key, remove) in keys {
                    if remove {
                        let _ = std::hint::black_box(by_id.remove(&key));
                    } else {
                        let _ = std::hint::black_box(by_id.get(&key));
                    }
                }
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

fn bench_contended_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_get");
    let threads = 4;
    let per_thread = 2048u64;
    group.throughput(Throughput::Elements(threads as u64 * per_thread));
    group.bench_function("contended_get_4_threads", |b| {
        b.iter_batched(
            || warmed(4096, 2048),
            |(_cache, by_id)| {
                let barrier = Arc::new(Barrier::new(threads));
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let by_id = by_id.clone();
                        let barrier = Arc::clone(&barrier);
                        thread::spawn(move || {
                            barrier.wait();
                            for i in 0..per_thread {
                                let key = (i * 31 + t as u64) % 2048;
                                let _ = std::hint::black_box(by_id.get(&key));
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    let _ = handle.join();
                }
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_get_hot,
    bench_load_churn,
    bench_random_mixed,
    bench_contended_get
);
criterion_main!(benches);
