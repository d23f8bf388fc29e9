use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use spindle::prelude::*;

/// Background threads running one critical section in a loop; stopped and
/// joined on drop.
struct Contenders {
    run: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Contenders {
    fn spawn<F>(workers: usize, section: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let run = Arc::new(AtomicBool::new(true));
        let section = Arc::new(section);
        let threads = (0..workers)
            .map(|_| {
                let run = Arc::clone(&run);
                let section = Arc::clone(&section);
                thread::spawn(move || {
                    while run.load(Ordering::Relaxed) {
                        section();
                    }
                })
            })
            .collect();
        Self { run, threads }
    }
}

impl Drop for Contenders {
    fn drop(&mut self) {
        self.run.store(false, Ordering::Relaxed);
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

fn bump_latch(ctr: &LatchMutex<u64>) {
    *ctr.lock() += 1;
}

fn bump_std(ctr: &Mutex<u64>) {
    if let Ok(mut g) = ctr.lock() {
        *g += 1;
    }
}

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended");
    group.throughput(Throughput::Elements(1));

    let latch = Latch::new();
    group.bench_function("latch", |b| {
        b.iter(|| {
            latch.lock();
            latch.unlock();
        });
    });

    let recursive = RecursiveLatch::new();
    recursive.lock();
    group.bench_function("recursive_reenter", |b| {
        b.iter(|| {
            recursive.lock();
            recursive.unlock();
        });
    });
    recursive.unlock();

    let shared = SharedLatch::new();
    group.bench_function("shared", |b| {
        b.iter(|| {
            shared.lock();
            shared.unlock();
        });
    });

    let mutex = Mutex::new(0u64);
    group.bench_function("std_mutex", |b| b.iter(|| bump_std(&mutex)));

    group.finish();
}

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("high_contention");
    group.measurement_time(Duration::from_secs(5));
    group.warm_up_time(Duration::from_millis(800));
    group.throughput(Throughput::Elements(1));

    for workers in [1usize, 3] {
        let ctr = Arc::new(LatchMutex::new(0u64));
        let load = Contenders::spawn(workers, {
            let ctr = Arc::clone(&ctr);
            move || bump_latch(&ctr)
        });
        group.bench_function(BenchmarkId::new("latch_mutex", workers), |b| {
            b.iter(|| bump_latch(&ctr))
        });
        drop(load);

        let ctr = Arc::new(Mutex::new(0u64));
        let load = Contenders::spawn(workers, {
            let ctr = Arc::clone(&ctr);
            move || bump_std(&ctr)
        });
        group.bench_function(BenchmarkId::new("std_mutex", workers), |b| {
            b.iter(|| bump_std(&ctr))
        });
        drop(load);
    }

    group.finish();
}

criterion_group!(benches, bench_uncontended, bench_contention);
criterion_main!(benches);
