mod common;

use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::{Arc, Barrier};
use std::thread;

use proptest::prelude::*;
use spindle::alloc::{ELEMENT_ALIGN, FAST_SLOTS};
use spindle::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Get,
    /// Release the outstanding element at this index (modulo the count).
    Put(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Get),
        2 => any::<usize>().prop_map(Op::Put),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn outstanding_elements_are_unique(
        element_size in 1usize..512,
        ops in proptest::collection::vec(op(), 1..400),
    ) {
        let pool = BlockAllocator::new(element_size, 0).unwrap();
        let mut outstanding: Vec<NonNull<u8>> = Vec::new();
        let mut seen = HashSet::new();

        for op in ops {
            match op {
                Op::Get => {
                    let element = pool.get(0).unwrap();
                    prop_assert_eq!(element.as_ptr() as usize % ELEMENT_ALIGN, 0);
                    prop_assert!(seen.insert(element), "issued twice while outstanding");
                    outstanding.push(element);
                }
                Op::Put(index) if !outstanding.is_empty() => {
                    let element = outstanding.swap_remove(index % outstanding.len());
                    seen.remove(&element);
                    // SAFETY: element is outstanding from this pool.
                    unsafe { pool.put(element, 0).unwrap() };
                }
                Op::Put(_) => {}
            }
            let stats = pool.stats();
            prop_assert!(outstanding.len() <= stats.capacity);
            prop_assert_eq!(stats.outstanding(), outstanding.len() as u64);
        }

        for element in outstanding {
            // SAFETY: as above.
            unsafe { pool.put(element, 0).unwrap() };
        }
        prop_assert_eq!(pool.close(), Ok(()));
    }
}

#[test]
fn returned_elements_are_reused() {
    common::init_test_logging();
    let pool = BlockAllocator::new(64, 0).unwrap();
    let per_block = pool.elements_per_block();

    for _ in 0..10 {
        let batch: Vec<_> = (0..per_block).map(|_| pool.get(64).unwrap()).collect();
        for element in batch {
            // SAFETY: element is outstanding from this pool.
            unsafe { pool.put(element, 64).unwrap() };
        }
    }
    assert_eq!(pool.stats().blocks, 1);
    pool.close().unwrap();
}

#[test]
fn concurrent_get_put_keeps_elements_exclusive() {
    common::init_test_logging();
    const THREADS: usize = 8;
    const ROUNDS: usize = 2_000;
    const HELD: usize = FAST_SLOTS * 2;

    let pool = Arc::new(BlockAllocator::new(32, 0).unwrap());
    let start = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|tag| {
            let pool = Arc::clone(&pool);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let stamp = tag as u64 + 1;
                start.wait();
                for _ in 0..ROUNDS {
                    let held: Vec<_> = (0..HELD).map(|_| pool.get(0).unwrap()).collect();
                    for element in &held {
                        // SAFETY: each element is 32 bytes owned by this thread.
                        unsafe { element.cast::<u64>().as_ptr().write(stamp) };
                    }
                    thread::yield_now();
                    for element in held {
                        // SAFETY: as above; a shared element would show another stamp.
                        unsafe {
                            assert_eq!(element.cast::<u64>().as_ptr().read(), stamp);
                            pool.put(element, 0).unwrap();
                        }
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let pool = Arc::into_inner(pool).unwrap();
    let stats = pool.stats();
    assert_eq!(stats.gets, (THREADS * ROUNDS * HELD) as u64);
    assert_eq!(stats.outstanding(), 0);
    assert!(stats.capacity >= HELD);
    pool.close().unwrap();
}

#[test]
fn teardown_reports_leaks_and_double_releases() {
    let pool = BlockAllocator::new(16, 0).unwrap();
    let a = pool.get(0).unwrap();
    let _b = pool.get(0).unwrap();
    // SAFETY: a is outstanding.
    unsafe { pool.put(a, 0).unwrap() };
    assert!(matches!(pool.close(), Err(AllocError::Leak { .. })));

    let pool = BlockAllocator::new(16, 0).unwrap();
    let a = pool.get(0).unwrap();
    // SAFETY: deliberately returned twice to trip the check.
    unsafe {
        pool.put(a, 0).unwrap();
        pool.put(a, 0).unwrap();
    }
    assert!(matches!(pool.close(), Err(AllocError::DoubleRelease { .. })));
}

#[test]
fn foreign_sizes_are_rejected() {
    let small = BlockAllocator::new(32, 0).unwrap();
    let large = BlockAllocator::new(256, 0).unwrap();
    let element = large.get(256).unwrap();

    // SAFETY: rejected before the pointer is touched.
    let refused = unsafe { small.put(element, 256) };
    assert_eq!(
        refused,
        Err(AllocError::SizeMismatch {
            expected: 32,
            actual: 256
        })
    );

    // SAFETY: element is outstanding from `large`.
    unsafe { large.put(element, 256).unwrap() };
    small.close().unwrap();
    large.close().unwrap();
}

#[test]
fn stats_serialize() {
    let pool = BlockAllocator::new(100, 0).unwrap();
    let element = pool.get(0).unwrap();
    let json = serde_json::to_value(pool.stats()).unwrap();
    assert_eq!(json["element_size"], 112);
    assert_eq!(json["blocks"], 1);
    assert_eq!(json["gets"], 1);
    // SAFETY: element is outstanding.
    unsafe { pool.put(element, 0).unwrap() };
    pool.close().unwrap();
}

#[test]
fn system_allocator_round_trip() {
    let system = SystemAllocator;
    let element = system.get(128).unwrap();
    // SAFETY: fresh 128-byte allocation.
    unsafe {
        element.as_ptr().write_bytes(0, 128);
        system.put(element, 128).unwrap();
    }
}
