use std::sync::Arc;
use std::thread;

use spindle::prelude::*;

fn main() {
    // Data-carrying latch.
    let counter = Arc::new(LatchMutex::new(0usize));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..1000 {
                    *counter.lock() += 1;
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(*counter.lock(), 4000);

    // Reentrant acquisition.
    let recursive = RecursiveLatch::new();
    {
        let _outer = LatchGuard::acquire(&recursive);
        let _inner = LatchGuard::acquire(&recursive);
        assert_eq!(recursive.depth(), 2);
    }

    // Shared/exclusive pair with downgrade.
    let table = LatchRwLock::new(vec![1, 2, 3]);
    let mut write = table.write();
    write.push(4);
    let read = lock_api::RwLockWriteGuard::downgrade(write);
    println!("table = {:?}", *read);
}
