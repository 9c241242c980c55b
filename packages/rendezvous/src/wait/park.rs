//! Address-keyed parking table.
//!
//! Words hash into a fixed table of buckets, each holding a mutex, a condition variable and a count
//! of registered waiters. Unrelated words may share a bucket; their waiters see spurious wakes and
//! re-check.

use std::sync::{
    Condvar, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering, fence},
};

use super::{AtomicWord, WaitService};

const BUCKET_COUNT: usize = 64;

struct Bucket {
    lock: Mutex<()>,
    condvar: Condvar,
    waiters: AtomicUsize,
}

impl Bucket {
    const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            condvar: Condvar::new(),
            waiters: AtomicUsize::new(0),
        }
    }
}

static TABLE: [Bucket; BUCKET_COUNT] = [const { Bucket::new() }; BUCKET_COUNT];

const fn bucket_index(address: usize) -> usize {
    (address >> 2) % BUCKET_COUNT
}

fn bucket_for(address: usize) -> &'static Bucket {
    &TABLE[bucket_index(address)]
}

/// Parks blocked threads on a condition variable shared by every word hashing to the same bucket.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ParkingWait;

impl ParkingWait {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl WaitService for ParkingWait {
    fn wait_on_word<W: AtomicWord>(&self, word: &W, observed: W::Value, ordering: Ordering) {
        let bucket = bucket_for(word.address());

        bucket.waiters.fetch_add(1, Ordering::SeqCst);
        // Pairs with the fence in `notify_all`: either the notifier sees this waiter, or this
        // waiter sees the notifier's store.
        fence(Ordering::SeqCst);

        let guard = bucket.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if word.load_word(ordering) == observed {
            let _guard = bucket
                .condvar
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        } else {
            drop(guard);
        }

        bucket.waiters.fetch_sub(1, Ordering::Relaxed);
    }

    fn notify_all<W: AtomicWord>(&self, word: &W) {
        let bucket = bucket_for(word.address());

        fence(Ordering::SeqCst);
        if bucket.waiters.load(Ordering::Relaxed) == 0 {
            return;
        }

        let _guard = bucket.lock.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.condvar.notify_all();
    }
}
