use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use pretty_assertions::assert_eq;
use switchy_rendezvous::{Config, Latch, WaitStrategy};

#[test_log::test]
fn test_latch_publishes_writes_made_before_count_down() {
    for wait in [WaitStrategy::Park, WaitStrategy::Backoff] {
        let config = Config::default().with_wait(wait);
        let latch = Latch::from_config(5, &config).unwrap();
        let slots: Vec<AtomicUsize> = (0..5).map(|_| AtomicUsize::new(0)).collect();

        assert!(!latch.try_wait());

        thread::scope(|s| {
            let observer = s.spawn(|| {
                latch.wait();
                slots
                    .iter()
                    .map(|slot| slot.load(Ordering::Acquire))
                    .collect::<Vec<_>>()
            });

            for (i, slot) in slots.iter().enumerate() {
                let latch = &latch;
                s.spawn(move || {
                    slot.store(i + 1, Ordering::Release);
                    latch.count_down();
                });
            }

            assert_eq!(observer.join().unwrap(), vec![1, 2, 3, 4, 5]);
        });

        assert!(latch.try_wait());
        assert!(latch.try_wait());
        latch.wait();
    }
}

#[test_log::test]
fn test_latch_many_waiters_released_together() {
    let latch = Arc::new(Latch::new(1));
    let released = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let latch = latch.clone();
            let released = released.clone();
            thread::spawn(move || {
                latch.wait();
                released.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();

    latch.count_down();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(released.load(Ordering::Relaxed), 8);
}

#[test_log::test]
fn test_latch_arrive_and_wait_as_one_shot_barrier() {
    let latch = Latch::new(6);
    let arrived = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..6 {
            s.spawn(|| {
                arrived.fetch_add(1, Ordering::Relaxed);
                latch.arrive_and_wait();
                assert_eq!(arrived.load(Ordering::Relaxed), 6);
            });
        }
    });

    assert_eq!(latch.count(), 0);
}
