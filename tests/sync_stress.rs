#![allow(missing_docs)]

//! Synchronization primitives under real OS-thread contention.

#[macro_use]
mod common;

use coframe::frame::yield_now;
use coframe::{CriticalSection, Event, Mutex, UniqueTask, WorkGroup, blocking};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

const THREADS: usize = 8;
const ROUNDS: usize = 2_000;

#[test]
fn e2e_mutex_increments_are_not_lost() {
    common::init_test_logging();
    coframe::test_phase!("e2e_mutex_increments_are_not_lost");
    let mutex = Arc::new(Mutex::new(0_usize));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let mutex = Arc::clone(&mutex);
            thread::spawn(move || {
                let task = UniqueTask::new(async move {
                    for _ in 0..ROUNDS {
                        let mut guard = mutex.lock().await;
                        *guard += 1;
                        if fastrand::u8(..) < 8 {
                            drop(guard);
                            yield_now().await;
                        }
                    }
                });
                blocking::get(task)
            })
        })
        .collect();
    for worker in workers {
        assert_eq!(worker.join().expect("worker panicked"), Ok(()));
    }
    let total = *mutex.try_lock().expect("mutex released");
    coframe::assert_with_log!(
        total == THREADS * ROUNDS,
        "mutex total",
        THREADS * ROUNDS,
        total
    );
    coframe::test_complete!("e2e_mutex_increments_are_not_lost");
}

#[test]
fn e2e_mutex_guard_held_across_suspension() {
    common::init_test_logging();
    coframe::test_phase!("e2e_mutex_guard_held_across_suspension");
    let mutex = Arc::new(Mutex::new(Vec::new()));
    let gate = Arc::new(Event::new());

    let first = {
        let mutex = Arc::clone(&mutex);
        let gate = Arc::clone(&gate);
        UniqueTask::new(async move {
            let mut guard = mutex.lock().await;
            guard.push("first-start");
            gate.wait().await;
            guard.push("first-end");
        })
    };
    let second = {
        let mutex = Arc::clone(&mutex);
        UniqueTask::new(async move {
            mutex.lock().await.push("second");
        })
    };
    assert!(mutex.is_locked());
    assert!(!second.is_ready());

    let setter = {
        let gate = Arc::clone(&gate);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            gate.set()
        })
    };
    assert_eq!(blocking::get(first), Ok(()));
    assert_eq!(blocking::get(second), Ok(()));
    assert!(setter.join().expect("setter panicked"));
    assert_eq!(
        *mutex.try_lock().expect("mutex released"),
        vec!["first-start", "first-end", "second"]
    );
    coframe::test_complete!("e2e_mutex_guard_held_across_suspension");
}

#[test]
fn e2e_event_releases_waiters_on_every_thread() {
    common::init_test_logging();
    coframe::test_phase!("e2e_event_releases_waiters_on_every_thread");
    let event = Arc::new(Event::new());
    let released = Arc::new(AtomicUsize::new(0));
    let waiters: Vec<_> = (0..THREADS)
        .map(|_| {
            let event = Arc::clone(&event);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                let tasks: Vec<_> = (0..16)
                    .map(|_| {
                        let event = Arc::clone(&event);
                        let released = Arc::clone(&released);
                        UniqueTask::new(async move {
                            event.wait().await;
                            released.fetch_add(1, Ordering::SeqCst);
                        })
                    })
                    .collect();
                for task in tasks {
                    assert_eq!(blocking::get(task), Ok(()));
                }
            })
        })
        .collect();
    thread::sleep(Duration::from_millis(20));
    assert!(event.set());
    assert!(!event.set());
    for waiter in waiters {
        waiter.join().expect("waiter panicked");
    }
    assert_eq!(released.load(Ordering::SeqCst), THREADS * 16);
    coframe::test_complete!("e2e_event_releases_waiters_on_every_thread");
}

#[test]
fn e2e_work_group_waits_for_work_finished_elsewhere() {
    common::init_test_logging();
    coframe::test_phase!("e2e_work_group_waits_for_work_finished_elsewhere");
    let group = Arc::new(WorkGroup::new());
    let done = Arc::new(AtomicUsize::new(0));
    let tokens: Vec<_> = (0..THREADS).map(|_| group.add_owned()).collect();

    let waiter = {
        let group = Arc::clone(&group);
        let done = Arc::clone(&done);
        UniqueTask::new(async move {
            group.wait().await;
            done.load(Ordering::SeqCst)
        })
    };
    assert!(!waiter.is_ready());

    let workers: Vec<_> = tokens
        .into_iter()
        .map(|token| {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                thread::sleep(Duration::from_micros(fastrand::u64(100..5_000)));
                done.fetch_add(1, Ordering::SeqCst);
                drop(token);
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }
    assert_eq!(blocking::get(waiter), Ok(THREADS));
    assert_eq!(group.outstanding(), 0);
    coframe::test_complete!("e2e_work_group_waits_for_work_finished_elsewhere");
}

#[test]
fn e2e_critical_section_serializes_plain_updates() {
    common::init_test_logging();
    coframe::test_phase!("e2e_critical_section_serializes_plain_updates");
    let section = Arc::new(CriticalSection::new());
    let cell = Arc::new(AtomicUsize::new(0));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let section = Arc::clone(&section);
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                let task = UniqueTask::new(async move {
                    for _ in 0..ROUNDS {
                        section
                            .run(|| {
                                // Deliberately split read and write.
                                let seen = cell.load(Ordering::Relaxed);
                                cell.store(seen + 1, Ordering::Relaxed);
                            })
                            .await;
                    }
                });
                blocking::get(task)
            })
        })
        .collect();
    for worker in workers {
        assert_eq!(worker.join().expect("worker panicked"), Ok(()));
    }
    assert_eq!(cell.load(Ordering::SeqCst), THREADS * ROUNDS);
    coframe::test_complete!("e2e_critical_section_serializes_plain_updates");
}

#[test]
fn e2e_event_set_races_waiter_registration() {
    common::init_test_logging();
    coframe::test_phase!("e2e_event_set_races_waiter_registration");
    const ROUNDS: usize = 200;
    const WAITERS: usize = 4;
    for round in 0..ROUNDS {
        let event = Arc::new(Event::new());
        let resumed = Arc::new(AtomicUsize::new(0));
        let setter = {
            let event = Arc::clone(&event);
            thread::spawn(move || {
                if fastrand::bool() {
                    thread::yield_now();
                }
                event.set()
            })
        };
        let waiters: Vec<_> = (0..WAITERS)
            .map(|_| {
                let event = Arc::clone(&event);
                let resumed = Arc::clone(&resumed);
                thread::spawn(move || {
                    let task = UniqueTask::new(async move {
                        event.wait().await;
                        resumed.fetch_add(1, Ordering::SeqCst);
                    });
                    blocking::get(task)
                })
            })
            .collect();
        assert!(setter.join().expect("setter panicked"));
        for waiter in waiters {
            assert_eq!(waiter.join().expect("waiter panicked"), Ok(()));
        }
        coframe::assert_with_log!(
            resumed.load(Ordering::SeqCst) == WAITERS,
            "each waiter resumed exactly once",
            WAITERS,
            format!("round {round}: {}", resumed.load(Ordering::SeqCst))
        );
    }
    coframe::test_complete!("e2e_event_set_races_waiter_registration");
}
