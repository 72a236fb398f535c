#![allow(missing_docs)]

//! Unique and lazy task end-to-end suite: value, panic and cancellation
//! propagation, long completion chains and cross-thread resumption.

#[macro_use]
mod common;

use coframe::test_utils::{DropProbe, Trigger};
use coframe::{LazyTask, TaskError, UniqueTask, blocking};
use std::thread;

type Step = Result<(), TaskError>;

fn wait(trigger: &Trigger<u32>, probe: &DropProbe) -> UniqueTask<Step> {
    let trigger = trigger.clone();
    let guard = probe.guard();
    UniqueTask::new(async move {
        let _guard = guard;
        trigger.await;
        Ok(())
    })
}

fn follow(task: UniqueTask<Step>, probe: &DropProbe) -> UniqueTask<Step> {
    let guard = probe.guard();
    UniqueTask::new(async move {
        let _guard = guard;
        task.await.and_then(|inner| inner)
    })
}

#[test]
fn e2e_value_arrives_after_trigger() {
    common::init_test_logging();
    coframe::test_phase!("e2e_value_arrives_after_trigger");
    let trigger = Trigger::<u32>::new();
    let wait = trigger.clone();
    let task = UniqueTask::new(async move { wait.await.unwrap_or(0) });
    assert!(!task.is_ready());
    trigger.fire(16);
    assert!(task.is_ready());
    assert_eq!(blocking::get(task), Ok(16));
    coframe::test_complete!("e2e_value_arrives_after_trigger");
}

#[test]
fn e2e_panic_is_stored_until_read() {
    common::init_test_logging();
    coframe::test_phase!("e2e_panic_is_stored_until_read");
    let trigger = Trigger::<u32>::new();
    let wait = trigger.clone();
    let task = UniqueTask::<u32>::new(async move {
        wait.await;
        panic!("ball");
    });
    trigger.fire(16);
    assert!(task.is_ready());
    let err = blocking::get(task).unwrap_err();
    assert!(err.is_panic());
    assert!(err.to_string().contains("ball"));
    coframe::test_complete!("e2e_panic_is_stored_until_read");
}

#[test]
fn e2e_dropped_trigger_cancels_follower_chain() {
    common::init_test_logging();
    coframe::test_phase!("e2e_dropped_trigger_cancels_follower_chain");
    let probe = DropProbe::new();
    let trigger = Trigger::<u32>::new();
    let task = follow(wait(&trigger, &probe), &probe);
    trigger.cancel();
    assert!(task.is_ready());
    let outcome = blocking::get(task);
    assert!(matches!(outcome, Ok(Err(ref err)) if err.is_cancelled()), "{outcome:?}");
    assert_eq!(probe.dropped(), 2);
    coframe::test_complete!("e2e_dropped_trigger_cancels_follower_chain");
}

#[test]
fn e2e_inc_chain_of_65536() {
    common::init_test_logging();
    coframe::test_phase!("e2e_inc_chain_of_65536");
    let trigger = Trigger::<u32>::new();
    let wait = trigger.clone();
    let mut task = UniqueTask::new(async move { u64::from(wait.await.unwrap_or(0)) });
    for _ in 0..65_536 {
        task = common::inc(task);
    }
    assert!(!task.is_ready());
    trigger.fire(0);
    assert!(task.is_ready());
    let result = blocking::get(task);
    coframe::assert_with_log!(
        result == Ok(65_536),
        "chain result",
        65_536,
        "mismatch"
    );
    coframe::test_complete!("e2e_inc_chain_of_65536");
}

#[test]
fn e2e_cancel_chain_unwinds_every_link() {
    common::init_test_logging();
    coframe::test_phase!("e2e_cancel_chain_unwinds_every_link");
    let probe = DropProbe::new();
    let trigger = Trigger::<u32>::new();
    let mut task = wait(&trigger, &probe);
    for _ in 0..65_536 {
        task = follow(task, &probe);
    }
    assert_eq!(probe.dropped(), 0);
    trigger.cancel();
    assert!(task.is_ready());
    let outcome = blocking::get(task);
    assert!(matches!(outcome, Ok(Err(ref err)) if err.is_cancelled()));
    coframe::assert_with_log!(
        probe.dropped() == 65_537,
        "every link unwound",
        65_537,
        probe.dropped()
    );
    coframe::test_complete!("e2e_cancel_chain_unwinds_every_link");
}

#[test]
fn e2e_chain_dropped_inside_a_frame_unwinds_before_the_drop_returns() {
    common::init_test_logging();
    coframe::test_phase!("e2e_chain_dropped_inside_a_frame_unwinds_before_the_drop_returns");
    const LINKS: usize = 10_000;
    let probe = DropProbe::new();
    let trigger = Trigger::<u32>::new();
    let mut chain = wait(&trigger, &probe);
    for _ in 0..LINKS {
        chain = follow(chain, &probe);
    }

    let gate = Trigger::<()>::new();
    let outer = {
        let gate = gate.clone();
        let probe = probe.clone();
        UniqueTask::new(async move {
            gate.await;
            let before = probe.dropped();
            drop(chain);
            (before, probe.dropped())
        })
    };
    assert_eq!(probe.dropped(), 0);
    gate.fire(());
    let (before, after) = blocking::get(outer).expect("outer frame completed");
    assert_eq!(before, 0);
    coframe::assert_with_log!(
        after == LINKS + 1,
        "every link unwound inside the dropping frame",
        LINKS + 1,
        after
    );
    coframe::test_complete!("e2e_chain_dropped_inside_a_frame_unwinds_before_the_drop_returns");
}

#[test]
fn e2e_resumed_from_many_threads() {
    common::init_test_logging();
    coframe::test_phase!("e2e_resumed_from_many_threads");
    let triggers: Vec<_> = (0..16).map(|_| Trigger::<u64>::new()).collect();
    let tasks: Vec<_> = triggers
        .iter()
        .map(|trigger| {
            let trigger = trigger.clone();
            common::inc(UniqueTask::new(async move { trigger.await.unwrap_or(0) }))
        })
        .collect();
    let total = UniqueTask::new(async move {
        let mut sum = 0;
        for task in tasks {
            sum += task.await.unwrap_or(0);
        }
        sum
    });

    let firers: Vec<_> = triggers
        .into_iter()
        .enumerate()
        .map(|(i, trigger)| thread::spawn(move || trigger.fire(i as u64)))
        .collect();
    for firer in firers {
        assert!(firer.join().expect("firing thread panicked"));
    }
    let expected: u64 = (0..16).map(|i| i + 1).sum();
    assert_eq!(blocking::get(total), Ok(expected));
    coframe::test_complete!("e2e_resumed_from_many_threads");
}

#[test]
fn e2e_lazy_pipeline_runs_only_when_observed() {
    common::init_test_logging();
    coframe::test_phase!("e2e_lazy_pipeline_runs_only_when_observed");
    let counter = common::Counter::default();
    let stage = |input: LazyTask<u64>, counter: common::Counter| {
        LazyTask::new(async move {
            counter.bump();
            input.await.map_or(0, |v| v * 2)
        })
    };
    let seed = {
        let counter = counter.clone();
        LazyTask::new(async move {
            counter.bump();
            1_u64
        })
    };
    let mut pipeline = seed;
    for _ in 0..10 {
        pipeline = stage(pipeline, counter.clone());
    }
    assert_eq!(counter.get(), 0);
    assert_eq!(blocking::get(pipeline), Ok(1024));
    assert_eq!(counter.get(), 11);
    coframe::test_complete!("e2e_lazy_pipeline_runs_only_when_observed");
}
