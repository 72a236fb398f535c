//! Completion records: a tagged, write-once result slot.
//!
//! The producer claims the record with a CAS from `PENDING` to `WRITING`,
//! stores the payload and then publishes the final tag with `Release`.
//! Readers load the tag with `Acquire` before touching the payload, so a
//! partially written outcome is never observed.

#![allow(unsafe_code)]

use crate::error::TaskError;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};

const PENDING: u8 = 0;
const WRITING: u8 = 1;
const VALUE: u8 = 2;
const PANICKED: u8 = 3;
const CANCELLED: u8 = 4;
const TAKEN: u8 = 5;

/// Observable state of a [`CompletionRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordState {
    Pending,
    Value,
    Panicked,
    Cancelled,
    Taken,
}

pub(crate) struct CompletionRecord<T> {
    tag: AtomicU8,
    slot: UnsafeCell<Option<Result<T, TaskError>>>,
}

// SAFETY: the slot is written once by the producer before the tag is
// published and is only read after the tag is observed.
unsafe impl<T: Send> Send for CompletionRecord<T> {}
// SAFETY: through `&self` the payload is only moved in or out (`T: Send`)
// or borrowed by `get`, which additionally requires `T: Sync`.
unsafe impl<T: Send> Sync for CompletionRecord<T> {}

impl<T> CompletionRecord<T> {
    pub(crate) const fn new() -> Self {
        Self {
            tag: AtomicU8::new(PENDING),
            slot: UnsafeCell::new(None),
        }
    }

    /// A record that is born finished.
    pub(crate) fn finished(outcome: Result<T, TaskError>) -> Self {
        let tag = tag_for(&outcome);
        Self {
            tag: AtomicU8::new(tag),
            slot: UnsafeCell::new(Some(outcome)),
        }
    }

    /// Writes the outcome. Returns false if another outcome was already
    /// written, in which case `outcome` is dropped.
    pub(crate) fn publish(&self, outcome: Result<T, TaskError>) -> bool {
        if self
            .tag
            .compare_exchange(PENDING, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        let tag = tag_for(&outcome);
        // SAFETY: the CAS above grants exclusive write access.
        unsafe { *self.slot.get() = Some(outcome) };
        self.tag.store(tag, Ordering::Release);
        true
    }

    pub(crate) fn state(&self) -> RecordState {
        match self.tag.load(Ordering::Acquire) {
            VALUE => RecordState::Value,
            PANICKED => RecordState::Panicked,
            CANCELLED => RecordState::Cancelled,
            TAKEN => RecordState::Taken,
            _ => RecordState::Pending,
        }
    }

    /// True once an outcome has been published (including after it was taken).
    pub(crate) fn is_finished(&self) -> bool {
        !matches!(self.state(), RecordState::Pending)
    }

    /// Moves the outcome out. Returns `None` while pending or once taken.
    ///
    /// # Safety
    ///
    /// No reference obtained from [`get`](Self::get) may be alive.
    pub(crate) unsafe fn take(&self) -> Option<Result<T, TaskError>> {
        let mut cur = self.tag.load(Ordering::Acquire);
        loop {
            if !matches!(cur, VALUE | PANICKED | CANCELLED) {
                return None;
            }
            match self
                .tag
                .compare_exchange(cur, TAKEN, Ordering::AcqRel, Ordering::Acquire)
            {
                // SAFETY: winning the CAS to TAKEN grants exclusive access.
                Ok(_) => return unsafe { (*self.slot.get()).take() },
                Err(actual) => cur = actual,
            }
        }
    }

    /// Borrows the outcome once published.
    pub(crate) fn get(&self) -> Option<&Result<T, TaskError>>
    where
        T: Sync,
    {
        match self.tag.load(Ordering::Acquire) {
            // SAFETY: the tag was published after the final write and the
            // payload is never moved while shared readers exist.
            VALUE | PANICKED | CANCELLED => unsafe { (*self.slot.get()).as_ref() },
            _ => None,
        }
    }
}

fn tag_for<T>(outcome: &Result<T, TaskError>) -> u8 {
    match outcome {
        Ok(_) => VALUE,
        Err(TaskError::Panicked(_)) => PANICKED,
        Err(_) => CANCELLED,
    }
}

impl<T> std::fmt::Debug for CompletionRecord<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionRecord")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
