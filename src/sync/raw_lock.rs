//! Binary lock on one atomic word with direct ownership hand-off.
//!
//! `Empty` means unlocked, `Marked` means locked with no waiters, and a
//! waiter chain means locked with parked frames (the chain ends at the
//! `Marked` sentinel). Unlocking with waiters pops one and resumes it while
//! the lock stays held, so ownership moves straight to the woken frame.

use super::waiter_list::{AtomicHead, Head};
use crate::awaitable::{Awaitable, Suspend};
use crate::frame::{Continuation, ResumeTicket};
use crate::tracing_compat::debug;

pub(crate) struct RawLock {
    head: AtomicHead,
}

impl RawLock {
    pub(crate) const fn new() -> Self {
        Self {
            head: AtomicHead::empty(),
        }
    }

    pub(crate) fn try_lock(&self) -> bool {
        self.head.compare_exchange(Head::Empty, Head::Marked).is_ok()
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.head.load() != Head::Empty
    }

    pub(crate) fn has_waiters(&self) -> bool {
        self.head.load().is_waiting()
    }

    /// Acquires the lock or parks `k`. Returns the continuation back if the
    /// lock was acquired without parking.
    fn lock_or_park(&self, mut k: Continuation) -> Result<(), Continuation> {
        loop {
            if self.try_lock() {
                return Err(k);
            }
            match self.head.push_unless(k, |head| head == Head::Empty) {
                Ok(()) => return Ok(()),
                Err((back, _)) => k = back,
            }
        }
    }

    /// Releases the lock, handing it to the most recent live waiter if any.
    pub(crate) fn unlock(&self) {
        loop {
            match self.head.load() {
                Head::Empty => panic!("unlock of an unlocked lock"),
                Head::Marked => {
                    if self.head.compare_exchange(Head::Marked, Head::Empty).is_ok() {
                        return;
                    }
                }
                Head::Waiting(_) => {
                    let Some(next_owner) = self.head.pop() else {
                        continue;
                    };
                    let _frame = next_owner.frame_id();
                    if next_owner.resume() {
                        return;
                    }
                    debug!(frame = %_frame, "lock hand-off rejected by unwinding frame");
                }
            }
        }
    }

    pub(crate) fn acquire(&self) -> Acquire<'_> {
        Acquire {
            lock: self,
            stage: AcquireStage::Start,
        }
    }
}

impl Default for RawLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RawLock {
    fn drop(&mut self) {
        debug_assert!(!self.has_waiters(), "lock dropped with parked frames");
    }
}

impl std::fmt::Debug for RawLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawLock")
            .field("locked", &self.is_locked())
            .field("waiters", &self.has_waiters())
            .finish()
    }
}

#[derive(Debug)]
enum AcquireStage {
    Start,
    Parked(ResumeTicket),
    Owned,
}

/// Awaitable acquisition of a [`RawLock`].
///
/// If the awaiting frame unwinds after ownership was already handed to it
/// but before it observed the hand-off, dropping this releases the lock on
/// the frame's behalf.
#[derive(Debug)]
pub(crate) struct Acquire<'a> {
    lock: &'a RawLock,
    stage: AcquireStage,
}

impl Awaitable for Acquire<'_> {
    type Output = ();

    fn ready(&self) -> bool {
        false
    }

    fn suspend(&mut self, k: Continuation) -> Suspend {
        let ticket = k.ticket();
        match self.lock.lock_or_park(k) {
            Ok(()) => {
                self.stage = AcquireStage::Parked(ticket);
                Suspend::Pending
            }
            Err(k) => Suspend::Ready(k),
        }
    }

    fn resume(&mut self) {
        self.stage = AcquireStage::Owned;
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        if let AcquireStage::Parked(ticket) = &self.stage {
            if ticket.was_resumed() {
                self.lock.unlock();
            }
        }
    }
}
