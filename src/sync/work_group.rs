//! Barrier over a dynamic amount of outstanding work.
//!
//! Each unit of work holds a token from [`WorkGroup::add`]; dropping the
//! token retires it. One frame at a time may [`wait`](WorkGroup::wait) for
//! the count to reach zero. The waiter slot is a single-entry waiter list:
//!
//! - `Empty`: nobody is waiting,
//! - `Waiting`: the parked waiter,
//! - `Marked`: the last token retired and there was nobody to wake.

use super::waiter_list::{AtomicHead, Head};
use crate::awaitable::{Await, Awaitable, Suspend, co_await};
use crate::frame::{Continuation, ResumeTicket};
use crate::tracing_compat::{trace, warn};
use std::future::IntoFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts outstanding work and lets one frame wait for it to drain.
#[derive(Debug, Default)]
pub struct WorkGroup {
    count: AtomicUsize,
    slot: AtomicHead,
}

impl WorkGroup {
    /// Creates a group with no outstanding work.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one unit of work.
    pub fn add(&self) -> Work<'_> {
        self.count.fetch_add(1, Ordering::AcqRel);
        Work { group: self }
    }

    /// Registers one unit of work with a token that keeps the group alive.
    pub fn add_owned(self: &Arc<Self>) -> OwnedWork {
        self.count.fetch_add(1, Ordering::AcqRel);
        OwnedWork {
            group: Arc::clone(self),
        }
    }

    /// Number of tokens not yet retired.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Returns an awaitable that completes once no work is outstanding.
    pub fn wait(&self) -> WaitIdle<'_> {
        WaitIdle {
            group: self,
            parked: None,
        }
    }

    fn retire(&self) {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "work group token retired twice");
        if prev != 1 {
            return;
        }
        let chain = self.slot.swap(Head::Marked);
        for k in chain {
            trace!(frame = %k.frame_id(), "work group drained");
            k.resume();
        }
    }
}

impl Drop for WorkGroup {
    fn drop(&mut self) {
        let outstanding = *self.count.get_mut();
        if outstanding != 0 {
            warn!(outstanding, "work group dropped with outstanding work");
        }
        debug_assert_eq!(outstanding, 0, "work group dropped with outstanding work");
    }
}

/// Token for one unit of work in a [`WorkGroup`]; retires on drop.
#[must_use = "dropping the token retires the work immediately"]
#[derive(Debug)]
pub struct Work<'a> {
    group: &'a WorkGroup,
}

impl Drop for Work<'_> {
    fn drop(&mut self) {
        self.group.retire();
    }
}

/// Owned token for one unit of work; retires on drop.
#[must_use = "dropping the token retires the work immediately"]
#[derive(Debug)]
pub struct OwnedWork {
    group: Arc<WorkGroup>,
}

impl Drop for OwnedWork {
    fn drop(&mut self) {
        self.group.retire();
    }
}

/// Awaitable returned by [`WorkGroup::wait`].
#[derive(Debug)]
pub struct WaitIdle<'a> {
    group: &'a WorkGroup,
    parked: Option<ResumeTicket>,
}

impl Awaitable for WaitIdle<'_> {
    type Output = ();

    fn ready(&self) -> bool {
        self.group.outstanding() == 0
    }

    fn suspend(&mut self, mut k: Continuation) -> Suspend {
        let slot = &self.group.slot;
        loop {
            if self.group.outstanding() == 0 {
                return Suspend::Ready(k);
            }
            match slot.load() {
                Head::Marked => {
                    // Left over from an earlier drain.
                    let _ = slot.compare_exchange(Head::Marked, Head::Empty);
                }
                Head::Waiting(_) => panic!("work group already has a waiting frame"),
                Head::Empty => {
                    let ticket = k.ticket();
                    let frame = Arc::clone(k.core());
                    match slot.push_unless(k, |head| head != Head::Empty) {
                        Ok(()) => {}
                        Err((back, _)) => {
                            k = back;
                            continue;
                        }
                    }
                    // The last token may have retired between the count check
                    // and the push, finding nobody to wake.
                    if self.group.outstanding() == 0 {
                        if let Some(back) = slot.take_if(&frame, Head::Empty) {
                            return Suspend::Ready(back);
                        }
                    }
                    self.parked = Some(ticket);
                    return Suspend::Pending;
                }
            }
        }
    }

    fn resume(&mut self) {
        self.parked = None;
    }
}

impl Drop for WaitIdle<'_> {
    fn drop(&mut self) {
        let Some(ticket) = self.parked.take() else {
            return;
        };
        if ticket.was_resumed() {
            return;
        }
        if let Some(frame) = ticket.frame() {
            if let Some(k) = self.group.slot.take_if(&frame, Head::Empty) {
                k.dismiss();
            }
        }
    }
}

impl<'a> IntoFuture for WaitIdle<'a> {
    type Output = ();
    type IntoFuture = Await<Self>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(self)
    }
}
