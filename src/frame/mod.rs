//! Frames: one in-progress invocation of a suspendable computation.
//!
//! A frame pairs a type-erased body future (locals and resume point live in
//! the compiler-generated state machine) with a [`FrameCore`] header that
//! carries everything the lock-free primitives need:
//!
//! - a run-state word combining the scheduling state with a resume epoch,
//! - a cooperative cancellation request,
//! - one word of intrusive link storage, borrowed by whichever waiter list
//!   currently holds the frame's [`Continuation`],
//! - an optional completion sink told about panics and cancellations.
//!
//! # Run states
//!
//! ```text
//!   IDLE ──resume──▶ SCHEDULED ──claim──▶ RUNNING ──pending──▶ IDLE
//!                                           │  ▲
//!                                  resume   ▼  │ re-poll
//!                                         NOTIFIED
//!   {IDLE, SCHEDULED} ──cancel──▶ CLOSING ──unwind──▶ DONE
//!   {RUNNING, NOTIFIED} ──cancel──▶ CLOSING after the current poll
//!   RUNNING ──ready/panic──▶ DONE
//! ```
//!
//! A resumption is accepted unless the frame is `CLOSING` or `DONE`.
//! Accepted continuation resumptions advance the epoch in the same atomic
//! step, which lets an awaiting adapter distinguish a real resumption from a
//! spurious waker poll.

mod alloc;
mod continuation;
pub(crate) mod trampoline;
mod yield_now;

pub use alloc::{ArenaStats, FrameAllocator, GlobalFrameAlloc, StackArena};
pub(crate) use alloc::FrameBox;
pub use continuation::{Continuation, ResumeTicket};
pub use yield_now::{YieldNow, yield_now};

use crate::types::{CancelReason, FrameId};
use crate::tracing_compat::{trace, warn};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use std::task::{Context, Poll, Wake, Waker};

const IDLE: u64 = 0;
const SCHEDULED: u64 = 1;
const RUNNING: u64 = 2;
const NOTIFIED: u64 = 3;
const CLOSING: u64 = 4;
const DONE: u64 = 5;

const STATE_MASK: u64 = 0xff;
const EPOCH_UNIT: u64 = 1 << 8;

/// Receives the terminal outcomes a body future cannot report itself.
pub(crate) trait FrameSink: Send + Sync {
    /// The body panicked while being polled.
    fn panicked(&self, payload: Box<dyn Any + Send>);
    /// The frame unwound after a cancellation request.
    fn cancelled(&self, reason: CancelReason);
}

/// Result of offering a resumption to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Accept {
    /// The frame was idle; the caller must dispatch it.
    Dispatch,
    /// The frame is already scheduled or running and will observe the resumption.
    Coalesced,
    /// The frame is unwinding or finished.
    Rejected,
}

/// Shared header of a frame.
pub(crate) struct FrameCore {
    id: FrameId,
    word: AtomicU64,
    cancel_requested: AtomicBool,
    cancel_reason: Mutex<Option<CancelReason>>,
    body: Mutex<Option<FrameBox>>,
    sink: Option<Arc<dyn FrameSink>>,
    /// Intrusive "next" pointer for whichever waiter list holds this frame.
    pub(crate) link: AtomicPtr<FrameCore>,
}

impl FrameCore {
    pub(crate) fn new(body: FrameBox, sink: Option<Arc<dyn FrameSink>>) -> Arc<Self> {
        let core = Arc::new(Self {
            id: FrameId::next(),
            word: AtomicU64::new(IDLE),
            cancel_requested: AtomicBool::new(false),
            cancel_reason: Mutex::new(None),
            body: Mutex::new(Some(body)),
            sink,
            link: AtomicPtr::new(std::ptr::null_mut()),
        });
        trace!(frame = %core.id, "frame created");
        core
    }

    /// Creates a frame and runs it until its first suspension.
    #[cfg(test)]
    pub(crate) fn start(body: FrameBox, sink: Option<Arc<dyn FrameSink>>) -> Arc<Self> {
        let core = Self::new(body, sink);
        core.schedule(false);
        core
    }

    pub(crate) fn id(&self) -> FrameId {
        self.id
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.word.load(Ordering::Acquire) >> 8
    }

    pub(crate) fn is_done(&self) -> bool {
        self.word.load(Ordering::Acquire) & STATE_MASK == DONE
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Offers a resumption. `advance` marks a continuation resume, as opposed
    /// to a waker notification.
    pub(crate) fn accept(&self, advance: bool) -> Accept {
        let bump = if advance { EPOCH_UNIT } else { 0 };
        let mut cur = self.word.load(Ordering::Acquire);
        loop {
            let (next, outcome) = match cur & STATE_MASK {
                IDLE => (SCHEDULED, Accept::Dispatch),
                RUNNING => (NOTIFIED, Accept::Coalesced),
                SCHEDULED | NOTIFIED if !advance => return Accept::Coalesced,
                state @ (SCHEDULED | NOTIFIED) => (state, Accept::Coalesced),
                _ => return Accept::Rejected,
            };
            let new = ((cur & !STATE_MASK) + bump) | next;
            match self
                .word
                .compare_exchange_weak(cur, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return outcome,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Offers a resumption and dispatches the frame on the trampoline if it
    /// was idle. Returns whether the resumption was accepted.
    pub(crate) fn schedule(self: &Arc<Self>, advance: bool) -> bool {
        match self.accept(advance) {
            Accept::Dispatch => {
                trampoline::dispatch(Arc::clone(self));
                true
            }
            Accept::Coalesced => true,
            Accept::Rejected => false,
        }
    }

    /// Like [`schedule`](Self::schedule) but runs the frame on the caller's
    /// stack even when nested inside another frame.
    pub(crate) fn schedule_inline(self: &Arc<Self>, advance: bool) -> bool {
        match self.accept(advance) {
            Accept::Dispatch => {
                trampoline::run_inline(Arc::clone(self));
                true
            }
            Accept::Coalesced => true,
            Accept::Rejected => false,
        }
    }

    /// Records a cancellation request.
    ///
    /// An idle or scheduled frame unwinds on the caller's stack before this
    /// returns. A running frame unwinds once its current poll returns.
    pub(crate) fn request_cancel(self: &Arc<Self>, reason: CancelReason) {
        {
            let mut slot = self.cancel_reason.lock();
            match slot.as_mut() {
                Some(existing) => {
                    existing.strengthen(&reason);
                }
                None => *slot = Some(reason),
            }
        }
        self.cancel_requested.store(true, Ordering::Release);

        let mut cur = self.word.load(Ordering::Acquire);
        loop {
            let next = match cur & STATE_MASK {
                IDLE | SCHEDULED => CLOSING,
                RUNNING => NOTIFIED,
                _ => return,
            };
            match self.word.compare_exchange_weak(
                cur,
                (cur & !STATE_MASK) | next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    trace!(frame = %self.id, "cancellation requested");
                    if next == CLOSING {
                        trampoline::unwind(Arc::clone(self));
                    }
                    return;
                }
                Err(actual) => cur = actual,
            }
        }
    }

    fn set_state(&self, state: u64) {
        let _ = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                Some((w & !STATE_MASK) | state)
            });
    }

    /// Drives the frame after a dispatch. Only the party that moved the frame
    /// into `SCHEDULED` calls this, exactly once per move. A frame found
    /// `CLOSING` belongs to the canceller that is unwinding it.
    pub(crate) fn run(self: Arc<Self>) {
        let mut cur = self.word.load(Ordering::Acquire);
        loop {
            match cur & STATE_MASK {
                SCHEDULED => match self.word.compare_exchange_weak(
                    cur,
                    (cur & !STATE_MASK) | RUNNING,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(actual) => cur = actual,
                },
                _ => return,
            }
        }

        let waker = Waker::from(Arc::clone(&self));
        loop {
            if self.is_cancel_requested() {
                self.set_state(CLOSING);
                trampoline::unwind(self);
                return;
            }
            let Some(mut body) = self.body.lock().take() else {
                self.set_state(DONE);
                return;
            };

            trace!(frame = %self.id, "frame resumed");
            let polled = {
                let _current = trampoline::enter_frame(&self);
                let mut cx = Context::from_waker(&waker);
                panic::catch_unwind(AssertUnwindSafe(|| body.poll(&mut cx)))
            };

            match polled {
                Ok(Poll::Ready(())) => {
                    drop(body);
                    self.set_state(DONE);
                    trace!(frame = %self.id, "frame finished");
                    return;
                }
                Err(payload) => {
                    if panic::catch_unwind(AssertUnwindSafe(|| drop(body))).is_err() {
                        warn!(frame = %self.id, "destructor panicked while dropping a panicked frame");
                    }
                    self.set_state(DONE);
                    trace!(frame = %self.id, "frame panicked");
                    match &self.sink {
                        Some(sink) => sink.panicked(payload),
                        None => {
                            warn!(
                                frame = %self.id,
                                panic = %crate::types::PanicPayload::from_any(payload.as_ref()),
                                "detached frame panicked"
                            );
                        }
                    }
                    return;
                }
                Ok(Poll::Pending) => {
                    *self.body.lock() = Some(body);
                    if self.is_cancel_requested() {
                        self.set_state(CLOSING);
                        trampoline::unwind(self);
                        return;
                    }
                    if !self.park() {
                        continue;
                    }
                    trace!(frame = %self.id, "frame suspended");
                    return;
                }
            }
        }
    }

    /// Moves `RUNNING` to `IDLE`. Returns false if a resumption arrived
    /// during the poll, in which case the frame is `RUNNING` again.
    fn park(&self) -> bool {
        let mut cur = self.word.load(Ordering::Acquire);
        loop {
            let next = match cur & STATE_MASK {
                RUNNING => IDLE,
                NOTIFIED => RUNNING,
                _ => return true,
            };
            match self.word.compare_exchange_weak(
                cur,
                (cur & !STATE_MASK) | next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next == IDLE,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Drops the body (running every pending destructor), marks the frame
    /// done and reports the cancellation to the sink.
    fn unwind(self: &Arc<Self>) {
        let body = self.body.lock().take();
        let reason = self
            .cancel_reason
            .lock()
            .clone()
            .unwrap_or_else(CancelReason::orphaned);
        trace!(frame = %self.id, reason = %reason, "frame unwinding");
        if let Some(body) = body {
            if panic::catch_unwind(AssertUnwindSafe(|| drop(body))).is_err() {
                warn!(frame = %self.id, "destructor panicked during frame unwind");
            }
        }
        self.set_state(DONE);
        if let Some(sink) = &self.sink {
            sink.cancelled(reason);
        }
    }
}

impl Wake for FrameCore {
    fn wake(self: Arc<Self>) {
        self.schedule(false);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule(false);
    }
}

impl std::fmt::Debug for FrameCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let word = self.word.load(Ordering::Relaxed);
        f.debug_struct("FrameCore")
            .field("id", &self.id)
            .field("state", &(word & STATE_MASK))
            .field("epoch", &(word >> 8))
            .finish_non_exhaustive()
    }
}

/// Returns the id of the frame currently being polled on this thread.
#[must_use]
pub fn current_id() -> Option<FrameId> {
    trampoline::current().map(|core| core.id())
}

/// Returns true if the frame currently being polled on this thread has been
/// asked to cancel.
///
/// Frames unwind automatically at their next suspension point; long
/// synchronous stretches can poll this to bail out early.
#[must_use]
pub fn cancellation_requested() -> bool {
    trampoline::current().is_some_and(|core| core.is_cancel_requested())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSink {
        panics: AtomicUsize,
        cancels: AtomicUsize,
    }

    impl FrameSink for CountingSink {
        fn panicked(&self, _payload: Box<dyn Any + Send>) {
            self.panics.fetch_add(1, Ordering::SeqCst);
        }

        fn cancelled(&self, _reason: CancelReason) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sink() -> Arc<CountingSink> {
        Arc::new(CountingSink {
            panics: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        })
    }

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn ready_body_finishes_on_start() {
        init_test("ready_body_finishes_on_start");
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        let core = FrameCore::start(
            FrameBox::new(async move {
                ran2.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        );
        assert!(core.is_done());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        crate::test_complete!("ready_body_finishes_on_start");
    }

    #[test]
    fn accept_rejects_after_done() {
        init_test("accept_rejects_after_done");
        let core = FrameCore::start(FrameBox::new(async {}), None);
        assert_eq!(core.accept(true), Accept::Rejected);
        assert_eq!(core.epoch(), 0);
        crate::test_complete!("accept_rejects_after_done");
    }

    #[test]
    fn idle_frame_accepts_and_advances_epoch() {
        init_test("idle_frame_accepts_and_advances_epoch");
        let core = FrameCore::new(FrameBox::new(async {}), None);
        assert_eq!(core.accept(true), Accept::Dispatch);
        assert_eq!(core.epoch(), 1);
        // Already scheduled: coalesced, epoch still advances for continuation resumes.
        assert_eq!(core.accept(true), Accept::Coalesced);
        assert_eq!(core.epoch(), 2);
        assert_eq!(core.accept(false), Accept::Coalesced);
        assert_eq!(core.epoch(), 2);
        trampoline::dispatch(Arc::clone(&core));
        assert!(core.is_done());
        crate::test_complete!("idle_frame_accepts_and_advances_epoch");
    }

    #[test]
    fn panic_is_reported_to_sink() {
        init_test("panic_is_reported_to_sink");
        let sink = sink();
        let core = FrameCore::start(
            FrameBox::new(async { panic!("boom") }),
            Some(sink.clone() as Arc<dyn FrameSink>),
        );
        assert!(core.is_done());
        assert_eq!(sink.panics.load(Ordering::SeqCst), 1);
        assert_eq!(sink.cancels.load(Ordering::SeqCst), 0);
        crate::test_complete!("panic_is_reported_to_sink");
    }

    #[test]
    fn cancel_of_unstarted_frame_unwinds_synchronously() {
        init_test("cancel_of_unstarted_frame_unwinds_synchronously");
        let sink = sink();
        let probe = crate::test_utils::DropProbe::new();
        let guard = probe.guard();
        let core = FrameCore::new(
            FrameBox::new(async move {
                let _guard = guard;
            }),
            Some(sink.clone() as Arc<dyn FrameSink>),
        );
        core.request_cancel(CancelReason::user("test"));
        assert!(core.is_done());
        assert_eq!(probe.dropped(), 1);
        assert_eq!(sink.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(core.accept(true), Accept::Rejected);
        crate::test_complete!("cancel_of_unstarted_frame_unwinds_synchronously");
    }

    #[test]
    fn waker_reschedules_without_advancing_epoch() {
        init_test("waker_reschedules_without_advancing_epoch");
        let polls = Arc::new(AtomicUsize::new(0));
        let polls2 = Arc::clone(&polls);
        let core = FrameCore::start(
            FrameBox::new(std::future::poll_fn(move |cx| {
                if polls2.fetch_add(1, Ordering::SeqCst) == 0 {
                    // Self-wake during the poll: coalesced into a re-poll.
                    cx.waker().wake_by_ref();
                    Poll::Pending
                } else {
                    Poll::Ready(())
                }
            })),
            None,
        );
        assert!(core.is_done());
        assert_eq!(polls.load(Ordering::SeqCst), 2);
        assert_eq!(core.epoch(), 0);
        crate::test_complete!("waker_reschedules_without_advancing_epoch");
    }

    #[test]
    fn current_id_is_visible_inside_body() {
        init_test("current_id_is_visible_inside_body");
        let seen = Arc::new(Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        let core = FrameCore::start(
            FrameBox::new(async move {
                *seen2.lock() = current_id();
            }),
            None,
        );
        assert_eq!(*seen.lock(), Some(core.id()));
        assert_eq!(current_id(), None);
        assert!(!cancellation_requested());
        crate::test_complete!("current_id_is_visible_inside_body");
    }
}
