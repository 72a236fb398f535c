//! The right to resume one suspension of a frame.

#![allow(unsafe_code)]

use super::FrameCore;
use crate::types::{CancelReason, FrameId};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Weak};

/// A handle to a suspended frame, valid for exactly one resumption.
///
/// The awaited entity receives the continuation from the frame's `suspend`
/// step and must eventually either [`resume`](Self::resume) it, from any
/// thread, or drop it. Dropping an unresumed continuation asks the frame to
/// unwind cooperatively, which is how tearing down a primitive releases the
/// frames parked on it.
///
/// The type is deliberately not `Clone`: exactly-once resumption is enforced
/// by ownership.
pub struct Continuation {
    core: Arc<FrameCore>,
    epoch: u64,
}

impl Continuation {
    pub(crate) fn new(core: Arc<FrameCore>) -> Self {
        let epoch = core.epoch();
        Self { core, epoch }
    }

    fn into_core(self) -> Arc<FrameCore> {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the Arc is moved out exactly once.
        unsafe { std::ptr::read(&this.core) }
    }

    /// Resumes the frame. Returns false if the frame was already unwinding
    /// or finished and therefore will not observe this resumption.
    ///
    /// Resumptions issued while a frame is running on this thread are queued
    /// on the thread's trampoline, so long completion chains do not grow the
    /// native stack.
    pub fn resume(self) -> bool {
        let core = self.into_core();
        core.schedule(true)
    }

    /// Resumes the frame on the caller's stack, even when called from inside
    /// another frame.
    pub(crate) fn resume_inline(self) -> bool {
        let core = self.into_core();
        core.schedule_inline(true)
    }

    /// Releases the handle without resuming or cancelling the frame.
    ///
    /// Used when a suspend step decides the result is already available and
    /// the frame continues without ever having parked.
    pub(crate) fn dismiss(self) {
        drop(self.into_core());
    }

    /// Asks the frame to unwind with the given reason instead of resuming.
    pub fn cancel(self, reason: CancelReason) {
        let core = self.into_core();
        core.request_cancel(reason);
    }

    /// Returns the id of the frame this continuation resumes.
    #[must_use]
    pub fn frame_id(&self) -> FrameId {
        self.core.id()
    }

    /// Returns true if the frame has been asked to cancel.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.core.is_cancel_requested()
    }

    /// Returns a ticket that reports whether this continuation was resumed.
    #[must_use]
    pub fn ticket(&self) -> ResumeTicket {
        ResumeTicket {
            core: Arc::downgrade(&self.core),
            epoch: self.epoch,
        }
    }

    pub(crate) fn core(&self) -> &Arc<FrameCore> {
        &self.core
    }

    /// Converts into a raw frame pointer for an intrusive list.
    pub(crate) fn into_raw(self) -> *mut FrameCore {
        Arc::into_raw(self.into_core()).cast_mut()
    }

    /// Rebuilds a continuation from [`into_raw`](Self::into_raw).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `into_raw` and be converted back exactly once.
    pub(crate) unsafe fn from_raw(ptr: *mut FrameCore) -> Self {
        // SAFETY: the caller guarantees `ptr` came from `Arc::into_raw`.
        let core = unsafe { Arc::from_raw(ptr.cast_const()) };
        Self::new(core)
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        self.core.request_cancel(CancelReason::orphaned());
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("frame", &self.core.id())
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// Observes whether a particular suspension has been resumed.
#[derive(Debug, Clone)]
pub struct ResumeTicket {
    core: Weak<FrameCore>,
    epoch: u64,
}

impl ResumeTicket {
    /// Returns true once the continuation this ticket was taken from has
    /// been resumed and the resumption was accepted.
    #[must_use]
    pub fn was_resumed(&self) -> bool {
        self.core
            .upgrade()
            .is_some_and(|core| core.epoch() != self.epoch)
    }

    /// The suspended frame, if it is still alive.
    pub(crate) fn frame(&self) -> Option<Arc<FrameCore>> {
        self.core.upgrade()
    }
}
