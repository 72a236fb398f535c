//! Per-thread run loop that bounds native stack depth.
//!
//! The first frame run on a thread becomes the outermost run: it executes
//! inline and then drains a FIFO of work queued by nested resumptions.
//! Resumptions requested while `max_inline_depth` runs are already active on
//! the thread are queued instead of recursing, so a chain of N frames each
//! completing the next costs O(1) stack.
//!
//! Cancelling an idle frame unwinds it on the canceller's stack. Unwinds
//! requested by the destructors of a frame being unwound are queued and
//! finished by the outermost unwind before it returns, so tearing down a
//! long chain completes synchronously without deep recursion.

use super::{Continuation, FrameCore};
use crate::config;
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::Arc;

enum Work {
    Run(Arc<FrameCore>),
    Resume(Continuation),
}

struct Trampoline {
    depth: Cell<usize>,
    limit: Cell<usize>,
    queue: RefCell<VecDeque<Work>>,
    unwinding: Cell<bool>,
    unwinds: RefCell<VecDeque<Arc<FrameCore>>>,
    current: RefCell<SmallVec<[Arc<FrameCore>; 4]>>,
}

impl Trampoline {
    fn new() -> Self {
        Self {
            depth: Cell::new(0),
            limit: Cell::new(0),
            queue: RefCell::new(VecDeque::new()),
            unwinding: Cell::new(false),
            unwinds: RefCell::new(VecDeque::new()),
            current: RefCell::new(SmallVec::new()),
        }
    }

    fn limit(&self) -> usize {
        let limit = self.limit.get();
        if limit != 0 {
            return limit;
        }
        let limit = config::current().max_inline_depth.max(1);
        self.limit.set(limit);
        limit
    }
}

thread_local! {
    static TRAMPOLINE: Trampoline = Trampoline::new();
}

struct DepthGuard {
    outermost: bool,
}

impl DepthGuard {
    fn enter() -> Self {
        let outermost = TRAMPOLINE.with(|t| {
            let depth = t.depth.get();
            t.depth.set(depth + 1);
            depth == 0
        });
        Self { outermost }
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        TRAMPOLINE.with(|t| t.depth.set(t.depth.get() - 1));
    }
}

/// Runs a dispatched frame now, or queues it if too many runs are nested.
pub(crate) fn dispatch(core: Arc<FrameCore>) {
    let core = TRAMPOLINE.with(|t| {
        let depth = t.depth.get();
        if depth > 0 && depth >= t.limit() {
            t.queue.borrow_mut().push_back(Work::Run(core));
            None
        } else {
            Some(core)
        }
    });
    if let Some(core) = core {
        run_inline(core);
    }
}

/// Runs a dispatched frame on the caller's stack regardless of nesting.
pub(crate) fn run_inline(core: Arc<FrameCore>) {
    let depth = DepthGuard::enter();
    core.run();
    if depth.outermost {
        drain();
    }
}

/// Resumes `k` after the work already queued on this thread.
pub(crate) fn defer(k: Continuation) {
    let k = TRAMPOLINE.with(|t| {
        if t.depth.get() == 0 {
            Some(k)
        } else {
            t.queue.borrow_mut().push_back(Work::Resume(k));
            None
        }
    });
    if let Some(k) = k {
        k.resume();
    }
}

struct UnwindGuard;

impl Drop for UnwindGuard {
    fn drop(&mut self) {
        TRAMPOLINE.with(|t| t.unwinding.set(false));
    }
}

/// Unwinds a frame the caller has just moved to `CLOSING`.
///
/// Returns once the frame and every frame its destructors cancelled have
/// been unwound.
pub(crate) fn unwind(core: Arc<FrameCore>) {
    let core = TRAMPOLINE.with(|t| {
        if t.unwinding.replace(true) {
            t.unwinds.borrow_mut().push_back(core);
            None
        } else {
            Some(core)
        }
    });
    let Some(core) = core else {
        return;
    };
    let _guard = UnwindGuard;
    core.unwind();
    while let Some(next) = TRAMPOLINE.with(|t| t.unwinds.borrow_mut().pop_front()) {
        next.unwind();
    }
}

fn drain() {
    loop {
        let next = TRAMPOLINE.with(|t| t.queue.borrow_mut().pop_front());
        match next {
            Some(Work::Run(core)) => core.run(),
            Some(Work::Resume(k)) => {
                k.resume();
            }
            None => break,
        }
    }
}

pub(crate) struct CurrentFrame(());

/// Marks `core` as the frame being polled until the guard drops.
pub(crate) fn enter_frame(core: &Arc<FrameCore>) -> CurrentFrame {
    TRAMPOLINE.with(|t| t.current.borrow_mut().push(Arc::clone(core)));
    CurrentFrame(())
}

impl Drop for CurrentFrame {
    fn drop(&mut self) {
        TRAMPOLINE.with(|t| {
            t.current.borrow_mut().pop();
        });
    }
}

/// Returns the innermost frame being polled on this thread.
pub(crate) fn current() -> Option<Arc<FrameCore>> {
    TRAMPOLINE.with(|t| t.current.borrow().last().cloned())
}

/// Returns the number of frame runs active on this thread.
pub(crate) fn depth() -> usize {
    TRAMPOLINE.with(|t| t.depth.get())
}
