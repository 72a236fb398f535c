//! Bridges from plain threads into the frame world.
//!
//! These functions park the calling OS thread until an awaitable resolves.
//! They start a helper frame that awaits the awaitable and signals a
//! condition variable, so the awaitable may be resumed from any thread.
//!
//! Calling them from inside a frame would block the thread that is supposed
//! to drive other frames, so doing so panics.

use crate::frame::{self, FrameBox, FrameCore, FrameSink};
use crate::tracing_compat::trace;
use crate::types::CancelReason;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::future::IntoFuture;
use std::panic;
use std::sync::Arc;
use std::time::{Duration, Instant};

enum Outcome<T> {
    Pending,
    Done(T),
    Panicked(Box<dyn Any + Send>),
    Cancelled(CancelReason),
}

struct Signal<T> {
    outcome: Mutex<Outcome<T>>,
    cond: Condvar,
}

impl<T> Signal<T> {
    fn set(&self, outcome: Outcome<T>) {
        let mut slot = self.outcome.lock();
        if matches!(*slot, Outcome::Pending) {
            *slot = outcome;
            self.cond.notify_all();
        }
    }

    fn take(&self) -> Outcome<T> {
        std::mem::replace(&mut *self.outcome.lock(), Outcome::Pending)
    }
}

impl<T: Send> FrameSink for Signal<T> {
    fn panicked(&self, payload: Box<dyn Any + Send>) {
        self.set(Outcome::Panicked(payload));
    }

    fn cancelled(&self, reason: CancelReason) {
        self.set(Outcome::Cancelled(reason));
    }
}

struct Helper<T> {
    signal: Arc<Signal<T>>,
    frame: Arc<FrameCore>,
}

fn start<A>(awaitable: A) -> Helper<A::Output>
where
    A: IntoFuture + Send + 'static,
    A::IntoFuture: Send,
    A::Output: Send + 'static,
{
    assert!(
        frame::current_id().is_none(),
        "blocking wait called from inside a frame"
    );
    let signal = Arc::new(Signal {
        outcome: Mutex::new(Outcome::Pending),
        cond: Condvar::new(),
    });
    let done = Arc::clone(&signal);
    let sink: Arc<dyn FrameSink> = signal.clone();
    let frame = FrameCore::new(
        FrameBox::new(async move {
            let output = awaitable.await;
            done.set(Outcome::Done(output));
        }),
        Some(sink),
    );
    trace!(frame = %frame.id(), "blocking helper starting");
    frame.schedule(false);
    Helper { signal, frame }
}

fn finish<T>(outcome: Outcome<T>) -> Option<T> {
    match outcome {
        Outcome::Done(value) => Some(value),
        Outcome::Panicked(payload) => panic::resume_unwind(payload),
        Outcome::Cancelled(_) | Outcome::Pending => None,
    }
}

/// Blocks until `awaitable` resolves and returns its output.
///
/// A panic raised while awaiting is re-raised on the calling thread.
///
/// # Panics
///
/// Panics when called from inside a frame, or when the helper frame is
/// cancelled before the awaitable resolves.
pub fn get<A>(awaitable: A) -> A::Output
where
    A: IntoFuture + Send + 'static,
    A::IntoFuture: Send,
    A::Output: Send + 'static,
{
    let helper = start(awaitable);
    let mut slot = helper.signal.outcome.lock();
    loop {
        match std::mem::replace(&mut *slot, Outcome::Pending) {
            Outcome::Pending => helper.signal.cond.wait(&mut slot),
            Outcome::Done(value) => return value,
            Outcome::Panicked(payload) => {
                drop(slot);
                panic::resume_unwind(payload);
            }
            Outcome::Cancelled(reason) => {
                drop(slot);
                panic!("blocking wait cancelled: {reason}");
            }
        }
    }
}

/// Blocks until `awaitable` resolves, discarding its output.
pub fn wait<A>(awaitable: A)
where
    A: IntoFuture + Send + 'static,
    A::IntoFuture: Send,
    A::Output: Send + 'static,
{
    drop(get(awaitable));
}

/// Like [`get`], giving up after `timeout`.
///
/// On expiry the helper frame is cancelled, which drops the awaitable (and
/// with it any task it owned) and `None` is returned.
pub fn wait_timeout<A>(awaitable: A, timeout: Duration) -> Option<A::Output>
where
    A: IntoFuture + Send + 'static,
    A::IntoFuture: Send,
    A::Output: Send + 'static,
{
    wait_deadline(awaitable, Instant::now() + timeout)
}

/// Like [`get`], giving up at `deadline`.
pub fn wait_deadline<A>(awaitable: A, deadline: Instant) -> Option<A::Output>
where
    A: IntoFuture + Send + 'static,
    A::IntoFuture: Send,
    A::Output: Send + 'static,
{
    let helper = start(awaitable);
    {
        let mut slot = helper.signal.outcome.lock();
        while matches!(*slot, Outcome::Pending) {
            if helper.signal.cond.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
    }
    let outcome = helper.signal.take();
    if matches!(outcome, Outcome::Pending) {
        trace!(frame = %helper.frame.id(), "blocking wait timed out");
        helper.frame.request_cancel(CancelReason::timeout());
        // The awaitable may have resolved while the cancellation was in flight.
        return finish(helper.signal.take());
    }
    finish(outcome)
}
