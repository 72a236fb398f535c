//! The awaitable protocol.
//!
//! Anything a frame can wait on implements [`Awaitable`]:
//!
//! 1. [`ready`](Awaitable::ready) is a side-effect-free poll; `true` skips
//!    suspension entirely.
//! 2. [`suspend`](Awaitable::suspend) receives the frame's [`Continuation`].
//!    The awaitable either keeps it and returns [`Suspend::Pending`], taking
//!    on the obligation to resume it exactly once, or decides synchronously
//!    that the result is available and hands it back with
//!    [`Suspend::Ready`].
//! 3. [`resume`](Awaitable::resume) is called once afterwards to extract the
//!    result.
//!
//! Frame bodies are ordinary `async` blocks; [`co_await`] (or `.await` on any
//! primitive in this crate, which implement `IntoFuture`) bridges an
//! awaitable into that world. The bridge only works while the body is being
//! driven by a frame.

use crate::frame::{Continuation, ResumeTicket, trampoline};
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Outcome of [`Awaitable::suspend`].
#[must_use]
#[derive(Debug)]
pub enum Suspend {
    /// The continuation was stored; the frame returns control to its resumer.
    Pending,
    /// The result is already available; the frame continues without parking.
    Ready(Continuation),
}

/// Something a frame can suspend on.
pub trait Awaitable {
    /// The value produced by [`resume`](Self::resume).
    type Output;

    /// Returns true if the result is available without suspending.
    fn ready(&self) -> bool;

    /// Offers the suspending frame's continuation.
    fn suspend(&mut self, continuation: Continuation) -> Suspend;

    /// Extracts the result. Called at most once per suspension, after
    /// readiness was confirmed or the continuation was resumed.
    fn resume(&mut self) -> Self::Output;
}

#[derive(Debug)]
enum Stage {
    Start,
    Suspended(ResumeTicket),
    Finished,
}

/// Future adapter driving an [`Awaitable`] from inside a frame body.
#[must_use = "awaitables do nothing unless awaited"]
#[derive(Debug)]
pub struct Await<A> {
    awaitable: A,
    stage: Stage,
}

impl<A> Await<A> {
    /// Returns the wrapped awaitable.
    pub fn get_ref(&self) -> &A {
        &self.awaitable
    }
}

impl<A: Awaitable + Unpin> Future for Await<A> {
    type Output = A::Output;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<A::Output> {
        let this = self.get_mut();
        match &this.stage {
            Stage::Start => {
                if this.awaitable.ready() {
                    this.stage = Stage::Finished;
                    return Poll::Ready(this.awaitable.resume());
                }
                let Some(core) = trampoline::current() else {
                    panic!("awaitable polled outside of a frame");
                };
                let continuation = Continuation::new(core);
                let ticket = continuation.ticket();
                match this.awaitable.suspend(continuation) {
                    Suspend::Pending => {
                        this.stage = Stage::Suspended(ticket);
                        Poll::Pending
                    }
                    Suspend::Ready(continuation) => {
                        continuation.dismiss();
                        this.stage = Stage::Finished;
                        Poll::Ready(this.awaitable.resume())
                    }
                }
            }
            Stage::Suspended(ticket) => {
                if ticket.was_resumed() {
                    this.stage = Stage::Finished;
                    Poll::Ready(this.awaitable.resume())
                } else {
                    Poll::Pending
                }
            }
            Stage::Finished => panic!("`Await` polled after completion"),
        }
    }
}

/// Wraps an awaitable so it can be `.await`ed inside a frame body.
pub fn co_await<A: Awaitable + Unpin>(awaitable: A) -> Await<A> {
    Await {
        awaitable,
        stage: Stage::Start,
    }
}

/// Suspends until the frame is cancelled.
///
/// The frame's own continuation is parked inside the awaitable, so the
/// frame can only leave this point by being asked to unwind (for example by
/// dropping the task that owns it).
#[derive(Debug, Default)]
pub struct SuspendAlways {
    parked: Option<Continuation>,
}

impl Awaitable for SuspendAlways {
    type Output = ();

    fn ready(&self) -> bool {
        false
    }

    fn suspend(&mut self, continuation: Continuation) -> Suspend {
        self.parked = Some(continuation);
        Suspend::Pending
    }

    fn resume(&mut self) {}
}

impl IntoFuture for SuspendAlways {
    type Output = ();
    type IntoFuture = Await<Self>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(self)
    }
}

/// Returns an awaitable that never completes on its own.
pub fn suspend_always() -> SuspendAlways {
    SuspendAlways::default()
}

/// An awaitable that is always ready.
#[derive(Debug, Default, Clone, Copy)]
pub struct SuspendNever;

impl Awaitable for SuspendNever {
    type Output = ();

    fn ready(&self) -> bool {
        true
    }

    fn suspend(&mut self, continuation: Continuation) -> Suspend {
        Suspend::Ready(continuation)
    }

    fn resume(&mut self) {}
}

impl IntoFuture for SuspendNever {
    type Output = ();
    type IntoFuture = Await<Self>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(self)
    }
}

/// Returns an awaitable that completes immediately.
pub fn suspend_never() -> SuspendNever {
    SuspendNever
}
