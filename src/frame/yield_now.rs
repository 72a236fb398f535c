use super::{Continuation, trampoline};
use crate::awaitable::{Await, Awaitable, Suspend, co_await};
use std::future::IntoFuture;

/// Awaitable that re-queues the current frame behind the work already
/// pending on this thread's trampoline.
#[derive(Debug, Default)]
pub struct YieldNow {
    yielded: bool,
}

impl Awaitable for YieldNow {
    type Output = ();

    fn ready(&self) -> bool {
        self.yielded
    }

    fn suspend(&mut self, continuation: Continuation) -> Suspend {
        self.yielded = true;
        trampoline::defer(continuation);
        Suspend::Pending
    }

    fn resume(&mut self) {}
}

impl IntoFuture for YieldNow {
    type Output = ();
    type IntoFuture = Await<Self>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(self)
    }
}

/// Yields execution back to the trampoline, allowing other queued frames to run.
#[must_use]
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}
