//! One-shot broadcast event.
//!
//! The root word is `Marked` while unset, with waiters threaded in front of
//! the mark, and `Empty` once set. [`Event::set`] swaps the word to `Empty`
//! and resumes the whole captured chain. An event cannot be reset.

use super::waiter_list::{AtomicHead, Head};
use crate::awaitable::{Await, Awaitable, Suspend, co_await};
use crate::frame::Continuation;
use crate::tracing_compat::trace;
use std::future::IntoFuture;

/// A one-shot event frames can wait on.
///
/// Dropping an event that was never set cancels the frames still waiting on
/// it.
pub struct Event {
    head: AtomicHead,
}

impl Event {
    /// Creates an unset event.
    #[must_use]
    pub fn new() -> Self {
        Self {
            head: AtomicHead::marked(),
        }
    }

    /// Sets the event and resumes every waiter. Returns false if the event
    /// was already set.
    pub fn set(&self) -> bool {
        if self.head.load() == Head::Empty {
            return false;
        }
        let chain = self.head.swap(Head::Empty);
        // A concurrent `set` that lost the swap captured `Empty`.
        if chain.root() == Head::Empty {
            return false;
        }
        let mut _woken = 0_usize;
        for k in chain {
            k.resume();
            _woken += 1;
        }
        trace!(woken = _woken, "event set");
        true
    }

    /// Returns true once the event has been set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.head.load() == Head::Empty
    }

    /// Returns an awaitable that completes once the event is set.
    pub fn wait(&self) -> Wait<'_> {
        Wait { event: self }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").field("set", &self.is_set()).finish()
    }
}

/// Awaitable returned by [`Event::wait`].
#[derive(Debug)]
pub struct Wait<'a> {
    event: &'a Event,
}

impl Awaitable for Wait<'_> {
    type Output = ();

    fn ready(&self) -> bool {
        self.event.is_set()
    }

    fn suspend(&mut self, k: Continuation) -> Suspend {
        match self.event.head.push_unless(k, |head| head == Head::Empty) {
            Ok(()) => Suspend::Pending,
            Err((k, _)) => Suspend::Ready(k),
        }
    }

    fn resume(&mut self) {}
}

impl<'a> IntoFuture for Wait<'a> {
    type Output = ();
    type IntoFuture = Await<Self>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(self)
    }
}

impl<'a> IntoFuture for &'a Event {
    type Output = ();
    type IntoFuture = Await<Wait<'a>>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(self.wait())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameBox, FrameCore};
    use crate::task::UniqueTask;
    use crate::test_utils::DropProbe;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn set_resumes_all_waiters() {
        init_test("set_resumes_all_waiters");
        let event = Arc::new(Event::new());
        let woken = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let event = Arc::clone(&event);
                let woken = Arc::clone(&woken);
                UniqueTask::new(async move {
                    event.wait().await;
                    woken.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        assert_eq!(woken.load(Ordering::SeqCst), 0);
        assert!(event.set());
        assert!(!event.set());
        assert_eq!(woken.load(Ordering::SeqCst), 4);
        assert!(tasks.iter().all(UniqueTask::is_ready));
        crate::test_complete!("set_resumes_all_waiters");
    }

    #[test]
    fn wait_after_set_does_not_suspend() {
        init_test("wait_after_set_does_not_suspend");
        let event = Arc::new(Event::new());
        event.set();
        let e2 = Arc::clone(&event);
        let task = UniqueTask::new(async move {
            (&*e2).await;
            7
        });
        assert!(task.is_ready());
        assert_eq!(crate::blocking::get(task), Ok(7));
        crate::test_complete!("wait_after_set_does_not_suspend");
    }

    #[test]
    fn dropping_unset_event_cancels_waiters() {
        init_test("dropping_unset_event_cancels_waiters");
        let probe = DropProbe::new();
        let guard = probe.guard();
        let frame = FrameCore::new(
            FrameBox::new(async move {
                let _guard = guard;
            }),
            None,
        );
        let event = Event::new();
        assert!(
            event
                .head
                .push_unless(Continuation::new(Arc::clone(&frame)), |_| false)
                .is_ok()
        );
        drop(event);
        assert!(frame.is_done());
        assert_eq!(probe.dropped(), 1);
        crate::test_complete!("dropping_unset_event_cancels_waiters");
    }
}
