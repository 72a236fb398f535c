//! Serialization of synchronous actions between frames.
//!
//! A critical section is a mutex without a payload: frames `enter`, run some
//! synchronous logic and leave when the guard drops. Leaving hands the
//! section to one parked frame, exactly like a mutex unlock.

use super::raw_lock::{Acquire, RawLock};
use crate::awaitable::{Await, Awaitable, Suspend, co_await};
use crate::frame::Continuation;
use std::future::IntoFuture;

/// Mutual exclusion over a region of logic rather than a value.
#[derive(Debug, Default)]
pub struct CriticalSection {
    raw: RawLock,
}

impl CriticalSection {
    /// Creates a section nobody is inside.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            raw: RawLock::new(),
        }
    }

    /// Returns an awaitable resolving to a guard once the section is entered.
    pub fn enter(&self) -> Enter<'_> {
        Enter {
            section: self,
            acquire: self.raw.acquire(),
        }
    }

    /// Enters the section if it is free.
    pub fn try_enter(&self) -> Option<CriticalGuard<'_>> {
        self.raw.try_lock().then(|| CriticalGuard { section: self })
    }

    /// Returns true if some frame is inside the section.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Enters the section, runs `f` and leaves.
    pub async fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter().await;
        f()
    }
}

/// Awaitable returned by [`CriticalSection::enter`].
#[derive(Debug)]
pub struct Enter<'a> {
    section: &'a CriticalSection,
    acquire: Acquire<'a>,
}

impl<'a> Awaitable for Enter<'a> {
    type Output = CriticalGuard<'a>;

    fn ready(&self) -> bool {
        self.acquire.ready()
    }

    fn suspend(&mut self, k: Continuation) -> Suspend {
        self.acquire.suspend(k)
    }

    fn resume(&mut self) -> CriticalGuard<'a> {
        self.acquire.resume();
        CriticalGuard {
            section: self.section,
        }
    }
}

impl<'a> IntoFuture for Enter<'a> {
    type Output = CriticalGuard<'a>;
    type IntoFuture = Await<Self>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(self)
    }
}

/// Proof of being inside a [`CriticalSection`]; leaves on drop.
#[must_use = "if unused the section is left immediately"]
#[derive(Debug)]
pub struct CriticalGuard<'a> {
    section: &'a CriticalSection,
}

impl Drop for CriticalGuard<'_> {
    fn drop(&mut self) {
        self.section.raw.unlock();
    }
}
