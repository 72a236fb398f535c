//! Helpers shared by unit and integration tests.
//!
//! Available under `cfg(test)` and with the `test-internals` feature:
//!
//! - [`init_test_logging`]: idempotent `tracing` subscriber writing to the
//!   test harness,
//! - [`test_phase!`](crate::test_phase), [`test_complete!`](crate::test_complete)
//!   and [`assert_with_log!`](crate::assert_with_log) for structured test logs,
//! - [`DropProbe`]: counts destructor runs of values moved into frame bodies,
//! - [`Trigger`]: a manually fired awaitable, the simplest way to hold a frame
//!   suspended until the test decides otherwise.

use crate::awaitable::{Await, Awaitable, Suspend, co_await};
use crate::frame::Continuation;
use parking_lot::Mutex;
use std::future::IntoFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Installs a test-writer subscriber once per process.
///
/// `RUST_LOG` is honored when set; otherwise `INFO` and above are shown.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Logs the start of a test.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        ::tracing::info!(test = $name, "=== TEST START ===");
    };
}

/// Logs the successful end of a test.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        ::tracing::info!(test = $name, "=== TEST COMPLETE ===");
    };
}

/// Asserts `cond`, logging the expected and actual values on failure.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        if !$cond {
            ::tracing::error!(
                message = $msg,
                expected = ?$expected,
                actual = ?$actual,
                "Assertion failed"
            );
        }
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Counts how many of its guards have been dropped.
#[derive(Debug, Clone, Default)]
pub struct DropProbe {
    dropped: Arc<AtomicUsize>,
}

impl DropProbe {
    /// Creates a probe with a zero count.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a guard that bumps the count when dropped.
    #[must_use]
    pub fn guard(&self) -> DropGuard {
        DropGuard {
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Number of guards dropped so far.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Guard handed out by [`DropProbe::guard`].
#[derive(Debug)]
pub struct DropGuard {
    dropped: Arc<AtomicUsize>,
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

struct TriggerState<T> {
    value: Mutex<Option<T>>,
    fired: AtomicBool,
    waiter: Mutex<Option<Continuation>>,
}

/// A one-shot, manually fired awaitable.
///
/// Clones share the same state: one clone is awaited inside a frame body,
/// another is kept by the test to [`fire`](Self::fire) it. Awaiting yields
/// `Some(value)` once fired. [`cancel`](Self::cancel) drops the parked
/// continuation instead, which unwinds the waiting frame.
pub struct Trigger<T> {
    state: Arc<TriggerState<T>>,
}

impl<T> Clone for Trigger<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for Trigger<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(TriggerState {
                value: Mutex::new(None),
                fired: AtomicBool::new(false),
                waiter: Mutex::new(None),
            }),
        }
    }
}

impl<T> Trigger<T> {
    /// Creates an unfired trigger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` and resumes the waiter, if any. Returns false if the
    /// trigger had already fired.
    pub fn fire(&self, value: T) -> bool {
        if self.state.fired.load(Ordering::Acquire) {
            return false;
        }
        *self.state.value.lock() = Some(value);
        self.state.fired.store(true, Ordering::Release);
        let waiter = self.state.waiter.lock().take();
        if let Some(k) = waiter {
            k.resume();
        }
        true
    }

    /// Drops the parked continuation, asking the waiting frame to unwind.
    pub fn cancel(&self) {
        let waiter = self.state.waiter.lock().take();
        drop(waiter);
    }

    /// Returns true if a frame is parked on this trigger.
    #[must_use]
    pub fn has_waiter(&self) -> bool {
        self.state.waiter.lock().is_some()
    }
}

impl<T> Awaitable for Trigger<T> {
    type Output = Option<T>;

    fn ready(&self) -> bool {
        self.state.fired.load(Ordering::Acquire)
    }

    fn suspend(&mut self, continuation: Continuation) -> Suspend {
        let mut waiter = self.state.waiter.lock();
        // Re-check under the lock: `fire` sets the flag before taking the slot.
        if self.state.fired.load(Ordering::Acquire) {
            return Suspend::Ready(continuation);
        }
        *waiter = Some(continuation);
        Suspend::Pending
    }

    fn resume(&mut self) -> Option<T> {
        self.state.value.lock().take()
    }
}

impl<T> IntoFuture for Trigger<T> {
    type Output = Option<T>;
    type IntoFuture = Await<Self>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(self)
    }
}

impl<T> std::fmt::Debug for Trigger<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trigger")
            .field("fired", &self.state.fired.load(Ordering::Relaxed))
            .field("has_waiter", &self.has_waiter())
            .finish()
    }
}
