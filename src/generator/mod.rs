//! Pull-based generators.
//!
//! A generator's body is a frame created suspended before its first
//! statement. Each call to [`Iterator::next`] resumes it on the caller's
//! stack until it either yields a value through [`Co::yield_`], finishes, or
//! panics. The body therefore never runs ahead of the consumer, and a
//! finished generator stays finished.
//!
//! [`RecursiveGenerator`] adds delegation to child generators without
//! growing the stack with the nesting depth.
//!
//! ```ignore
//! let evens = Generator::new(|co| async move {
//!     for i in 0..3 {
//!         co.yield_(i * 2).await;
//!     }
//! });
//! assert_eq!(evens.collect::<Vec<_>>(), vec![0, 2, 4]);
//! ```

mod recursive;

pub use recursive::{RecCo, RecYield, RecursiveGenerator, YieldFrom};

use crate::awaitable::{Await, Awaitable, Suspend, co_await};
use crate::error::TaskError;
use crate::frame::{Continuation, FrameBox, FrameCore, FrameSink};
use crate::types::{CancelReason, PanicPayload};
use parking_lot::Mutex;
use std::any::Any;
use std::future::{Future, IntoFuture};
use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type Payload = Box<dyn Any + Send>;

struct GenState<T> {
    value: Mutex<Option<T>>,
    resume: Mutex<Option<Continuation>>,
    panic: Mutex<Option<Payload>>,
    done: AtomicBool,
}

impl<T: Send> FrameSink for GenState<T> {
    fn panicked(&self, payload: Payload) {
        *self.panic.lock() = Some(payload);
        self.done.store(true, Ordering::Release);
    }

    fn cancelled(&self, _reason: CancelReason) {
        self.done.store(true, Ordering::Release);
    }
}

/// The yield side of a [`Generator`], handed to its body.
pub struct Co<T> {
    state: Arc<GenState<T>>,
}

impl<T> Co<T> {
    /// Yields `value` to the consumer and suspends until the next advance.
    pub fn yield_(&self, value: T) -> Yield<T> {
        Yield {
            state: Arc::clone(&self.state),
            value: Some(value),
        }
    }
}

impl<T> std::fmt::Debug for Co<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Co").finish_non_exhaustive()
    }
}

/// Awaitable returned by [`Co::yield_`].
pub struct Yield<T> {
    state: Arc<GenState<T>>,
    value: Option<T>,
}

// The value is moved out by `suspend`, never pinned.
impl<T> Unpin for Yield<T> {}

impl<T> Awaitable for Yield<T> {
    type Output = ();

    fn ready(&self) -> bool {
        false
    }

    fn suspend(&mut self, k: Continuation) -> Suspend {
        *self.state.value.lock() = self.value.take();
        *self.state.resume.lock() = Some(k);
        Suspend::Pending
    }

    fn resume(&mut self) {}
}

impl<T> IntoFuture for Yield<T> {
    type Output = ();
    type IntoFuture = Await<Self>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(self)
    }
}

impl<T> std::fmt::Debug for Yield<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Yield")
            .field("pending", &self.value.is_some())
            .finish()
    }
}

/// A lazy sequence produced by a suspendable body.
pub struct Generator<T> {
    state: Option<Arc<GenState<T>>>,
}

impl<T: Send + 'static> Generator<T> {
    /// Creates a generator; `body` receives the [`Co`] used to yield values.
    /// Nothing runs until the first advance.
    pub fn new<B, F>(body: B) -> Self
    where
        B: FnOnce(Co<T>) -> F,
        F: Future<Output = ()> + Send + 'static,
    {
        let state = Arc::new(GenState {
            value: Mutex::new(None),
            resume: Mutex::new(None),
            panic: Mutex::new(None),
            done: AtomicBool::new(false),
        });
        let co = Co {
            state: Arc::clone(&state),
        };
        let fut = body(co);
        let finished = Arc::clone(&state);
        let frame = FrameBox::new(async move {
            fut.await;
            finished.done.store(true, Ordering::Release);
        });
        let sink: Arc<dyn FrameSink> = state.clone();
        let core = FrameCore::new(frame, Some(sink));
        *state.resume.lock() = Some(Continuation::new(core));
        Self { state: Some(state) }
    }
}

impl<T> Generator<T> {
    /// Returns true once the body finished or panicked.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state
            .as_ref()
            .is_none_or(|state| state.done.load(Ordering::Acquire))
    }

    fn advance(&mut self) -> Result<Option<T>, Payload> {
        let Some(state) = self.state.clone() else {
            return Ok(None);
        };
        if state.done.load(Ordering::Acquire) {
            self.state = None;
            return state.panic.lock().take().map_or(Ok(None), Err);
        }
        state.value.lock().take();
        let Some(k) = state.resume.lock().take() else {
            return Ok(None);
        };
        let accepted = k.resume_inline();
        if let Some(payload) = state.panic.lock().take() {
            self.state = None;
            return Err(payload);
        }
        if let Some(value) = state.value.lock().take() {
            return Ok(Some(value));
        }
        if !accepted || state.done.load(Ordering::Acquire) {
            self.state = None;
            return Ok(None);
        }
        panic!("generator body awaited something other than a yield");
    }

    /// Advances, reporting a panic in the body as an error instead of
    /// re-raising it.
    pub fn try_next(&mut self) -> Result<Option<T>, TaskError> {
        self.advance()
            .map_err(|payload| TaskError::Panicked(PanicPayload::from_any(payload.as_ref())))
    }
}

impl<T> Iterator for Generator<T> {
    type Item = T;

    /// Resumes the body until its next yield. A panic in the body is
    /// re-raised here.
    fn next(&mut self) -> Option<T> {
        match self.advance() {
            Ok(item) => item,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

impl<T> Default for Generator<T> {
    /// An empty generator.
    fn default() -> Self {
        Self { state: None }
    }
}

impl<T> Drop for Generator<T> {
    fn drop(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        let pending = state.resume.lock().take();
        if let Some(k) = pending {
            k.cancel(CancelReason::abandoned());
        }
    }
}

impl<T> std::fmt::Debug for Generator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("done", &self.is_done())
            .finish()
    }
}
