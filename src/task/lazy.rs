//! Tasks whose producer starts on first await.

use super::unique::{UniqueTask, completing};
use crate::awaitable::{Await, Awaitable, Suspend, co_await};
use crate::error::{AllocError, TaskError};
use crate::frame::{Continuation, FrameAllocator, FrameBox};
use crate::types::CancelReason;
use std::future::{Future, IntoFuture};
use std::sync::Arc;

/// A single-consumer task that does not run until it is awaited.
///
/// Construction creates the frame suspended before its first statement.
/// The first `suspend` installs the follower and then starts the producer,
/// so pipelines of lazy tasks only do work that is actually observed.
/// Dropping a lazy task that never started unwinds its frame without
/// running any of the body.
pub struct LazyTask<T> {
    task: UniqueTask<T>,
    start: Option<Continuation>,
}

impl<T: Send + 'static> LazyTask<T> {
    /// Wraps `body` in a frame that starts when first awaited.
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let state = UniqueTask::pending_state();
        let frame = FrameBox::new(completing(&state, async move { Ok(body.await) }));
        let (task, start) = UniqueTask::unstarted(state, frame);
        Self {
            task,
            start: Some(start),
        }
    }

    /// Like [`new`](Self::new), with the frame placed in `alloc`.
    pub fn new_in<F>(body: F, alloc: Arc<dyn FrameAllocator>) -> Result<Self, AllocError>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let state = UniqueTask::pending_state();
        let frame = FrameBox::new_in(completing(&state, async move { Ok(body.await) }), alloc)?;
        let (task, start) = UniqueTask::unstarted(state, frame);
        Ok(Self {
            task,
            start: Some(start),
        })
    }
}

impl<T> LazyTask<T> {
    /// Returns true once the producer has been started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.start.is_none()
    }

    /// Returns true once the producer has finished.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.task.is_ready()
    }

    /// Starts the producer without awaiting it, converting into an eager
    /// task.
    pub fn into_started(mut self) -> UniqueTask<T> {
        if let Some(start) = self.start.take() {
            start.resume();
        }
        std::mem::take(&mut self.task)
    }
}

impl<T> Awaitable for LazyTask<T> {
    type Output = Result<T, TaskError>;

    fn ready(&self) -> bool {
        self.task.is_ready()
    }

    fn suspend(&mut self, k: Continuation) -> Suspend {
        let outcome = self.task.suspend(k);
        if matches!(outcome, Suspend::Pending) {
            if let Some(start) = self.start.take() {
                start.resume();
            }
        }
        outcome
    }

    fn resume(&mut self) -> Result<T, TaskError> {
        self.task.resume()
    }
}

impl<T> IntoFuture for LazyTask<T> {
    type Output = Result<T, TaskError>;
    type IntoFuture = Await<Self>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(self)
    }
}

impl<T> Drop for LazyTask<T> {
    fn drop(&mut self) {
        if let Some(start) = self.start.take() {
            start.cancel(CancelReason::abandoned());
        }
    }
}

impl<T> std::fmt::Debug for LazyTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyTask")
            .field("started", &self.is_started())
            .field("task", &self.task)
            .finish()
    }
}
