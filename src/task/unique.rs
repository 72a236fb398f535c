//! Single-consumer tasks.

#![allow(unsafe_code)]

use super::record::CompletionRecord;
use crate::awaitable::{Await, Awaitable, Suspend, co_await};
use crate::error::{AllocError, TaskError};
use crate::frame::{Continuation, FrameAllocator, FrameBox, FrameCore, FrameSink};
use crate::sync::waiter_list::{AtomicHead, Head};
use crate::tracing_compat::trace;
use crate::types::{CancelReason, FrameId, PanicPayload};
use std::any::Any;
use std::future::{Future, IntoFuture};
use std::sync::Arc;

/// Completion record plus the single follower slot.
///
/// The slot is `Marked` until someone follows, holds the follower while it
/// waits, and is swapped to `Empty` on completion.
pub(crate) struct TaskState<T> {
    record: CompletionRecord<T>,
    waiter: AtomicHead,
}

impl<T> TaskState<T> {
    fn pending() -> Arc<Self> {
        Arc::new(Self {
            record: CompletionRecord::new(),
            waiter: AtomicHead::marked(),
        })
    }

    fn finished(outcome: Result<T, TaskError>) -> Arc<Self> {
        Arc::new(Self {
            record: CompletionRecord::finished(outcome),
            waiter: AtomicHead::empty(),
        })
    }

    pub(crate) fn complete(&self, outcome: Result<T, TaskError>) {
        if !self.record.publish(outcome) {
            return;
        }
        for k in self.waiter.swap(Head::Empty) {
            k.resume();
        }
    }
}

impl<T: Send> FrameSink for TaskState<T> {
    fn panicked(&self, payload: Box<dyn Any + Send>) {
        let payload = PanicPayload::from_any(payload.as_ref());
        self.complete(Err(TaskError::Panicked(payload)));
    }

    fn cancelled(&self, reason: CancelReason) {
        self.complete(Err(TaskError::Cancelled(reason)));
    }
}

/// Wraps a body so its outcome lands in `state` when it finishes.
pub(crate) fn completing<T, F>(
    state: &Arc<TaskState<T>>,
    body: F,
) -> impl Future<Output = ()> + Send + 'static
where
    T: Send + 'static,
    F: Future<Output = Result<T, TaskError>> + Send + 'static,
{
    let state = Arc::clone(state);
    async move {
        let outcome = body.await;
        state.complete(outcome);
    }
}

struct Inner<T> {
    state: Arc<TaskState<T>>,
    producer: Option<Arc<FrameCore>>,
}

/// A task with exactly one consumer.
///
/// The producing frame starts running on construction, on the calling
/// thread, until its first suspension. Awaiting the task from another frame
/// yields `Ok(value)` once the producer finishes, or a [`TaskError`] if it
/// panicked or was cancelled.
///
/// Dropping a task whose producer is still pending asks the producer to
/// unwind. A suspended producer runs its destructors before the drop
/// returns, even when the drop happens inside another frame; one that is
/// running on another thread unwinds at its next suspension.
///
/// ```ignore
/// let task = UniqueTask::new(async { 40 + 2 });
/// assert_eq!(coframe::blocking::get(task), Ok(42));
/// ```
pub struct UniqueTask<T> {
    inner: Option<Inner<T>>,
}

impl<T: Send + 'static> UniqueTask<T> {
    /// Starts `body` in a new frame.
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self::from_outcome(async move { Ok(body.await) })
    }

    /// Starts `body` in a frame whose storage comes from `alloc`.
    pub fn new_in<F>(body: F, alloc: Arc<dyn FrameAllocator>) -> Result<Self, AllocError>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let state = TaskState::pending();
        let frame = FrameBox::new_in(completing(&state, async move { Ok(body.await) }), alloc)?;
        Ok(Self::launch(state, frame))
    }

    /// A task that is already complete.
    pub fn ready(value: T) -> Self {
        Self {
            inner: Some(Inner {
                state: TaskState::finished(Ok(value)),
                producer: None,
            }),
        }
    }

    /// Starts a body that produces a full outcome rather than a plain value.
    pub(crate) fn from_outcome<F>(body: F) -> Self
    where
        F: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let state = TaskState::pending();
        let frame = FrameBox::new(completing(&state, body));
        Self::launch(state, frame)
    }

    pub(crate) fn pending_state() -> Arc<TaskState<T>> {
        TaskState::pending()
    }

    /// Creates the producer without running it. Resuming the returned
    /// continuation starts it.
    pub(crate) fn unstarted(state: Arc<TaskState<T>>, frame: FrameBox) -> (Self, Continuation) {
        let sink: Arc<dyn FrameSink> = state.clone();
        let producer = FrameCore::new(frame, Some(sink));
        let start = Continuation::new(Arc::clone(&producer));
        let task = Self {
            inner: Some(Inner {
                state,
                producer: Some(producer),
            }),
        };
        (task, start)
    }

    fn launch(state: Arc<TaskState<T>>, frame: FrameBox) -> Self {
        let sink: Arc<dyn FrameSink> = state.clone();
        let producer = FrameCore::new(frame, Some(sink));
        trace!(frame = %producer.id(), "unique task starting");
        let task = Self {
            inner: Some(Inner {
                state,
                producer: Some(Arc::clone(&producer)),
            }),
        };
        producer.schedule(false);
        task
    }
}

impl<T> UniqueTask<T> {
    /// Returns false for a default-constructed task.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// Returns true once the producer has finished, one way or another.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.state.record.is_finished())
    }

    /// Id of the producing frame, if there is one.
    #[must_use]
    pub fn id(&self) -> Option<FrameId> {
        self.inner
            .as_ref()
            .and_then(|inner| inner.producer.as_ref())
            .map(|core| core.id())
    }

    /// Asks the producer to unwind. A later await observes
    /// [`TaskError::Cancelled`] unless the producer already finished.
    pub fn cancel(&self) {
        if let Some(producer) = self.pending_producer() {
            producer.request_cancel(CancelReason::user("task cancelled by owner"));
        }
    }

    /// Extracts the outcome without awaiting, if the producer has finished.
    ///
    /// After a successful call the task is spent and further reads yield
    /// [`TaskError::NoState`].
    pub fn take_ready(&mut self) -> Option<Result<T, TaskError>> {
        let inner = self.inner.as_ref()?;
        // SAFETY: a unique task never hands out shared borrows of its record.
        let outcome = unsafe { inner.state.record.take() };
        if outcome.is_some() {
            self.inner = None;
        }
        outcome
    }

    fn pending_producer(&self) -> Option<&Arc<FrameCore>> {
        let inner = self.inner.as_ref()?;
        if inner.state.record.is_finished() {
            return None;
        }
        inner.producer.as_ref()
    }
}

impl<T> Default for UniqueTask<T> {
    fn default() -> Self {
        Self { inner: None }
    }
}

impl<T> Awaitable for UniqueTask<T> {
    type Output = Result<T, TaskError>;

    fn ready(&self) -> bool {
        self.inner
            .as_ref()
            .is_none_or(|inner| inner.state.record.is_finished())
    }

    fn suspend(&mut self, k: Continuation) -> Suspend {
        let Some(inner) = &self.inner else {
            return Suspend::Ready(k);
        };
        match inner.state.waiter.push_unless(k, |head| head != Head::Marked) {
            Ok(()) => Suspend::Pending,
            Err((k, Head::Empty)) => Suspend::Ready(k),
            Err((k, _)) => {
                k.dismiss();
                panic!("unique task awaited by more than one frame");
            }
        }
    }

    fn resume(&mut self) -> Result<T, TaskError> {
        let Some(inner) = self.inner.take() else {
            return Err(TaskError::NoState);
        };
        // SAFETY: a unique task never hands out shared borrows of its record.
        unsafe { inner.state.record.take() }.unwrap_or(Err(TaskError::NoState))
    }
}

impl<T> IntoFuture for UniqueTask<T> {
    type Output = Result<T, TaskError>;
    type IntoFuture = Await<Self>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(self)
    }
}

impl<T> Drop for UniqueTask<T> {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        // A follower still parked here is unwinding or has moved on; release
        // its continuation without waking or cancelling it.
        for k in inner.state.waiter.swap(Head::Marked) {
            k.dismiss();
        }
        if inner.state.record.is_finished() {
            return;
        }
        if let Some(producer) = &inner.producer {
            trace!(frame = %producer.id(), "unique task abandoned");
            producer.request_cancel(CancelReason::abandoned());
        }
    }
}

impl<T> std::fmt::Debug for UniqueTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            None => f.write_str("UniqueTask(<empty>)"),
            Some(inner) => f
                .debug_struct("UniqueTask")
                .field("frame", &inner.producer.as_ref().map(|core| core.id()))
                .field("record", &inner.state.record)
                .finish(),
        }
    }
}
