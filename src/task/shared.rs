//! Multicast tasks.
//!
//! Followers park on an intrusive waiter list rooted in the task state. The
//! root is `Empty` while the producer runs and `Marked` once it completed;
//! completion swaps in the mark and resumes the captured chain once, most
//! recent follower first. No ordering among followers is promised.
//!
//! A follower that stops waiting unlinks itself. Only a sole entry can be
//! removed in place; otherwise the follower detaches the whole chain, drops
//! its own entry along with any follower already unwinding, and pushes the
//! rest back.

use super::record::CompletionRecord;
use crate::awaitable::{Await, Awaitable, Suspend, co_await};
use crate::error::{AllocError, TaskError};
use crate::frame::{Continuation, FrameAllocator, FrameBox, FrameCore, FrameSink, ResumeTicket};
use crate::sync::waiter_list::{AtomicHead, Head};
use crate::tracing_compat::trace;
use crate::types::{CancelReason, PanicPayload};
use std::any::Any;
use std::future::{Future, IntoFuture};
use std::ptr;
use std::sync::Arc;

use super::unique::UniqueTask;

struct SharedState<T> {
    record: CompletionRecord<T>,
    followers: AtomicHead,
}

impl<T> SharedState<T> {
    fn complete(&self, outcome: Result<T, TaskError>) {
        if !self.record.publish(outcome) {
            return;
        }
        let mut _woken = 0_usize;
        for k in self.followers.swap(Head::Marked) {
            k.resume();
            _woken += 1;
        }
        trace!(woken = _woken, "shared task completed");
    }

    fn is_finished(&self) -> bool {
        self.record.is_finished()
    }

    /// Removes `frame` and every unwinding follower from the list.
    /// Followers that stay are pushed back, or resumed if the producer
    /// completed while they were detached.
    fn unlink(&self, frame: &FrameCore) {
        if let Some(k) = self.followers.take_if(frame, Head::Empty) {
            k.dismiss();
            return;
        }
        for k in self.followers.take_waiting(Head::Empty) {
            if ptr::eq(k.core().as_ref(), frame) || k.is_cancel_requested() {
                k.dismiss();
                continue;
            }
            if let Err((k, _)) = self.followers.push_unless(k, |head| head == Head::Marked) {
                k.resume();
            }
        }
    }
}

impl<T: Send> FrameSink for SharedState<T> {
    fn panicked(&self, payload: Box<dyn Any + Send>) {
        let payload = PanicPayload::from_any(payload.as_ref());
        self.complete(Err(TaskError::Panicked(payload)));
    }

    fn cancelled(&self, reason: CancelReason) {
        self.complete(Err(TaskError::Cancelled(reason)));
    }
}

/// Keeps the producer alive; cancels it when the last handle goes away
/// before it finished.
struct SharedOwner<T> {
    state: Arc<SharedState<T>>,
    producer: Arc<FrameCore>,
}

impl<T> Drop for SharedOwner<T> {
    fn drop(&mut self) {
        if !self.state.is_finished() {
            trace!(frame = %self.producer.id(), "shared task abandoned");
            self.producer.request_cancel(CancelReason::abandoned());
        }
    }
}

/// A task any number of frames may await.
///
/// Handles are cheap to clone. The completion record lives until the
/// producer and every handle are gone; dropping the last handle while the
/// producer is pending asks it to unwind.
///
/// Awaiting `&SharedTask<T>` borrows the value; awaiting an owned handle
/// clones it.
pub struct SharedTask<T> {
    owner: Option<Arc<SharedOwner<T>>>,
}

impl<T: Send + 'static> SharedTask<T> {
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
        let state = Self::pending_state();
        let frame = FrameBox::new_in(Self::body(&state, async move { Ok(body.await) }), alloc)?;
        Ok(Self::launch(state, frame))
    }

    fn from_outcome<F>(body: F) -> Self
    where
        F: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let state = Self::pending_state();
        let frame = FrameBox::new(Self::body(&state, body));
        Self::launch(state, frame)
    }

    fn pending_state() -> Arc<SharedState<T>> {
        Arc::new(SharedState {
            record: CompletionRecord::new(),
            followers: AtomicHead::empty(),
        })
    }

    fn body<F>(state: &Arc<SharedState<T>>, body: F) -> impl Future<Output = ()> + Send + 'static
    where
        F: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let state = Arc::clone(state);
        async move {
            let outcome = body.await;
            state.complete(outcome);
        }
    }

    fn launch(state: Arc<SharedState<T>>, frame: FrameBox) -> Self {
        let sink: Arc<dyn FrameSink> = state.clone();
        let producer = FrameCore::new(frame, Some(sink));
        trace!(frame = %producer.id(), "shared task starting");
        let task = Self {
            owner: Some(Arc::new(SharedOwner {
                state,
                producer: Arc::clone(&producer),
            })),
        };
        producer.schedule(false);
        task
    }
}

impl<T> SharedTask<T> {
    /// Returns false for a default-constructed task.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.owner.is_some()
    }

    /// Returns true once the producer has finished.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.owner
            .as_ref()
            .is_some_and(|owner| owner.state.is_finished())
    }

    /// Borrows the outcome if the producer has finished.
    #[must_use]
    pub fn get_ready(&self) -> Option<Result<&T, TaskError>>
    where
        T: Send + Sync,
    {
        let owner = self.owner.as_ref()?;
        owner.state.record.get().map(|outcome| match outcome {
            Ok(value) => Ok(value),
            Err(err) => Err(err.clone()),
        })
    }

    fn follow(&self, k: Continuation, parked: &mut Option<ResumeTicket>) -> Suspend {
        let Some(owner) = &self.owner else {
            return Suspend::Ready(k);
        };
        let ticket = k.ticket();
        match owner.state.followers.push_unless(k, |head| head == Head::Marked) {
            Ok(()) => {
                *parked = Some(ticket);
                Suspend::Pending
            }
            Err((k, _)) => Suspend::Ready(k),
        }
    }

    /// Unlinks a follower that stopped waiting before it was resumed.
    fn abandon(&self, parked: Option<ResumeTicket>) {
        let (Some(ticket), Some(owner)) = (parked, &self.owner) else {
            return;
        };
        if ticket.was_resumed() {
            return;
        }
        if let Some(frame) = ticket.frame() {
            owner.state.unlink(&frame);
        }
    }

    fn ready_or_empty(&self) -> bool {
        self.owner
            .as_ref()
            .is_none_or(|owner| owner.state.is_finished())
    }
}

impl<T> Clone for SharedTask<T> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
        }
    }
}

impl<T> Default for SharedTask<T> {
    fn default() -> Self {
        Self { owner: None }
    }
}

impl<T> std::fmt::Debug for SharedTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.owner {
            None => f.write_str("SharedTask(<empty>)"),
            Some(owner) => f
                .debug_struct("SharedTask")
                .field("frame", &owner.producer.id())
                .field("handles", &Arc::strong_count(owner))
                .field("record", &owner.state.record)
                .finish(),
        }
    }
}

/// Awaitable borrowing the outcome of a [`SharedTask`].
#[derive(Debug)]
pub struct Follow<'a, T> {
    task: &'a SharedTask<T>,
    parked: Option<ResumeTicket>,
}

impl<'a, T: Send + Sync> Awaitable for Follow<'a, T> {
    type Output = Result<&'a T, TaskError>;

    fn ready(&self) -> bool {
        self.task.ready_or_empty()
    }

    fn suspend(&mut self, k: Continuation) -> Suspend {
        self.task.follow(k, &mut self.parked)
    }

    fn resume(&mut self) -> Result<&'a T, TaskError> {
        self.parked = None;
        self.task.get_ready().unwrap_or(Err(TaskError::NoState))
    }
}

impl<'a, T: Send + Sync> IntoFuture for &'a SharedTask<T> {
    type Output = Result<&'a T, TaskError>;
    type IntoFuture = Await<Follow<'a, T>>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(Follow {
            task: self,
            parked: None,
        })
    }
}

impl<T> Drop for Follow<'_, T> {
    fn drop(&mut self) {
        self.task.abandon(self.parked.take());
    }
}

/// Awaitable yielding a clone of the outcome of a [`SharedTask`].
#[derive(Debug)]
pub struct FollowOwned<T> {
    task: SharedTask<T>,
    parked: Option<ResumeTicket>,
}

impl<T: Clone + Send + Sync> Awaitable for FollowOwned<T> {
    type Output = Result<T, TaskError>;

    fn ready(&self) -> bool {
        self.task.ready_or_empty()
    }

    fn suspend(&mut self, k: Continuation) -> Suspend {
        self.task.follow(k, &mut self.parked)
    }

    fn resume(&mut self) -> Result<T, TaskError> {
        self.parked = None;
        self.task
            .get_ready()
            .map_or(Err(TaskError::NoState), |outcome| outcome.cloned())
    }
}

impl<T: Clone + Send + Sync> IntoFuture for SharedTask<T> {
    type Output = Result<T, TaskError>;
    type IntoFuture = Await<FollowOwned<T>>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(FollowOwned {
            task: self,
            parked: None,
        })
    }
}

impl<T> Drop for FollowOwned<T> {
    fn drop(&mut self) {
        self.task.abandon(self.parked.take());
    }
}

/// Turns a unique task into a shared one.
///
/// A new frame awaits `task` and republishes its outcome, including a panic
/// or cancellation, to every follower.
pub fn share<T: Send + 'static>(task: UniqueTask<T>) -> SharedTask<T> {
    SharedTask::from_outcome(async move { task.await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::awaitable::suspend_always;
    use crate::test_utils::{DropProbe, Trigger};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn every_follower_sees_the_same_value() {
        init_test("every_follower_sees_the_same_value");
        let trigger = Trigger::<String>::new();
        let wait = trigger.clone();
        let shared = SharedTask::new(async move { wait.await.unwrap_or_default() });
        let seen = Arc::new(AtomicUsize::new(0));

        let followers: Vec<_> = (0..5)
            .map(|_| {
                let shared = shared.clone();
                let seen = Arc::clone(&seen);
                UniqueTask::new(async move {
                    let value = (&shared).await.map(String::clone);
                    seen.fetch_add(1, Ordering::SeqCst);
                    value
                })
            })
            .collect();
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        trigger.fire("payload".to_owned());
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        for follower in followers {
            assert_eq!(crate::blocking::get(follower), Ok(Ok("payload".to_owned())));
        }
        assert_eq!(shared.get_ready(), Some(Ok(&"payload".to_owned())));
        crate::test_complete!("every_follower_sees_the_same_value");
    }

    #[test]
    fn follow_after_completion_is_immediate() {
        init_test("follow_after_completion_is_immediate");
        let shared = SharedTask::new(async { 11_u32 });
        assert!(shared.is_ready());
        let copy = shared.clone();
        let task = UniqueTask::new(async move { copy.await });
        assert!(task.is_ready());
        assert_eq!(crate::blocking::get(task), Ok(Ok(11)));
        crate::test_complete!("follow_after_completion_is_immediate");
    }

    #[test]
    fn last_handle_drop_cancels_producer() {
        init_test("last_handle_drop_cancels_producer");
        let probe = DropProbe::new();
        let guard = probe.guard();
        let shared = SharedTask::new(async move {
            let _guard = guard;
            suspend_always().await;
        });
        let copy = shared.clone();
        drop(shared);
        assert_eq!(probe.dropped(), 0);
        drop(copy);
        assert_eq!(probe.dropped(), 1);
        crate::test_complete!("last_handle_drop_cancels_producer");
    }

    #[test]
    fn cancelled_followers_are_unlinked() {
        init_test("cancelled_followers_are_unlinked");
        let trigger = Trigger::<u32>::new();
        let wait = trigger.clone();
        let shared = SharedTask::new(async move { wait.await.unwrap_or_default() });
        let followers = || &shared.owner.as_ref().unwrap().state.followers;

        let lone = {
            let shared = shared.clone();
            UniqueTask::new(async move { shared.await })
        };
        assert_eq!(followers().len(), 1);
        drop(lone);
        assert_eq!(followers().len(), 0);

        let keeper = {
            let shared = shared.clone();
            UniqueTask::new(async move { shared.await })
        };
        for round in 0..100 {
            let churn: Vec<_> = (0..3)
                .map(|_| {
                    let shared = shared.clone();
                    UniqueTask::new(async move { (&shared).await.copied() })
                })
                .collect();
            assert_eq!(followers().len(), 4, "round {round}");
            drop(churn);
            assert_eq!(followers().len(), 1, "round {round}");
        }

        trigger.fire(5);
        assert_eq!(crate::blocking::get(keeper), Ok(Ok(5)));
        crate::test_complete!("cancelled_followers_are_unlinked");
    }

    #[test]
    fn share_republishes_panics() {
        init_test("share_republishes_panics");
        let unique = UniqueTask::<u8>::new(async { panic!("inner failure") });
        let shared = share(unique);
        assert!(shared.is_ready());
        let err = shared.get_ready().unwrap().unwrap_err();
        assert!(err.is_panic());
        crate::test_complete!("share_republishes_panics");
    }

    #[test]
    fn default_shared_task_has_no_state() {
        init_test("default_shared_task_has_no_state");
        let shared = SharedTask::<u8>::default();
        assert!(!shared.is_valid());
        let task = UniqueTask::new(async move { shared.await });
        assert_eq!(crate::blocking::get(task), Ok(Err(TaskError::NoState)));
        crate::test_complete!("default_shared_task_has_no_state");
    }
}
