//! First-to-finish selection over a fixed set of tasks.

use super::multiplexer::Selected;
use crate::awaitable::{Await, Awaitable, Suspend, co_await};
use crate::frame::{Continuation, FrameBox, FrameCore};
use crate::sync::waiter_list::{AtomicHead, Head};
use crate::task::UniqueTask;
use crate::tracing_compat::{debug, trace};
use crate::types::CancelReason;
use parking_lot::Mutex;
use std::future::IntoFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

struct AnyState<T> {
    claimed: AtomicBool,
    result: Mutex<Option<Selected<T>>>,
    /// `Empty` until the consumer parks, `Marked` once a winner published.
    consumer: AtomicHead,
    members: Mutex<Vec<Arc<FrameCore>>>,
}

impl<T> AnyState<T> {
    fn finish(&self, index: usize, selected: Selected<T>) {
        if self.claimed.swap(true, Ordering::AcqRel) {
            debug!(index, "when_any discarded a late finisher");
            return;
        }
        *self.result.lock() = Some(selected);
        for k in self.consumer.swap(Head::Marked) {
            k.resume();
        }
        trace!(index, "when_any winner published");
        let losers: Vec<_> = self
            .members
            .lock()
            .iter()
            .enumerate()
            .filter(|(i, member)| *i != index && !member.is_done())
            .map(|(_, member)| Arc::clone(member))
            .collect();
        for loser in losers {
            loser.request_cancel(CancelReason::race_lost());
        }
    }

    fn cancel_members(&self, reason: &CancelReason) {
        let members: Vec<_> = self.members.lock().drain(..).collect();
        for member in members {
            if !member.is_done() {
                member.request_cancel(reason.clone());
            }
        }
    }
}

/// Awaitable returned by [`when_any`].
///
/// Resolves to the index and outcome of the first task to finish, or `None`
/// when constructed from an empty set. The remaining tasks are cancelled as
/// soon as a winner is known and their outcomes are discarded.
#[must_use = "awaitables do nothing unless awaited"]
pub struct WhenAny<T> {
    state: Option<Arc<AnyState<T>>>,
}

/// Races `tasks` against each other.
///
/// ```ignore
/// let fast = UniqueTask::new(async { "fast" });
/// let slow = UniqueTask::new(async { suspend_always().await; "slow" });
/// let (index, outcome) = when_any(vec![fast, slow]).await.unwrap();
/// assert_eq!((index, outcome), (0, Ok("fast")));
/// ```
pub fn when_any<T, I>(tasks: I) -> WhenAny<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = UniqueTask<T>>,
{
    let tasks: Vec<_> = tasks.into_iter().collect();
    if tasks.is_empty() {
        return WhenAny { state: None };
    }
    let state = Arc::new(AnyState {
        claimed: AtomicBool::new(false),
        result: Mutex::new(None),
        consumer: AtomicHead::empty(),
        members: Mutex::new(Vec::with_capacity(tasks.len())),
    });

    let members: Vec<_> = tasks
        .into_iter()
        .enumerate()
        .map(|(index, task)| {
            let state = Arc::clone(&state);
            FrameCore::new(
                FrameBox::new(async move {
                    let outcome = task.await;
                    state.finish(index, (index, outcome));
                }),
                None,
            )
        })
        .collect();
    state.members.lock().extend(members.iter().cloned());
    for member in members {
        member.schedule(false);
    }
    WhenAny { state: Some(state) }
}

impl<T> Awaitable for WhenAny<T> {
    type Output = Option<Selected<T>>;

    fn ready(&self) -> bool {
        self.state
            .as_ref()
            .is_none_or(|state| state.consumer.load() == Head::Marked)
    }

    fn suspend(&mut self, k: Continuation) -> Suspend {
        let Some(state) = &self.state else {
            return Suspend::Ready(k);
        };
        match state.consumer.push_unless(k, |head| head != Head::Empty) {
            Ok(()) => Suspend::Pending,
            Err((k, Head::Marked)) => Suspend::Ready(k),
            Err((k, _)) => {
                k.dismiss();
                panic!("when_any awaited by more than one frame");
            }
        }
    }

    fn resume(&mut self) -> Option<Selected<T>> {
        let state = self.state.take()?;
        state.result.lock().take()
    }
}

impl<T> IntoFuture for WhenAny<T> {
    type Output = Option<Selected<T>>;
    type IntoFuture = Await<Self>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(self)
    }
}

impl<T> Drop for WhenAny<T> {
    fn drop(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        if !state.claimed.load(Ordering::Acquire) {
            debug!("when_any dropped before a winner");
        }
        state.cancel_members(&CancelReason::abandoned());
    }
}

impl<T> std::fmt::Debug for WhenAny<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.state {
            None => f.write_str("WhenAny(<resolved>)"),
            Some(state) => f
                .debug_struct("WhenAny")
                .field("claimed", &state.claimed.load(Ordering::Acquire))
                .field("members", &state.members.lock().len())
                .finish(),
        }
    }
}
