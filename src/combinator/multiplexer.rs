//! Fan-in selection over a dynamic set of tasks.
//!
//! Each member task is awaited by a small helper frame. When its task
//! finishes the helper stores the outcome in the member's slot, then either
//! hands it straight to a parked consumer or parks itself on the ready list,
//! so completions never allocate. The ready list root encodes the protocol:
//!
//! ```text
//!   Empty      no ready members, no consumer
//!   Waiting    ready members parked, most recent first
//!   Marked     consumer parked, no ready members
//! ```
//!
//! A member claims the parked consumer with the one CAS that moves the root
//! from `Marked` back to `Empty`; no other party ever clears the mark while
//! the consumer is parked. A consumer seeing `Waiting` pops one member and
//! takes the outcome from its slot, which was filled before the member
//! became visible. The popped member is only released afterwards and may
//! still be running on its own thread.

use crate::awaitable::{Await, Awaitable, Suspend, co_await};
use crate::error::TaskError;
use crate::frame::{Continuation, FrameBox, FrameCore};
use crate::sync::waiter_list::{AtomicHead, Head};
use crate::task::UniqueTask;
use crate::tracing_compat::{debug, trace};
use crate::types::{CancelReason, FrameId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::IntoFuture;
use std::sync::Arc;

/// The index of a member and its outcome.
pub type Selected<T> = (usize, Result<T, TaskError>);

type Slot<T> = Arc<Mutex<Option<Selected<T>>>>;

struct MuxState<T> {
    ready: AtomicHead,
    /// Set only while the root is `Marked`.
    consumer: Mutex<Option<Continuation>>,
    /// An outcome handed to the consumer by the member that claimed it.
    handed: Mutex<Option<(FrameId, Selected<T>)>>,
}

struct Member<T> {
    frame: Arc<FrameCore>,
    slot: Slot<T>,
}

/// Parks a finished member until the consumer collects it.
struct Arrive<T> {
    state: Arc<MuxState<T>>,
    slot: Slot<T>,
}

impl<T> Awaitable for Arrive<T> {
    type Output = ();

    fn ready(&self) -> bool {
        false
    }

    fn suspend(&mut self, k: Continuation) -> Suspend {
        let state = &self.state;
        let mut k = k;
        loop {
            match state.ready.load() {
                Head::Marked => {
                    if state.ready.compare_exchange(Head::Marked, Head::Empty).is_err() {
                        continue;
                    }
                    if let Some(selected) = self.slot.lock().take() {
                        *state.handed.lock() = Some((k.frame_id(), selected));
                    }
                    if let Some(consumer) = state.consumer.lock().take() {
                        consumer.resume();
                    }
                    return Suspend::Ready(k);
                }
                _ => match state.ready.push_unless(k, |head| head == Head::Marked) {
                    Ok(()) => return Suspend::Pending,
                    Err((back, _)) => k = back,
                },
            }
        }
    }

    fn resume(&mut self) {}
}

/// Collects task results in completion order.
///
/// ```ignore
/// let mut mux = Multiplexer::new();
/// mux.push(UniqueTask::new(async { 1 }));
/// mux.push(UniqueTask::new(async { 2 }));
/// while let Some((index, outcome)) = mux.select().await {
///     println!("member {index} finished with {outcome:?}");
/// }
/// ```
///
/// Dropping the multiplexer cancels members that have not been selected.
pub struct Multiplexer<T> {
    state: Arc<MuxState<T>>,
    members: HashMap<FrameId, Member<T>>,
    next_index: usize,
}

impl<T: Send + 'static> Multiplexer<T> {
    /// Creates an empty multiplexer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(MuxState {
                ready: AtomicHead::empty(),
                consumer: Mutex::new(None),
                handed: Mutex::new(None),
            }),
            members: HashMap::new(),
            next_index: 0,
        }
    }

    /// Adds a member and returns its index.
    pub fn push(&mut self, task: UniqueTask<T>) -> usize {
        let index = self.next_index;
        self.next_index += 1;

        let state = Arc::clone(&self.state);
        let slot: Slot<T> = Arc::new(Mutex::new(None));
        let filled = Arc::clone(&slot);
        let frame = FrameCore::new(
            FrameBox::new(async move {
                let outcome = task.await;
                *filled.lock() = Some((index, outcome));
                co_await(Arrive {
                    state,
                    slot: filled,
                })
                .await;
            }),
            None,
        );
        trace!(frame = %frame.id(), index, "multiplexer member added");
        self.members.insert(
            frame.id(),
            Member {
                frame: Arc::clone(&frame),
                slot,
            },
        );
        frame.schedule(false);
        index
    }

    /// Adds every task in `tasks`.
    pub fn extend<I>(&mut self, tasks: I)
    where
        I: IntoIterator<Item = UniqueTask<T>>,
    {
        for task in tasks {
            self.push(task);
        }
    }
}

impl<T> Multiplexer<T> {
    /// Number of members not yet selected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true when every member has been selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Waits for the next member to finish. Resolves to `None` once every
    /// member has been selected.
    pub fn select(&mut self) -> Select<'_, T> {
        Select {
            mux: self,
            taken: None,
        }
    }

    /// Retires the member `frame` and returns its outcome.
    fn collect(&mut self, frame: FrameId) -> Option<Selected<T>> {
        self.members.remove(&frame)?.slot.lock().take()
    }
}

impl<T: Send + 'static> Default for Multiplexer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Multiplexer<T> {
    fn drop(&mut self) {
        // Parked members unwind as their continuations drop.
        drop(self.state.ready.take_waiting(Head::Empty));
        let mut cancelled = 0_usize;
        for (_, member) in self.members.drain() {
            if !member.frame.is_done() {
                member.frame.request_cancel(CancelReason::abandoned());
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(cancelled, "multiplexer dropped with unselected members");
        }
    }
}

impl<T> std::fmt::Debug for Multiplexer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("remaining", &self.members.len())
            .field("ready", &self.state.ready)
            .finish()
    }
}

/// Awaitable returned by [`Multiplexer::select`].
#[must_use = "awaitables do nothing unless awaited"]
pub struct Select<'a, T> {
    mux: &'a mut Multiplexer<T>,
    taken: Option<Selected<T>>,
}

// The selected value is moved out by `resume`, never pinned.
impl<T> Unpin for Select<'_, T> {}

impl<T> Awaitable for Select<'_, T> {
    type Output = Option<Selected<T>>;

    fn ready(&self) -> bool {
        self.mux.members.is_empty() || self.mux.state.handed.lock().is_some()
    }

    fn suspend(&mut self, k: Continuation) -> Suspend {
        let state = Arc::clone(&self.mux.state);
        let mut k = k;
        loop {
            match state.ready.load() {
                Head::Waiting(_) => {
                    let Some(member) = state.ready.pop() else {
                        continue;
                    };
                    self.taken = self.mux.collect(member.frame_id());
                    member.resume();
                    if self.taken.is_some() {
                        return Suspend::Ready(k);
                    }
                }
                Head::Empty => {
                    *state.consumer.lock() = Some(k);
                    if state.ready.compare_exchange(Head::Empty, Head::Marked).is_ok() {
                        return Suspend::Pending;
                    }
                    // Members only take the consumer after clearing the mark.
                    match state.consumer.lock().take() {
                        Some(back) => k = back,
                        None => panic!("multiplexer consumer taken while not parked"),
                    }
                }
                Head::Marked => panic!("multiplexer selected from more than one frame"),
            }
        }
    }

    fn resume(&mut self) -> Option<Selected<T>> {
        if let Some(selected) = self.taken.take() {
            return Some(selected);
        }
        let (frame, selected) = self.mux.state.handed.lock().take()?;
        self.mux.members.remove(&frame);
        Some(selected)
    }
}

impl<T> Drop for Select<'_, T> {
    fn drop(&mut self) {
        // A consumer abandoned while parked gives the root back to members.
        let state = &self.mux.state;
        if state.ready.compare_exchange(Head::Marked, Head::Empty).is_ok() {
            if let Some(k) = state.consumer.lock().take() {
                k.dismiss();
            }
        }
    }
}

impl<'a, T> IntoFuture for Select<'a, T> {
    type Output = Option<Selected<T>>;
    type IntoFuture = Await<Self>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(self)
    }
}

impl<T> std::fmt::Debug for Select<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Select")
            .field("remaining", &self.mux.members.len())
            .finish()
    }
}
