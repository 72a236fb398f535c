//! Generators that delegate to nested generators.
//!
//! Each nesting level is its own frame with a [`Node`] describing where the
//! consumer should go next. The consumer only ever resumes the innermost
//! active level, the head; delegation and completion move the head down or
//! up the parent links. Yields from any depth therefore cost one resumption
//! and the native stack stays flat however deep the delegation goes.

use crate::awaitable::{Await, Awaitable, Suspend, co_await};
use crate::error::TaskError;
use crate::frame::{Continuation, FrameBox, FrameCore, FrameSink};
use crate::tracing_compat::trace;
use crate::types::{CancelReason, PanicPayload};
use parking_lot::Mutex;
use std::any::Any;
use std::future::{Future, IntoFuture};
use std::panic;
use std::sync::Arc;

type Payload = Box<dyn Any + Send>;

/// What a level did during its last resumption.
enum Step<T> {
    Yielded(T),
    Delegated(Arc<Node<T>>),
    Finished,
    Panicked(Payload),
}

struct Node<T> {
    resume: Mutex<Option<Continuation>>,
    step: Mutex<Option<Step<T>>>,
    parent: Mutex<Option<Arc<Node<T>>>>,
    child_panic: Mutex<Option<Payload>>,
}

impl<T> Node<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            resume: Mutex::new(None),
            step: Mutex::new(None),
            parent: Mutex::new(None),
            child_panic: Mutex::new(None),
        })
    }

    fn suspended(&self, step: Step<T>, k: Continuation) {
        *self.step.lock() = Some(step);
        *self.resume.lock() = Some(k);
    }
}

impl<T: Send> FrameSink for Node<T> {
    fn panicked(&self, payload: Payload) {
        *self.step.lock() = Some(Step::Panicked(payload));
    }

    fn cancelled(&self, _reason: CancelReason) {
        *self.step.lock() = Some(Step::Finished);
    }
}

/// The yield side of a [`RecursiveGenerator`], handed to its body.
pub struct RecCo<T> {
    node: Arc<Node<T>>,
}

impl<T> RecCo<T> {
    /// Yields one value to the consumer.
    pub fn yield_(&self, value: T) -> RecYield<T> {
        RecYield {
            node: Arc::clone(&self.node),
            value: Some(value),
        }
    }

    /// Yields every remaining value of `child`, then continues. A panic in
    /// `child` is re-raised at this await.
    pub fn yield_from(&self, child: RecursiveGenerator<T>) -> YieldFrom<T> {
        YieldFrom {
            node: Arc::clone(&self.node),
            child,
        }
    }
}

impl<T> std::fmt::Debug for RecCo<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecCo").finish_non_exhaustive()
    }
}

/// Awaitable returned by [`RecCo::yield_`].
pub struct RecYield<T> {
    node: Arc<Node<T>>,
    value: Option<T>,
}

impl<T> Unpin for RecYield<T> {}

impl<T> Awaitable for RecYield<T> {
    type Output = ();

    fn ready(&self) -> bool {
        false
    }

    fn suspend(&mut self, k: Continuation) -> Suspend {
        match self.value.take() {
            Some(value) => {
                self.node.suspended(Step::Yielded(value), k);
                Suspend::Pending
            }
            None => Suspend::Ready(k),
        }
    }

    fn resume(&mut self) {}
}

impl<T> IntoFuture for RecYield<T> {
    type Output = ();
    type IntoFuture = Await<Self>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(self)
    }
}

impl<T> std::fmt::Debug for RecYield<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecYield")
            .field("pending", &self.value.is_some())
            .finish()
    }
}

/// Awaitable returned by [`RecCo::yield_from`].
pub struct YieldFrom<T> {
    node: Arc<Node<T>>,
    child: RecursiveGenerator<T>,
}

impl<T> Unpin for YieldFrom<T> {}

impl<T> Awaitable for YieldFrom<T> {
    type Output = ();

    fn ready(&self) -> bool {
        self.child.head.is_none()
    }

    fn suspend(&mut self, k: Continuation) -> Suspend {
        let (Some(root), Some(head)) = (&self.child.root, self.child.head.take()) else {
            return Suspend::Ready(k);
        };
        *root.parent.lock() = Some(Arc::clone(&self.node));
        self.node.suspended(Step::Delegated(head), k);
        Suspend::Pending
    }

    fn resume(&mut self) {
        let payload = self.node.child_panic.lock().take();
        if let Some(payload) = payload {
            panic::resume_unwind(payload);
        }
    }
}

impl<T> IntoFuture for YieldFrom<T> {
    type Output = ();
    type IntoFuture = Await<Self>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(self)
    }
}

impl<T> std::fmt::Debug for YieldFrom<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YieldFrom")
            .field("child", &self.child)
            .finish()
    }
}

/// A generator whose body may splice in the output of other recursive
/// generators with [`RecCo::yield_from`].
///
/// Like [`Generator`](super::Generator), the body starts suspended and runs
/// only while the consumer advances. Dropping the generator unwinds every
/// active level, innermost first.
pub struct RecursiveGenerator<T> {
    root: Option<Arc<Node<T>>>,
    head: Option<Arc<Node<T>>>,
}

impl<T: Send + 'static> RecursiveGenerator<T> {
    /// Creates a generator; `body` receives the [`RecCo`] used to yield.
    pub fn new<B, F>(body: B) -> Self
    where
        B: FnOnce(RecCo<T>) -> F,
        F: Future<Output = ()> + Send + 'static,
    {
        let node = Node::new();
        let fut = body(RecCo {
            node: Arc::clone(&node),
        });
        let finished = Arc::clone(&node);
        let frame = FrameBox::new(async move {
            fut.await;
            *finished.step.lock() = Some(Step::Finished);
        });
        let sink: Arc<dyn FrameSink> = node.clone();
        let core = FrameCore::new(frame, Some(sink));
        *node.resume.lock() = Some(Continuation::new(core));
        Self {
            root: Some(Arc::clone(&node)),
            head: Some(node),
        }
    }
}

impl<T> RecursiveGenerator<T> {
    /// Returns true once every level has finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.head.is_none()
    }

    fn advance(&mut self) -> Result<Option<T>, Payload> {
        loop {
            let Some(node) = self.head.clone() else {
                return Ok(None);
            };
            let pending = node.resume.lock().take();
            let accepted = pending.is_some_and(Continuation::resume_inline);
            let step = node.step.lock().take();
            match step {
                Some(Step::Yielded(value)) => return Ok(Some(value)),
                Some(Step::Delegated(child)) => {
                    trace!("recursive generator descending");
                    self.head = Some(child);
                }
                Some(Step::Finished) => self.head = node.parent.lock().take(),
                None if !accepted => self.head = node.parent.lock().take(),
                Some(Step::Panicked(payload)) => {
                    let parent = node.parent.lock().take();
                    match parent {
                        Some(parent) => {
                            *parent.child_panic.lock() = Some(payload);
                            self.head = Some(parent);
                        }
                        None => {
                            self.head = None;
                            return Err(payload);
                        }
                    }
                }
                None => panic!("recursive generator body awaited something other than a yield"),
            }
        }
    }

    /// Advances, reporting a panic at any level as an error instead of
    /// re-raising it.
    pub fn try_next(&mut self) -> Result<Option<T>, TaskError> {
        self.advance()
            .map_err(|payload| TaskError::Panicked(PanicPayload::from_any(payload.as_ref())))
    }
}

impl<T> Iterator for RecursiveGenerator<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self.advance() {
            Ok(item) => item,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

impl<T> Default for RecursiveGenerator<T> {
    /// An empty generator.
    fn default() -> Self {
        Self {
            root: None,
            head: None,
        }
    }
}

impl<T> Drop for RecursiveGenerator<T> {
    fn drop(&mut self) {
        let mut next = self.head.take();
        let mut levels = 0_usize;
        while let Some(node) = next {
            let pending = node.resume.lock().take();
            next = node.parent.lock().take();
            if let Some(k) = pending {
                k.cancel(CancelReason::abandoned());
                levels += 1;
            }
        }
        if levels > 0 {
            trace!(levels, "recursive generator dropped while active");
        }
    }
}

impl<T> std::fmt::Debug for RecursiveGenerator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecursiveGenerator")
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::DropProbe;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn to(n: u32) -> RecursiveGenerator<u32> {
        RecursiveGenerator::new(move |co| async move {
            if n > 0 {
                co.yield_from(to(n - 1)).await;
            }
            co.yield_(n).await;
        })
    }

    fn nested_failure(depth: u32, probe: DropProbe) -> RecursiveGenerator<u32> {
        RecursiveGenerator::new(move |co| async move {
            let _guard = probe.guard();
            co.yield_(depth).await;
            if depth == 0 {
                panic!("innermost failure");
            }
            co.yield_from(nested_failure(depth - 1, probe.clone())).await;
        })
    }

    #[test]
    fn delegation_flattens_output() {
        init_test("delegation_flattens_output");
        let values: Vec<_> = to(10).collect();
        assert_eq!(values, (0..=10).collect::<Vec<_>>());
        crate::test_complete!("delegation_flattens_output");
    }

    #[test]
    fn yield_from_empty_child_continues() {
        init_test("yield_from_empty_child_continues");
        let generator = RecursiveGenerator::new(|co| async move {
            co.yield_from(RecursiveGenerator::default()).await;
            co.yield_('x').await;
        });
        assert_eq!(generator.collect::<String>(), "x");
        crate::test_complete!("yield_from_empty_child_continues");
    }

    #[test]
    fn panic_unwinds_every_level() {
        init_test("panic_unwinds_every_level");
        let probe = DropProbe::new();
        let mut generator = nested_failure(3, probe.clone());
        let mut seen = Vec::new();
        let err = loop {
            match generator.try_next() {
                Ok(Some(value)) => seen.push(value),
                Ok(None) => panic!("expected a failure"),
                Err(err) => break err,
            }
        };
        assert_eq!(seen, vec![3, 2, 1, 0]);
        assert!(err.is_panic());
        assert_eq!(probe.dropped(), 4);
        assert!(generator.is_done());
        assert_eq!(generator.next(), None);
        crate::test_complete!("panic_unwinds_every_level");
    }

    #[test]
    fn drop_mid_delegation_unwinds_innermost_first() {
        init_test("drop_mid_delegation_unwinds_innermost_first");
        let order = Arc::new(Mutex::new(Vec::new()));

        struct Record(u32, Arc<Mutex<Vec<u32>>>);
        impl Drop for Record {
            fn drop(&mut self) {
                self.1.lock().push(self.0);
            }
        }

        fn forever(depth: u32, order: Arc<Mutex<Vec<u32>>>) -> RecursiveGenerator<u32> {
            RecursiveGenerator::new(move |co| async move {
                let _record = Record(depth, Arc::clone(&order));
                if depth == 0 {
                    loop {
                        co.yield_(0).await;
                    }
                }
                co.yield_from(forever(depth - 1, order)).await;
            })
        }

        let mut generator = forever(2, Arc::clone(&order));
        assert_eq!(generator.next(), Some(0));
        assert!(order.lock().is_empty());
        drop(generator);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        crate::test_complete!("drop_mid_delegation_unwinds_innermost_first");
    }
}
