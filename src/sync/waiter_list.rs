//! Lock-free intrusive lists of parked continuations.
//!
//! A list is rooted in one atomic word owned by a primitive. Each parked
//! frame is threaded through the `link` slot of its own [`FrameCore`], so
//! queuing a waiter never allocates. The root word decodes as a small enum:
//!
//! - [`Head::Empty`]: null,
//! - [`Head::Marked`]: a sentinel address, meaning "locked", "not yet set",
//!   "completed" and so on depending on the primitive,
//! - [`Head::Waiting`]: the most recently pushed frame; its link leads to the
//!   next one, and the chain ends at whichever of `Empty`/`Marked` the list
//!   held when the first waiter was pushed.
//!
//! Pushing is a CAS loop. Draining swaps the whole word and walks the
//! captured chain exactly once, in LIFO order.

#![allow(unsafe_code)]

use crate::frame::{Continuation, FrameCore};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

/// Decoded view of a list root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Head {
    Empty,
    Marked,
    Waiting(NonNull<FrameCore>),
}

fn marker() -> *mut FrameCore {
    // `Arc::into_raw` never yields the aligned dangling address.
    NonNull::<FrameCore>::dangling().as_ptr()
}

impl Head {
    fn decode(raw: *mut FrameCore) -> Self {
        if raw.is_null() {
            Self::Empty
        } else if raw == marker() {
            Self::Marked
        } else {
            // SAFETY: checked non-null above.
            Self::Waiting(unsafe { NonNull::new_unchecked(raw) })
        }
    }

    fn encode(self) -> *mut FrameCore {
        match self {
            Self::Empty => ptr::null_mut(),
            Self::Marked => marker(),
            Self::Waiting(node) => node.as_ptr(),
        }
    }

    pub(crate) const fn is_waiting(self) -> bool {
        matches!(self, Self::Waiting(_))
    }
}

/// Root word of an intrusive waiter list.
pub(crate) struct AtomicHead {
    raw: AtomicPtr<FrameCore>,
}

// SAFETY: the list owns the `Arc`s it threads; `FrameCore` is `Send + Sync`.
unsafe impl Send for AtomicHead {}
// SAFETY: see above.
unsafe impl Sync for AtomicHead {}

impl AtomicHead {
    pub(crate) const fn empty() -> Self {
        Self {
            raw: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub(crate) fn marked() -> Self {
        Self {
            raw: AtomicPtr::new(marker()),
        }
    }

    pub(crate) fn load(&self) -> Head {
        Head::decode(self.raw.load(Ordering::Acquire))
    }

    /// Single-word transition between non-list states.
    pub(crate) fn compare_exchange(&self, current: Head, new: Head) -> Result<(), Head> {
        debug_assert!(!new.is_waiting(), "lists only grow through push");
        self.raw
            .compare_exchange(
                current.encode(),
                new.encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(Head::decode)
    }

    /// Pushes `k` unless `refuse` rejects the current head, in which case
    /// the continuation is handed back along with the refused head.
    pub(crate) fn push_unless(
        &self,
        k: Continuation,
        mut refuse: impl FnMut(Head) -> bool,
    ) -> Result<(), (Continuation, Head)> {
        let mut current = self.raw.load(Ordering::Acquire);
        loop {
            let head = Head::decode(current);
            if refuse(head) {
                return Err((k, head));
            }
            k.core().link.store(current, Ordering::Relaxed);
            let node = ptr::from_ref::<FrameCore>(k.core().as_ref()).cast_mut();
            match self.raw.compare_exchange_weak(
                current,
                node,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let published = k.into_raw();
                    debug_assert_eq!(published, node);
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Replaces the root with `new` and takes ownership of every waiter that
    /// was threaded through it.
    pub(crate) fn swap(&self, new: Head) -> Chain {
        debug_assert!(!new.is_waiting(), "lists only grow through push");
        let old = self.raw.swap(new.encode(), Ordering::AcqRel);
        Chain { next: old }
    }

    /// Takes every waiter if the root holds any, leaving `reset` behind. A
    /// root in `Empty` or `Marked` is left untouched.
    pub(crate) fn take_waiting(&self, reset: Head) -> Chain {
        debug_assert!(!reset.is_waiting(), "lists only grow through push");
        let mut current = self.raw.load(Ordering::Acquire);
        loop {
            if !Head::decode(current).is_waiting() {
                return Chain::empty();
            }
            match self.raw.compare_exchange_weak(
                current,
                reset.encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Chain { next: current },
                Err(actual) => current = actual,
            }
        }
    }

    /// Number of parked waiters. Only meaningful while no one else touches
    /// the list.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let mut len = 0;
        let mut head = self.load();
        while let Head::Waiting(node) = head {
            len += 1;
            // SAFETY: the node is owned by the list, which is quiescent.
            head = Head::decode(unsafe { node.as_ref() }.link.load(Ordering::Acquire));
        }
        len
    }

    /// Unlinks the most recent waiter. Only one party may pop at a time
    /// (the lock owner for mutex-style lists), which rules out ABA on the
    /// popped node.
    pub(crate) fn pop(&self) -> Option<Continuation> {
        let mut current = self.raw.load(Ordering::Acquire);
        loop {
            let Head::Waiting(node) = Head::decode(current) else {
                return None;
            };
            // SAFETY: the node is owned by the list until we unlink it, and
            // only we unlink.
            let next = unsafe { node.as_ref() }.link.load(Ordering::Acquire);
            match self.raw.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                // SAFETY: the node was pushed via `into_raw` and is now unlinked.
                Ok(_) => return Some(unsafe { Continuation::from_raw(current) }),
                Err(actual) => current = actual,
            }
        }
    }

    /// Removes `frame` if it is the sole entry of a single-slot holder,
    /// resetting the root to `reset`.
    pub(crate) fn take_if(&self, frame: &FrameCore, reset: Head) -> Option<Continuation> {
        let node = ptr::from_ref(frame).cast_mut();
        self.raw
            .compare_exchange(node, reset.encode(), Ordering::AcqRel, Ordering::Acquire)
            .ok()
            // SAFETY: the CAS moved ownership of the node out of the list.
            .map(|raw| unsafe { Continuation::from_raw(raw) })
    }
}

impl Default for AtomicHead {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for AtomicHead {
    fn drop(&mut self) {
        // Dropping the chain cancels every frame still parked here.
        drop(Chain {
            next: *self.raw.get_mut(),
        });
    }
}

impl std::fmt::Debug for AtomicHead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AtomicHead").field(&self.load()).finish()
    }
}

/// Ownership of a detached chain of waiters, yielded most recent first.
///
/// Dropping a chain with entries left drops their continuations, which
/// asks those frames to unwind.
pub(crate) struct Chain {
    next: *mut FrameCore,
}

// SAFETY: the chain owns `Arc<FrameCore>`s.
unsafe impl Send for Chain {}

impl Chain {
    /// A chain with no entries.
    pub(crate) const fn empty() -> Self {
        Self {
            next: ptr::null_mut(),
        }
    }

    /// Decoded view of the next entry; before iteration, the root word that
    /// was captured.
    pub(crate) fn root(&self) -> Head {
        Head::decode(self.next)
    }
}

impl Iterator for Chain {
    type Item = Continuation;

    fn next(&mut self) -> Option<Continuation> {
        let Head::Waiting(node) = Head::decode(self.next) else {
            return None;
        };
        // Read the link before handing out the continuation: once resumed,
        // the frame may park on another list and overwrite it.
        // SAFETY: the chain owns the node.
        self.next = unsafe { node.as_ref() }.link.load(Ordering::Acquire);
        // SAFETY: the node was pushed via `into_raw`; the chain owns it.
        Some(unsafe { Continuation::from_raw(node.as_ptr()) })
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        for k in self.by_ref() {
            drop(k);
        }
    }
}
