//! Lock-free mutex for frames.
//!
//! The lock state is a single atomic word (see the `raw_lock` module):
//! unlocked, locked, or locked with a chain of parked frames threaded
//! through their own link slots. Unlocking with waiters hands ownership
//! directly to one of them without ever passing through "unlocked", so
//! there is no re-contention after a wake-up.
//!
//! # Example
//!
//! ```ignore
//! let counter = Arc::new(Mutex::new(0));
//! let task = UniqueTask::new({
//!     let counter = Arc::clone(&counter);
//!     async move {
//!         let mut guard = counter.lock().await;
//!         *guard += 1;
//!     }
//! });
//! ```

#![allow(unsafe_code)]

use super::raw_lock::{Acquire, RawLock};
use crate::awaitable::{Await, Awaitable, Suspend, co_await};
use crate::frame::Continuation;
use std::cell::UnsafeCell;
use std::future::IntoFuture;
use std::ops::{Deref, DerefMut};

/// A mutual exclusion lock whose `lock` suspends the calling frame instead
/// of blocking the thread.
pub struct Mutex<T: ?Sized> {
    raw: RawLock,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `raw`.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
// SAFETY: see above.
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates an unlocked mutex.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Consumes the mutex and returns the data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Returns an awaitable that resolves to a guard once the lock is held.
    pub fn lock(&self) -> Lock<'_, T> {
        Lock {
            mutex: self,
            acquire: self.raw.acquire(),
        }
    }

    /// Acquires the lock if it is free.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.raw.try_lock().then(|| MutexGuard { mutex: self })
    }

    /// Returns true if the lock is held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Returns a mutable reference to the data; no locking is needed since
    /// the borrow is exclusive.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// Awaitable returned by [`Mutex::lock`].
#[derive(Debug)]
pub struct Lock<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    acquire: Acquire<'a>,
}

impl<'a, T: ?Sized> Awaitable for Lock<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn ready(&self) -> bool {
        self.acquire.ready()
    }

    fn suspend(&mut self, k: Continuation) -> Suspend {
        self.acquire.suspend(k)
    }

    fn resume(&mut self) -> MutexGuard<'a, T> {
        self.acquire.resume();
        MutexGuard { mutex: self.mutex }
    }
}

impl<'a, T: ?Sized> IntoFuture for Lock<'a, T> {
    type Output = MutexGuard<'a, T>;
    type IntoFuture = Await<Self>;

    fn into_future(self) -> Self::IntoFuture {
        co_await(self)
    }
}

/// RAII guard; unlocking happens on drop.
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

// SAFETY: the guard only hands out `&T` across threads.
unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held exclusively.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}

impl<T: ?Sized + std::fmt::Debug> std::fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexGuard").field("data", &&**self).finish()
    }
}
