//! Lock-free synchronization primitives for frames.
//!
//! Every primitive here parks waiting frames on an intrusive waiter list
//! rooted in a single atomic word, so waiting never allocates and never
//! blocks an OS thread:
//!
//! - [`Mutex`]: exclusive access to a value with direct ownership hand-off
//! - [`CriticalSection`]: the same hand-off protocol over a region of logic
//! - [`Event`]: one-shot broadcast
//! - [`WorkGroup`]: wait for a dynamic set of work tokens to retire

mod critical_section;
mod event;
mod mutex;
mod raw_lock;
pub(crate) mod waiter_list;
mod work_group;

pub use critical_section::{CriticalGuard, CriticalSection, Enter};
pub use event::{Event, Wait};
pub use mutex::{Lock, Mutex, MutexGuard};
pub use work_group::{OwnedWork, WaitIdle, Work, WorkGroup};
