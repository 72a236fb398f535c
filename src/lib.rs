//! Coframe: cooperative coroutine frames with lock-free coordination.
//!
//! # Overview
//!
//! A *frame* is one in-progress invocation of a suspendable computation: an
//! `async` body plus a small header that carries its run state, a
//! cancellation request and one word of intrusive link storage. Frames run on
//! whichever thread resumes them. There is no executor or thread pool; a
//! suspended frame is resumed by whoever later drives the thing it awaits.
//!
//! Everything a frame can await speaks the same [`Awaitable`] protocol:
//! check readiness, hand over a [`Continuation`], read the result.
//!
//! # Core Guarantees
//!
//! - **Exactly-once resumption**: a continuation is a move-only right to
//!   resume one suspension; dropping it unresumed asks the frame to unwind
//! - **Errors at read time**: panics and cancellations land in the completion
//!   record and surface only when a consumer reads the result
//! - **No allocation per wait**: waiter lists thread parked frames through
//!   their own headers
//! - **Flat stacks**: same-thread resumptions are queued on a per-thread
//!   trampoline, so long await chains do not grow the native stack
//! - **Cooperative cancellation**: cancellation is a request; the frame
//!   unwinds at its next resumption and runs every pending destructor
//!
//! # Module Structure
//!
//! - [`frame`]: frame headers, continuations, the trampoline and frame allocators
//! - [`awaitable`]: the awaitable protocol and the `co_await` adapter
//! - [`task`]: unique, shared and lazy tasks
//! - [`generator`]: pull-based and recursive generators
//! - [`sync`]: mutex, event, critical section and work group
//! - [`combinator`]: multiplexer, `when_any` and `when_all`
//! - [`blocking`]: waiting for awaitables from plain threads
//! - [`config`]: runtime configuration
//! - [`error`](mod@error): error types
//! - [`types`]: identifiers, cancellation reasons and panic payloads
//! - [`tracing_compat`]: optional tracing integration (requires `tracing-integration` feature)
//!
//! # Example
//!
//! ```ignore
//! use coframe::{UniqueTask, blocking};
//!
//! let inner = UniqueTask::new(async { 20 });
//! let outer = UniqueTask::new(async move { inner.await.map(|v| v + 1) });
//! assert_eq!(blocking::get(outer), Ok(Ok(21)));
//! ```

// Unsafe code is confined to the waiter lists, completion records, frame
// storage and the data cell of the mutex, each with an explicit allow.
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::future_not_send)]

pub mod awaitable;
pub mod blocking;
pub mod combinator;
pub mod config;
pub mod error;
pub mod frame;
pub mod generator;
pub mod sync;
pub mod task;
pub mod tracing_compat;
pub mod types;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use awaitable::{Awaitable, Suspend, co_await};
pub use combinator::{Multiplexer, when_all, when_any};
pub use config::RuntimeConfig;
pub use error::{AllocError, ConfigError, TaskError};
pub use frame::Continuation;
pub use generator::{Generator, RecursiveGenerator};
pub use sync::{CriticalSection, Event, Mutex, WorkGroup};
pub use task::{LazyTask, SharedTask, UniqueTask, share};
