//! Asynchronous result containers.
//!
//! Every task owns (or shares) a completion record that its producing frame
//! writes exactly once:
//!
//! - [`UniqueTask`]: one consumer; the producer starts immediately
//! - [`SharedTask`]: any number of consumers, reference counted
//! - [`LazyTask`]: one consumer; the producer starts on first await
//!
//! Reading a record yields `Result<T, TaskError>`. Panics inside the producer
//! and cooperative cancellation both surface here, at read time.

mod lazy;
mod record;
mod shared;
mod unique;

pub use lazy::LazyTask;
pub use shared::{Follow, FollowOwned, SharedTask, share};
pub use unique::UniqueTask;
