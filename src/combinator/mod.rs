//! Combinators over sets of tasks.
//!
//! - [`Multiplexer`]: dynamic fan-in, one result per `select`, in completion
//!   order
//! - [`when_any`]: first finisher of a fixed set wins; the rest are cancelled
//! - [`when_all`], [`when_all2`], [`when_all3`]: wait for every member and
//!   aggregate the values

pub mod multiplexer;
pub mod when_all;
pub mod when_any;

pub use multiplexer::{Multiplexer, Select, Selected};
pub use when_all::{when_all, when_all2, when_all3};
pub use when_any::{WhenAny, when_any};
