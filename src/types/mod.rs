//! Core types shared by every frame and primitive.
//!
//! - [`id`]: Identifier types (`FrameId`)
//! - [`cancel`]: Cancellation reason and kind types
//! - [`panic`]: Panic payloads captured at the poll boundary

pub mod cancel;
pub mod id;
pub mod panic;

pub use cancel::{CancelKind, CancelReason};
pub use id::FrameId;
pub use panic::PanicPayload;
