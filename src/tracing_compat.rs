//! Optional tracing integration.
//!
//! With the `tracing-integration` feature enabled the usual `tracing` macros
//! are re-exported. Without it they expand to nothing, so call sites in the
//! frame runner pay no cost.
//!
//! ```ignore
//! use crate::tracing_compat::trace;
//!
//! trace!(frame = %id, "frame suspended");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    #[doc(hidden)]
    #[macro_export]
    macro_rules! __coframe_noop_trace {
        ($($arg:tt)*) => {};
    }

    #[doc(hidden)]
    #[macro_export]
    macro_rules! __coframe_noop_debug {
        ($($arg:tt)*) => {};
    }

    #[doc(hidden)]
    #[macro_export]
    macro_rules! __coframe_noop_info {
        ($($arg:tt)*) => {};
    }

    #[doc(hidden)]
    #[macro_export]
    macro_rules! __coframe_noop_warn {
        ($($arg:tt)*) => {};
    }

    #[doc(hidden)]
    #[macro_export]
    macro_rules! __coframe_noop_error {
        ($($arg:tt)*) => {};
    }
}

#[cfg(not(feature = "tracing-integration"))]
pub use crate::{
    __coframe_noop_debug as debug, __coframe_noop_error as error, __coframe_noop_info as info,
    __coframe_noop_trace as trace, __coframe_noop_warn as warn,
};
