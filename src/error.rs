//! Error types.
//!
//! A frame's outcome is one of value, captured panic or cancellation. The
//! latter two are surfaced to consumers as [`TaskError`] when the result is
//! read, never eagerly. Protocol violations (a second follower on a unique
//! task, unlocking an unlocked mutex) are programming errors and panic
//! instead of appearing here.

use crate::types::{CancelReason, PanicPayload};
use thiserror::Error;

/// The failure side of reading a task's completion record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The producing frame unwound cooperatively instead of producing a value.
    #[error("task cancelled: {0}")]
    Cancelled(CancelReason),
    /// The producing frame panicked.
    #[error("task panicked: {0}")]
    Panicked(PanicPayload),
    /// The task handle holds no frame (default-constructed or already consumed).
    #[error("task has no state")]
    NoState,
}

impl TaskError {
    /// Returns true if this error is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if this error is a captured panic.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    /// Returns the cancellation reason, if this is a cancellation.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<&CancelReason> {
        match self {
            Self::Cancelled(reason) => Some(reason),
            _ => None,
        }
    }
}

/// A frame allocator could not satisfy a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("frame allocation of {size} bytes (align {align}) failed")]
pub struct AllocError {
    /// Requested size in bytes.
    pub size: usize,
    /// Requested alignment in bytes.
    pub align: usize,
}

impl AllocError {
    pub(crate) const fn for_layout(layout: std::alloc::Layout) -> Self {
        Self {
            size: layout.size(),
            align: layout.align(),
        }
    }
}

/// Invalid or conflicting runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The inline resume depth must be at least one.
    #[error("max_inline_depth must be at least 1 (got {0})")]
    InvalidInlineDepth(usize),
    /// An environment variable held an unparsable value.
    #[error("environment variable {var} has invalid value {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
    /// A configuration was already installed for this process.
    #[error("runtime configuration already installed")]
    AlreadyInstalled,
    /// Reading a configuration file failed.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    /// A configuration file was not valid TOML for [`crate::RuntimeConfig`].
    #[cfg(feature = "config-file")]
    #[error("failed to parse configuration file: {0}")]
    Toml(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CancelKind;

    #[test]
    fn task_error_display() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("task_error_display");
        let err = TaskError::Cancelled(CancelReason::abandoned());
        assert_eq!(err.to_string(), "task cancelled: abandoned");
        assert!(err.is_cancelled());
        assert_eq!(
            err.cancel_reason().map(|r| r.kind),
            Some(CancelKind::Abandoned)
        );

        let err = TaskError::Panicked(PanicPayload::new("boom"));
        assert_eq!(err.to_string(), "task panicked: boom");
        assert!(err.is_panic());
        assert!(err.cancel_reason().is_none());

        assert_eq!(TaskError::NoState.to_string(), "task has no state");
    }

    #[test]
    fn alloc_error_reports_layout() {
        let layout = std::alloc::Layout::from_size_align(64, 16).unwrap();
        let err = AllocError::for_layout(layout);
        assert_eq!(err.size, 64);
        assert_eq!(err.align, 16);
        assert!(err.to_string().contains("64 bytes"));
    }
}
