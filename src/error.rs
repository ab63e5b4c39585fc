//! Custom error types for the sequencing engine.
//!
//! This module defines the primary error type, `SeqError`, used throughout the
//! crate. Using the `thiserror` crate, it provides a centralized and consistent
//! way to classify the failures a sequence run can encounter.
//!
//! ## Error Hierarchy
//!
//! `SeqError` is an enum with one variant per failure kind:
//!
//! - **`Validation`**: a target value or parameter is invalid before any motion
//!   starts (raised by an action's pre-flight `check`). Fatal to the sequence
//!   unless a hook downgrades it to advisory.
//! - **`Execution`**: an action's `run` was rejected by its target (e.g. the
//!   hardware refused the command). Eligible for a bounded retry if a hook
//!   authorizes one.
//! - **`Completion`**: an action reported failure while being polled for
//!   completion (e.g. the hardware went into fault mid-move).
//! - **`StopFailed`**: a `stop` call itself failed while aborting a step. These
//!   are collected and reported but never block the remaining stop cleanup.
//! - **`Busy`**: a new sequence was requested while one is still running.
//! - **`Stopped`**: surfaced after the fact to indicate the previous run ended
//!   because of a stop request rather than reaching its target.
//! - **`Unsupported`**: the requested operation is not available on this
//!   device (e.g. reading a sequencer with no readable device attached).
//!
//! Device drivers themselves report failures through `anyhow::Result`; the
//! engine wraps those into the matching `SeqError` variant at the point where
//! the failure is classified.

use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type SeqResult<T> = std::result::Result<T, SeqError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeqError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("action was rejected: {0}")]
    Execution(String),

    #[error("completion failed: {0}")]
    Completion(String),

    #[error("stop failed: {0}")]
    StopFailed(String),

    #[error("a sequence is still running")]
    Busy,

    #[error("operation was interrupted: {0}")]
    Stopped(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SeqError::Execution("mono_lift: controller refused start".to_string());
        assert_eq!(
            err.to_string(),
            "action was rejected: mono_lift: controller refused start"
        );
    }

    #[test]
    fn test_busy_display() {
        assert_eq!(SeqError::Busy.to_string(), "a sequence is still running");
    }

    #[test]
    fn test_stopped_carries_status_text() {
        let err = SeqError::Stopped("operation interrupted at step 1: move lift to 5".into());
        assert!(err.to_string().contains("interrupted at step 1"));
    }
}
