//! Failure-hook strategy: what happens when a check/run/retry/wait/stop fails.
//!
//! A [`SequenceHooks`] implementation is injected at sequencer construction
//! and consulted by the interpreter whenever an action operation fails. The
//! default for every hook is to abort the whole sequence and surface the
//! original error; overriding individual hooks buys step-skipping or bounded
//! retries at the cost of weakening the all-or-nothing guarantee.
//!
//! Each hook returns an explicit recovery decision instead of a loosely-typed
//! value, so "should retry" and "how many times" are separate concerns.

use crate::action::SequenceAction;
use crate::error::SeqError;
use async_trait::async_trait;

/// Decision after a pre-flight `check` failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Abort before anything executes.
    Abort,
    /// Treat the failure as advisory and proceed.
    Ignore,
}

/// Decision after a `run` rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunRecovery {
    /// Abort the sequence with the original error.
    Abort,
    /// Re-run the action up to this many times.
    Retry(u32),
    /// Continue as if the run had succeeded.
    Ignore,
}

/// Decision after an authorized retry also failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryOutcome {
    Abort,
    Ignore,
}

/// Decision after a completion poll failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitRecovery {
    Abort,
    /// Attempt one extra completion check before giving up.
    RecheckOnce,
}

/// Overridable failure hooks consulted by the interpreter.
///
/// `step` is the zero-based index of the step the failing action belongs to.
#[async_trait]
pub trait SequenceHooks: Send + Sync {
    fn check_failed(&self, _step: usize, _action: &SequenceAction, _err: &SeqError) -> CheckOutcome {
        CheckOutcome::Abort
    }

    fn run_failed(&self, _step: usize, _action: &SequenceAction, _err: &SeqError) -> RunRecovery {
        RunRecovery::Abort
    }

    fn retry_failed(
        &self,
        _step: usize,
        _action: &SequenceAction,
        _attempts: u32,
        _err: &SeqError,
    ) -> RetryOutcome {
        RetryOutcome::Abort
    }

    fn wait_failed(&self, _step: usize, _action: &SequenceAction, _err: &SeqError) -> WaitRecovery {
        WaitRecovery::Abort
    }

    /// A `stop` call failed while aborting a step. Advisory only: stop errors
    /// are collected and reported, never fatal, and cleanup still runs.
    fn stop_failed(&self, _step: usize, _action: &SequenceAction, _err: &SeqError) {}

    /// Device-specific cleanup after the actions of an interrupted step have
    /// been stopped. Unconditional. Default no-op.
    async fn stop_cleanup(&self, _step: usize) {}
}

/// The default strategy: every failure aborts the sequence.
pub struct AbortOnFailure;

#[async_trait]
impl SequenceHooks for AbortOnFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_abort() {
        let hooks = AbortOnFailure;
        let action = SequenceAction::noop();
        let err = SeqError::Execution("refused".into());
        assert_eq!(hooks.check_failed(0, &action, &err), CheckOutcome::Abort);
        assert_eq!(hooks.run_failed(0, &action, &err), RunRecovery::Abort);
        assert_eq!(hooks.retry_failed(0, &action, 3, &err), RetryOutcome::Abort);
        assert_eq!(hooks.wait_failed(0, &action, &err), WaitRecovery::Abort);
    }
}
