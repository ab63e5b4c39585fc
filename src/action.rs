//! The action hierarchy: primitive units of work, parallel groups, sequences.
//!
//! A [`SequenceAction`] is one primitive operation (move, set-parameter, call,
//! method-call, sleep, no-op). A [`Step`] groups actions that run as a
//! parallel group, and a [`Sequence`] is the ordered list of steps handed to
//! the interpreter.
//!
//! Each action exposes the same capability set: `check` (pre-flight
//! validation), `run` (initiate), `is_completed` (non-blocking poll),
//! `stop` (cooperative cancel) and `retry`. The payload of an action is fixed
//! at construction; only internal progress state mutates while it executes.

use crate::device::Device;
use crate::error::{SeqError, SeqResult};
use crate::value::Value;
use log::info;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Boxed callable for [`SequenceAction::Call`].
pub type CallFn = Box<dyn FnMut() -> anyhow::Result<()> + Send + Sync>;

/// Sleeps longer than this log a progress message when they start.
const LONG_SLEEP: Duration = Duration::from_secs(3);

/// One primitive operation of a sequence.
///
/// A closed set of variants; the interpreter dispatches exhaustively over it.
pub enum SequenceAction {
    /// Move a device to a target and wait until it is there. Completion
    /// additionally requires the device's one-shot `finish` finalize to
    /// succeed. The device receives a `stop` call on cancellation only when
    /// the action was constructed stoppable.
    Move {
        dev: Arc<dyn Device>,
        target: Value,
        stoppable: bool,
        finalized: bool,
    },
    /// Set a named parameter on a device and verify it stuck.
    SetParam {
        dev: Arc<dyn Device>,
        param: String,
        value: Value,
    },
    /// Invoke an arbitrary callable; complete immediately after `run`.
    Call { name: String, func: CallFn },
    /// Invoke a named method on a device with arguments.
    MethodCall {
        dev: Arc<dyn Device>,
        method: String,
        args: Vec<Value>,
    },
    /// Wait for a duration; supports early cancellation.
    Sleep {
        duration: Duration,
        reason: Option<String>,
        deadline: Option<Instant>,
        stopped: bool,
    },
    /// Does nothing. Useful as a placeholder when hooks decide by step number.
    NoOp,
}

impl SequenceAction {
    /// Move `dev` to `target`; the motion will not be interrupted on stop.
    pub fn move_to(dev: Arc<dyn Device>, target: impl Into<Value>) -> Self {
        Self::Move {
            dev,
            target: target.into(),
            stoppable: false,
            finalized: false,
        }
    }

    /// Move `dev` to `target`; the device receives `stop` on cancellation.
    pub fn move_stoppable(dev: Arc<dyn Device>, target: impl Into<Value>) -> Self {
        Self::Move {
            dev,
            target: target.into(),
            stoppable: true,
            finalized: false,
        }
    }

    pub fn set_param(
        dev: Arc<dyn Device>,
        param: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self::SetParam {
            dev,
            param: param.into(),
            value: value.into(),
        }
    }

    pub fn call(
        name: impl Into<String>,
        func: impl FnMut() -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self::Call {
            name: name.into(),
            func: Box::new(func),
        }
    }

    pub fn method(dev: Arc<dyn Device>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self::MethodCall {
            dev,
            method: method.into(),
            args,
        }
    }

    pub fn sleep(duration: Duration) -> Self {
        Self::Sleep {
            duration,
            reason: None,
            deadline: None,
            stopped: false,
        }
    }

    pub fn sleep_with_reason(duration: Duration, reason: impl Into<String>) -> Self {
        Self::Sleep {
            duration,
            reason: Some(reason.into()),
            deadline: None,
            stopped: false,
        }
    }

    pub fn noop() -> Self {
        Self::NoOp
    }

    /// The device this action operates on, if any.
    pub fn device(&self) -> Option<&Arc<dyn Device>> {
        match self {
            Self::Move { dev, .. } | Self::SetParam { dev, .. } | Self::MethodCall { dev, .. } => {
                Some(dev)
            }
            _ => None,
        }
    }

    /// Validate the payload against the target's current constraints.
    ///
    /// Called for the whole sequence before anything runs, so an invalid
    /// target fails fast before any hardware motion begins.
    pub async fn check(&self) -> SeqResult<()> {
        match self {
            Self::Move { dev, target, .. } => {
                let (ok, reason) = dev.is_allowed(target).await;
                if ok {
                    Ok(())
                } else {
                    Err(SeqError::Validation(format!(
                        "moving {} to {} is not allowed: {}",
                        dev.name(),
                        target,
                        reason
                    )))
                }
            }
            _ => Ok(()),
        }
    }

    /// Initiate the operation. Issued at most once per sequence run; a
    /// further invocation only happens through [`SequenceAction::retry`].
    pub async fn run(&mut self) -> SeqResult<()> {
        match self {
            Self::Move {
                dev,
                target,
                finalized,
                ..
            } => {
                *finalized = false;
                dev.start(target.clone())
                    .await
                    .map_err(|e| SeqError::Execution(format!("{}: {:#}", dev.name(), e)))
            }
            Self::SetParam { dev, param, value } => {
                dev.set_param(param, value.clone())
                    .await
                    .map_err(|e| SeqError::Execution(format!("{}.{}: {:#}", dev.name(), param, e)))?;
                let read_back = dev
                    .read_param(param)
                    .await
                    .map_err(|e| SeqError::Execution(format!("{}.{}: {:#}", dev.name(), param, e)))?;
                if read_back == *value {
                    Ok(())
                } else {
                    Err(SeqError::Execution(format!(
                        "setting {}.{} to {} did not stick (read back {})",
                        dev.name(),
                        param,
                        value,
                        read_back
                    )))
                }
            }
            Self::Call { name, func } => {
                func().map_err(|e| SeqError::Execution(format!("{}: {:#}", name, e)))
            }
            Self::MethodCall { dev, method, args } => dev
                .call(method, args)
                .await
                .map(|_| ())
                .map_err(|e| SeqError::Execution(format!("{}.{}: {:#}", dev.name(), method, e))),
            Self::Sleep {
                duration,
                reason,
                deadline,
                stopped,
            } => {
                *stopped = false;
                if *duration > LONG_SLEEP {
                    match reason {
                        Some(why) => info!("sleeping {:.0?} ({})", duration, why),
                        None => info!("sleeping {:.0?}", duration),
                    }
                }
                *deadline = Some(Instant::now() + *duration);
                Ok(())
            }
            Self::NoOp => Ok(()),
        }
    }

    /// Re-run a failed action up to `attempts` times, swallowing intermediate
    /// failures. Returns the last error if every attempt fails.
    pub async fn retry(&mut self, attempts: u32) -> SeqResult<()> {
        let mut last = None;
        for _ in 0..attempts {
            match self.run().await {
                Ok(()) => return Ok(()),
                Err(e) => last = Some(e),
            }
        }
        Err(last.unwrap_or_else(|| {
            SeqError::Execution("retry authorized with zero attempts".to_string())
        }))
    }

    /// Non-blocking completion poll.
    ///
    /// For moves, the device must report done and the one-shot finalize must
    /// succeed; the finalize is never issued twice.
    pub async fn is_completed(&mut self) -> SeqResult<bool> {
        match self {
            Self::Move { dev, finalized, .. } => {
                let done = dev
                    .is_completed()
                    .await
                    .map_err(|e| SeqError::Completion(format!("{}: {:#}", dev.name(), e)))?;
                if !done {
                    return Ok(false);
                }
                if !*finalized {
                    dev.finish()
                        .await
                        .map_err(|e| SeqError::Completion(format!("{}: {:#}", dev.name(), e)))?;
                    *finalized = true;
                }
                Ok(true)
            }
            Self::Sleep {
                deadline, stopped, ..
            } => match deadline {
                _ if *stopped => Ok(true),
                Some(end) => Ok(Instant::now() >= *end),
                // never started
                None => Ok(true),
            },
            _ => Ok(true),
        }
    }

    /// Request cancellation. A move forwards the stop to its device only when
    /// constructed stoppable; everything in flight on a non-stoppable device
    /// runs to completion regardless.
    pub async fn stop(&mut self) -> SeqResult<()> {
        match self {
            Self::Move { dev, stoppable, .. } => {
                if *stoppable {
                    dev.stop()
                        .await
                        .map_err(|e| SeqError::StopFailed(format!("{}: {:#}", dev.name(), e)))
                } else {
                    Ok(())
                }
            }
            Self::Sleep { stopped, .. } => {
                *stopped = true;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for SequenceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Move { dev, target, .. } => write!(f, "move {} to {}", dev.name(), target),
            Self::SetParam { dev, param, value } => {
                write!(f, "{}.{} = {}", dev.name(), param, value)
            }
            Self::Call { name, .. } => write!(f, "{}()", name),
            Self::MethodCall { dev, method, args } => {
                let args = args
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{}.{}({})", dev.name(), method, args)
            }
            Self::Sleep {
                duration, deadline, ..
            } => match deadline {
                // already started; used for status string updates
                Some(end) => write!(
                    f,
                    "waiting: {:.1?}",
                    end.saturating_duration_since(Instant::now())
                ),
                None => write!(f, "sleep({:?})", duration),
            },
            Self::NoOp => write!(f, "nop"),
        }
    }
}

impl fmt::Debug for SequenceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SequenceAction({})", self)
    }
}

/// A parallel group of actions: all `run` calls are issued before any
/// completion polling begins, and the whole group completes before the next
/// step starts.
///
/// Never empty; a bare action converts into a single-member step.
pub struct Step {
    actions: Vec<SequenceAction>,
}

impl Step {
    pub fn new(actions: Vec<SequenceAction>) -> Self {
        debug_assert!(!actions.is_empty(), "a step must contain an action");
        Self { actions }
    }

    pub fn single(action: SequenceAction) -> Self {
        Self::new(vec![action])
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[SequenceAction] {
        &self.actions
    }

    pub(crate) fn actions_mut(&mut self) -> &mut [SequenceAction] {
        &mut self.actions
    }

    /// Describes every action of the step, for status texts.
    pub fn describe(&self) -> String {
        self.actions
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Describes a subset of the step's actions by index.
    pub(crate) fn describe_some(&self, indices: &[usize]) -> String {
        indices
            .iter()
            .filter_map(|&i| self.actions.get(i))
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl From<SequenceAction> for Step {
    fn from(action: SequenceAction) -> Self {
        Step::single(action)
    }
}

/// Ordered list of steps; one complete multi-stage hardware operation.
///
/// Consumed by a single run; a new target requires generating a new sequence.
pub type Sequence = Vec<Step>;
