//! The public-facing sequencing device.
//!
//! A [`SequencerDevice`] translates a high-level "move to target" request into
//! a concrete [`Sequence`] via a pluggable [`SequenceGenerator`], hands it to
//! the interpreter on a dedicated worker task, and presents a single
//! start/stop/status/reset view to callers. The calling side never blocks
//! inside the run loop; it only blocks if it explicitly chooses to
//! [`SequencerDevice::wait`].

use crate::action::Sequence;
use crate::device::Device;
use crate::error::{SeqError, SeqResult};
use crate::hooks::{AbortOnFailure, SequenceHooks};
use crate::interpreter::{self, SeqState};
use crate::status::{SeqStatus, StatusCode};
use crate::value::Value;
use async_trait::async_trait;
use log::debug;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

/// Produces the target-specific sequence for one `start` request.
///
/// Plain closures `Fn(&Value) -> SeqResult<Sequence>` implement this; a
/// dedicated implementation is only needed when generation has to consult
/// devices asynchronously (e.g. read a position to restore later).
#[async_trait]
pub trait SequenceGenerator: Send + Sync {
    async fn generate(&self, target: &Value) -> SeqResult<Sequence>;
}

#[async_trait]
impl<F> SequenceGenerator for F
where
    F: Fn(&Value) -> SeqResult<Sequence> + Send + Sync,
{
    async fn generate(&self, target: &Value) -> SeqResult<Sequence> {
        (self)(target)
    }
}

/// Builder for [`SequencerDevice`].
pub struct SequencerBuilder {
    name: String,
    generator: Box<dyn SequenceGenerator>,
    hooks: Arc<dyn SequenceHooks>,
    read_from: Option<Arc<dyn Device>>,
    honor_stop: bool,
}

impl SequencerBuilder {
    pub fn new(name: impl Into<String>, generator: impl SequenceGenerator + 'static) -> Self {
        Self {
            name: name.into(),
            generator: Box::new(generator),
            hooks: Arc::new(AbortOnFailure),
            read_from: None,
            honor_stop: true,
        }
    }

    /// Inject a failure-hook strategy (default: abort on any failure).
    pub fn hooks(mut self, hooks: impl SequenceHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Delegate [`SequencerDevice::read`] to this device.
    pub fn read_from(mut self, dev: Arc<dyn Device>) -> Self {
        self.read_from = Some(dev);
        self
    }

    /// Ignore stop requests entirely. Needed for the rare operation that must
    /// never be interrupted once started (e.g. cycling an interlock).
    pub fn ignore_stop_requests(mut self) -> Self {
        self.honor_stop = false;
        self
    }

    pub fn build(self) -> SequencerDevice {
        let state = Arc::new(SeqState::new(self.name.clone()));
        SequencerDevice {
            name: self.name,
            generator: self.generator,
            hooks: self.hooks,
            read_from: self.read_from,
            honor_stop: self.honor_stop,
            state,
            task: Mutex::new(None),
        }
    }
}

/// A device that reaches its target by executing a generated sequence.
///
/// Exclusively owns its current sequence and worker task; no two sequences
/// run concurrently on one instance. The underlying target devices are not
/// owned — concurrent external access to them during a run is a caller error.
pub struct SequencerDevice {
    name: String,
    generator: Box<dyn SequenceGenerator>,
    hooks: Arc<dyn SequenceHooks>,
    read_from: Option<Arc<dyn Device>>,
    honor_stop: bool,
    state: Arc<SeqState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SequencerDevice {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a sequence run is currently in flight. True from the moment
    /// `start` accepts a target until the worker releases the run token.
    pub fn busy(&self) -> bool {
        self.state.is_running()
    }

    /// Generate and start the sequence for `target`.
    ///
    /// Fails with [`SeqError::Busy`] while a run is in flight; the busy check
    /// and the claim are atomic, so two concurrent `start` calls never both
    /// succeed. The whole sequence is checked up front; a validation failure
    /// aborts before any hardware motion begins. On success the sequence runs
    /// asynchronously — poll [`SequencerDevice::status`] or block on
    /// [`SequencerDevice::wait`].
    pub async fn start(&self, target: impl Into<Value>) -> SeqResult<()> {
        let target = target.into();
        if !self.state.try_acquire_run() {
            return Err(SeqError::Busy);
        }
        // from here on the token is ours; hand it back on every early exit
        let sequence = match self.prepare(&target).await {
            Ok(sequence) => sequence,
            Err(e) => {
                self.state.release_run();
                return Err(e);
            }
        };

        let devices = sequence
            .iter()
            .flat_map(|step| step.actions().iter().filter_map(|a| a.device().cloned()))
            .collect();
        self.state.set_devices(devices);
        self.state.clear_stop();
        self.state.clear_was_stopped();
        self.state.clear_error();
        self.state
            .set_status(StatusCode::Busy, format!("moving to {}", target));

        let state = self.state.clone();
        let hooks = self.hooks.clone();
        let handle = tokio::spawn(interpreter::run_sequence(state, hooks, sequence));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Generate and pre-flight the sequence for one accepted target.
    async fn prepare(&self, target: &Value) -> SeqResult<Sequence> {
        let sequence = self.generator.generate(target).await?;
        debug!(
            "[{}] generated sequence for target {} has {} steps",
            self.name,
            target,
            sequence.len()
        );
        interpreter::preflight(&self.state, self.hooks.as_ref(), &sequence).await?;
        Ok(sequence)
    }

    /// Request a cooperative stop of the running sequence. Non-blocking; the
    /// worker observes the flag within one poll interval. Actions not marked
    /// stoppable run to completion regardless.
    pub fn stop(&self) {
        if self.honor_stop {
            self.state.request_stop();
        }
    }

    /// The worse of the interpreter's own status and the combined status of
    /// every device referenced by the current sequence, so a sub-device fault
    /// surfaces even before the interpreter observes it.
    pub async fn status(&self) -> SeqStatus {
        let mut worst = self.state.current_status();
        for dev in self.state.devices() {
            worst = worst.worse(dev.status().await);
        }
        worst
    }

    /// Restore the idle state after a finished or interrupted run. Fails with
    /// [`SeqError::Busy`] while a sequence is running.
    pub fn reset(&self) -> SeqResult<()> {
        if self.busy() {
            return Err(SeqError::Busy);
        }
        self.state.clear_stop();
        self.state.clear_was_stopped();
        self.state.clear_error();
        self.state.set_status(StatusCode::Ok, "idle");
        Ok(())
    }

    /// Current value, delegated to the device configured via
    /// [`SequencerBuilder::read_from`].
    pub async fn read(&self) -> SeqResult<Value> {
        match &self.read_from {
            Some(dev) => dev
                .read()
                .await
                .map_err(|e| SeqError::Completion(format!("{}: {:#}", dev.name(), e))),
            None => Err(SeqError::Unsupported(format!(
                "{}: no readable device attached",
                self.name
            ))),
        }
    }

    /// Read-path signal distinguishing "reached target" from "aborted":
    /// fails with [`SeqError::Stopped`] if the previous run was interrupted,
    /// or with the run's first uncaught error if it failed.
    pub fn finish(&self) -> SeqResult<()> {
        if self.state.was_stopped() {
            return Err(SeqError::Stopped(self.state.current_status().text));
        }
        if let Some(err) = self.state.last_error() {
            return Err(err);
        }
        Ok(())
    }

    /// Block until the current run is terminal, then behave like
    /// [`SequencerDevice::finish`].
    ///
    /// The device stays busy for the whole wait, so a concurrent `start` is
    /// still refused while any caller blocks here.
    pub async fn wait(&self) -> SeqResult<()> {
        self.state.wait_idle().await;
        let finished = {
            let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(handle) if handle.is_finished() => slot.take(),
                _ => None,
            }
        };
        if let Some(handle) = finished {
            if handle.await.is_err() {
                return Err(SeqError::Execution("sequence worker panicked".to_string()));
            }
        }
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{SequenceAction, Step};

    fn trivial_generator(_: &Value) -> SeqResult<Sequence> {
        Ok(vec![Step::from(SequenceAction::noop())])
    }

    #[tokio::test]
    async fn test_idle_at_rest() {
        let dev = SequencerBuilder::new("seq", trivial_generator).build();
        assert!(!dev.busy());
        assert_eq!(dev.status().await, SeqStatus::idle());
    }

    #[tokio::test]
    async fn test_trivial_sequence_completes() {
        let dev = SequencerBuilder::new("seq", trivial_generator).build();
        dev.start(Value::Null).await.unwrap();
        dev.wait().await.unwrap();
        assert_eq!(dev.status().await, SeqStatus::idle());
    }

    #[tokio::test]
    async fn test_generator_error_propagates() {
        let dev = SequencerBuilder::new("seq", |_: &Value| -> SeqResult<Sequence> {
            Err(SeqError::Validation("unknown crystal".into()))
        })
        .build();
        let err = dev.start("Cu").await.unwrap_err();
        assert!(matches!(err, SeqError::Validation(_)));
        assert!(!dev.busy());
    }

    #[tokio::test]
    async fn test_read_without_device_is_unsupported() {
        let dev = SequencerBuilder::new("seq", trivial_generator).build();
        assert!(matches!(dev.read().await, Err(SeqError::Unsupported(_))));
    }
}
