//! The sequence interpreter: drives a [`Sequence`] to completion on a worker
//! task, synthesizing live status, honoring stop requests and delegating
//! failures to the injected hooks.
//!
//! # Concurrency
//!
//! One worker task per sequencer, spawned per run. The status snapshot lives
//! in a `tokio::sync::watch` channel written only from the worker, so a
//! concurrently-querying caller always observes the most recent complete
//! snapshot. The stop flag is an `AtomicBool` observed between completion
//! sweeps and at step boundaries; the only voluntary sleeps are the bounded
//! poll-interval sleep and explicit sleep actions, both of which a stop
//! request cuts short within one poll interval.

use crate::action::{Sequence, Step};
use crate::device::Device;
use crate::error::SeqResult;
use crate::hooks::{CheckOutcome, RetryOutcome, RunRecovery, SequenceHooks, WaitRecovery};
use crate::status::{SeqStatus, StatusCode};
use log::{debug, error, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// Bounded sleep between completion sweeps.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared state between a sequencer device and its worker task.
///
/// Mutated only through these accessors; the status transition is always
/// emitted together with the flag change it belongs to.
pub(crate) struct SeqState {
    name: String,
    status: watch::Sender<SeqStatus>,
    /// Run token: exactly one sequence may hold it at a time. Acquired in
    /// `start` before the first await, released by the worker on exit.
    running: watch::Sender<bool>,
    stop_flag: AtomicBool,
    was_stopped: AtomicBool,
    /// First uncaught error of the current run, surfaced to blocking waiters.
    last_error: Mutex<Option<crate::error::SeqError>>,
    /// Devices referenced by the current sequence, for status synthesis.
    devices: Mutex<Vec<Arc<dyn Device>>>,
}

impl SeqState {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            status: watch::Sender::new(SeqStatus::idle()),
            running: watch::Sender::new(false),
            stop_flag: AtomicBool::new(false),
            was_stopped: AtomicBool::new(false),
            last_error: Mutex::new(None),
            devices: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn current_status(&self) -> SeqStatus {
        self.status.borrow().clone()
    }

    pub(crate) fn set_status(&self, code: StatusCode, text: impl Into<String>) {
        let next = SeqStatus::new(code, text);
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!("[{}] status {}", self.name, next);
            *current = next.clone();
            true
        });
    }

    /// Claim the run token. Fails if a sequence already holds it; the check
    /// and the claim are one atomic operation.
    pub(crate) fn try_acquire_run(&self) -> bool {
        self.running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        })
    }

    pub(crate) fn release_run(&self) {
        self.running
            .send_if_modified(|running| std::mem::replace(running, false));
    }

    pub(crate) fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Block until no sequence holds the run token. Returns immediately when
    /// the device is idle.
    pub(crate) async fn wait_idle(&self) {
        let mut rx = self.running.subscribe();
        // the sender lives in this struct, so wait_for cannot fail
        let _ = rx.wait_for(|running| !running).await;
    }

    pub(crate) fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_stop(&self) {
        self.stop_flag.store(false, Ordering::SeqCst);
    }

    pub(crate) fn mark_stopped(&self) {
        self.was_stopped.store(true, Ordering::SeqCst);
    }

    pub(crate) fn was_stopped(&self) -> bool {
        self.was_stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_was_stopped(&self) {
        self.was_stopped.store(false, Ordering::SeqCst);
    }

    pub(crate) fn record_error(&self, err: crate::error::SeqError) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(err);
    }

    pub(crate) fn clear_error(&self) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub(crate) fn last_error(&self) -> Option<crate::error::SeqError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_devices(&self, devices: Vec<Arc<dyn Device>>) {
        *self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = devices;
    }

    pub(crate) fn devices(&self) -> Vec<Arc<dyn Device>> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Pre-flight: `check` every action of every step, in order, before anything
/// runs. A failure is logged and routed through `check_failed`; `Abort` ends
/// the run before any hardware moves, `Ignore` treats it as advisory.
pub(crate) async fn preflight(
    state: &SeqState,
    hooks: &dyn SequenceHooks,
    sequence: &Sequence,
) -> SeqResult<()> {
    for (num, step) in sequence.iter().enumerate() {
        for action in step.actions() {
            if let Err(e) = action.check().await {
                error!("[{}] check of {} failed: {}", state.name(), action, e);
                match hooks.check_failed(num, action, &e) {
                    CheckOutcome::Abort => return Err(e),
                    CheckOutcome::Ignore => {}
                }
            }
        }
    }
    Ok(())
}

/// Releases the run token when the worker exits, unwinding included.
struct RunGuard<'a>(&'a SeqState);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.release_run();
    }
}

/// Worker entry point: runs the sequence and records the terminal status.
pub(crate) async fn run_sequence(
    state: Arc<SeqState>,
    hooks: Arc<dyn SequenceHooks>,
    mut sequence: Sequence,
) {
    let _token = RunGuard(&state);
    debug!(
        "[{}] performing sequence of {} steps",
        state.name(),
        sequence.len()
    );
    if let Err(e) = drive(&state, hooks.as_ref(), &mut sequence).await {
        let previous = state.current_status().text;
        state.set_status(StatusCode::Error, format!("error {} upon {}", e, previous));
        error!("[{}] sequence failed: {}", state.name(), e);
        state.record_error(e);
    }
}

async fn drive(
    state: &SeqState,
    hooks: &dyn SequenceHooks,
    sequence: &mut Sequence,
) -> SeqResult<()> {
    for (num, step) in sequence.iter_mut().enumerate() {
        state.set_status(
            StatusCode::Busy,
            format!("{}) starting actions: {}", num + 1, step.describe()),
        );
        run_step(state, hooks, num, step).await?;
        let pending = wait_step(state, hooks, num, step).await?;
        if state.stop_requested() {
            state.mark_stopped();
            stop_step(state, hooks, num, step, &pending).await;
            state.set_status(
                StatusCode::NotReached,
                format!(
                    "operation interrupted at step {}: {}",
                    num + 1,
                    step.describe()
                ),
            );
            return Ok(());
        }
    }
    debug!("[{}] sequence finished", state.name());
    state.set_status(StatusCode::Ok, "idle");
    Ok(())
}

/// Issue `run` for every action of the step, in construction order.
async fn run_step(
    state: &SeqState,
    hooks: &dyn SequenceHooks,
    num: usize,
    step: &mut Step,
) -> SeqResult<()> {
    for action in step.actions_mut() {
        debug!("[{}] - action: {}", state.name(), action);
        if let Err(e) = action.run().await {
            warn!("[{}] run of {} failed: {}", state.name(), action, e);
            match hooks.run_failed(num, action, &e) {
                RunRecovery::Abort => return Err(e),
                RunRecovery::Ignore => {}
                RunRecovery::Retry(attempts) => {
                    if let Err(e) = action.retry(attempts).await {
                        warn!(
                            "[{}] retry ({}x) of {} failed: {}",
                            state.name(),
                            attempts,
                            action,
                            e
                        );
                        match hooks.retry_failed(num, action, attempts, &e) {
                            RetryOutcome::Abort => return Err(e),
                            RetryOutcome::Ignore => {}
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Poll the step's actions until every one reports completion or a stop is
/// requested. Completion order within the step carries no guarantee; the
/// pending set shrinks first-completed-first-removed.
///
/// Returns the indices still pending (non-empty only after a stop request).
async fn wait_step(
    state: &SeqState,
    hooks: &dyn SequenceHooks,
    num: usize,
    step: &mut Step,
) -> SeqResult<Vec<usize>> {
    let mut pending: Vec<usize> = (0..step.len()).collect();
    while !pending.is_empty() && !state.stop_requested() {
        state.set_status(
            StatusCode::Busy,
            format!("waiting for: {}", step.describe_some(&pending)),
        );
        let mut i = 0;
        while i < pending.len() {
            let action = &mut step.actions_mut()[pending[i]];
            match action.is_completed().await {
                Ok(true) => {
                    pending.swap_remove(i);
                }
                Ok(false) => i += 1,
                Err(e) => {
                    warn!("[{}] waiting for {} failed: {}", state.name(), action, e);
                    match hooks.wait_failed(num, action, &e) {
                        WaitRecovery::Abort => return Err(e),
                        // one extra check before giving up
                        WaitRecovery::RecheckOnce => match action.is_completed().await {
                            Ok(true) => {
                                pending.swap_remove(i);
                            }
                            Ok(false) => i += 1,
                            Err(e) => return Err(e),
                        },
                    }
                }
            }
        }
        if pending.is_empty() || state.stop_requested() {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Ok(pending)
}

/// Stop every still-pending action of an interrupted step, collecting (not
/// propagating) individual stop failures, then run the cleanup hook. Cleanup
/// is unconditional.
async fn stop_step(
    state: &SeqState,
    hooks: &dyn SequenceHooks,
    num: usize,
    step: &mut Step,
    pending: &[usize],
) {
    debug!(
        "[{}] stop requested, stopping actions: {}",
        state.name(),
        step.describe_some(pending)
    );
    state.set_status(
        StatusCode::Busy,
        format!("stopping at step {}: {}", num + 1, step.describe()),
    );
    for &i in pending {
        let action = &mut step.actions_mut()[i];
        if let Err(e) = action.stop().await {
            warn!("[{}] stop of {} failed: {}", state.name(), action, e);
            hooks.stop_failed(num, action, &e);
        }
    }
    hooks.stop_cleanup(num).await;
    debug!("[{}] stopping finished", state.name());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_token_is_exclusive() {
        let state = SeqState::new("t".to_string());
        assert!(state.try_acquire_run());
        assert!(!state.try_acquire_run());
        assert!(state.is_running());
        state.release_run();
        assert!(!state.is_running());
        assert!(state.try_acquire_run());
    }

    #[tokio::test]
    async fn test_wait_idle_wakes_on_release() {
        let state = Arc::new(SeqState::new("t".to_string()));
        assert!(state.try_acquire_run());
        let releaser = {
            let state = state.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                state.release_run();
            })
        };
        tokio::time::timeout(Duration::from_secs(5), state.wait_idle())
            .await
            .expect("wait_idle did not observe the release");
        assert!(!state.is_running());
        releaser.await.expect("releaser task failed");
    }
}
