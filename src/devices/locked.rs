//! A "locked" device: every movement of the main device is surrounded by
//! moving a lock device out of the way and back afterwards.
//!
//! The lock moves to the unlock value before the main device moves; after a
//! successful move the lock returns either to a configured lock value or to
//! the position it had before the run (read at sequence-generation time). If
//! the run fails partway, the lock is deliberately left where it is — the
//! fault must be resolved before the arrangement is locked again.
//!
//! With `keep_fixed` the lock is released before and re-fixed after each of
//! its own moves, via the device's named `release`/`fix` methods.

use crate::action::{Sequence, SequenceAction, Step};
use crate::device::Device;
use crate::error::{SeqError, SeqResult};
use crate::sequencer::{SequenceGenerator, SequencerBuilder, SequencerDevice};
use crate::status::SeqStatus;
use crate::value::Value;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

struct LockedGenerator {
    device: Arc<dyn Device>,
    lock: Arc<dyn Device>,
    unlock_value: Value,
    lock_value: Option<Value>,
    keep_fixed: bool,
}

impl LockedGenerator {
    fn release(&self) -> Step {
        SequenceAction::method(self.lock.clone(), "release", vec![]).into()
    }

    fn fix(&self) -> Step {
        SequenceAction::method(self.lock.clone(), "fix", vec![]).into()
    }
}

#[async_trait]
impl SequenceGenerator for LockedGenerator {
    async fn generate(&self, target: &Value) -> SeqResult<Sequence> {
        let restore = match &self.lock_value {
            Some(value) => value.clone(),
            None => self.lock.read().await.map_err(|e| {
                SeqError::Validation(format!(
                    "cannot read current position of {}: {:#}",
                    self.lock.name(),
                    e
                ))
            })?,
        };

        let mut sequence = Sequence::new();
        if self.keep_fixed {
            sequence.push(self.release());
        }
        sequence.push(SequenceAction::move_to(self.lock.clone(), self.unlock_value.clone()).into());
        if self.keep_fixed {
            sequence.push(self.fix());
        }
        sequence.push(SequenceAction::move_to(self.device.clone(), target.clone()).into());
        if self.keep_fixed {
            sequence.push(self.release());
        }
        sequence.push(SequenceAction::move_to(self.lock.clone(), restore).into());
        if self.keep_fixed {
            sequence.push(self.fix());
        }
        Ok(sequence)
    }
}

/// Builder for [`LockedDevice`].
pub struct LockedDeviceBuilder {
    name: String,
    device: Arc<dyn Device>,
    lock: Arc<dyn Device>,
    unlock_value: Value,
    lock_value: Option<Value>,
    keep_fixed: bool,
}

impl LockedDeviceBuilder {
    pub fn new(
        name: impl Into<String>,
        device: Arc<dyn Device>,
        lock: Arc<dyn Device>,
        unlock_value: impl Into<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            device,
            lock,
            unlock_value: unlock_value.into(),
            lock_value: None,
            keep_fixed: false,
        }
    }

    /// Value for the lock after the movement. Default: the position the lock
    /// had before the run.
    pub fn lock_value(mut self, value: impl Into<Value>) -> Self {
        self.lock_value = Some(value.into());
        self
    }

    /// Keep the lock fixed whenever it is not itself moving.
    pub fn keep_fixed(mut self) -> Self {
        self.keep_fixed = true;
        self
    }

    pub fn build(self) -> LockedDevice {
        let generator = LockedGenerator {
            device: self.device.clone(),
            lock: self.lock.clone(),
            unlock_value: self.unlock_value,
            lock_value: self.lock_value,
            keep_fixed: self.keep_fixed,
        };
        let seq = SequencerBuilder::new(self.name, generator)
            .read_from(self.device.clone())
            .build();
        LockedDevice {
            seq,
            device: self.device,
            lock: self.lock,
        }
    }
}

/// A sequencing device wrapping a main device protected by a lock.
///
/// Implements [`Device`] itself, so a locked device can appear as a target in
/// another sequence.
pub struct LockedDevice {
    seq: SequencerDevice,
    device: Arc<dyn Device>,
    lock: Arc<dyn Device>,
}

impl LockedDevice {
    pub fn busy(&self) -> bool {
        self.seq.busy()
    }

    pub fn reset(&self) -> SeqResult<()> {
        self.seq.reset()
    }

    /// Block until the current run is terminal; fails with
    /// [`SeqError::Stopped`] if it was interrupted.
    pub async fn wait(&self) -> SeqResult<()> {
        self.seq.wait().await
    }
}

#[async_trait]
impl Device for LockedDevice {
    fn name(&self) -> &str {
        self.seq.name()
    }

    async fn is_allowed(&self, target: &Value) -> (bool, String) {
        self.device.is_allowed(target).await
    }

    async fn start(&self, target: Value) -> Result<()> {
        self.seq.start(target).await?;
        Ok(())
    }

    async fn is_completed(&self) -> Result<bool> {
        Ok(!self.seq.busy())
    }

    async fn finish(&self) -> Result<()> {
        self.seq.finish()?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.seq.stop();
        Ok(())
    }

    async fn read(&self) -> Result<Value> {
        self.device.read().await
    }

    /// Worst of the sequencer's own status and both attached devices.
    async fn status(&self) -> SeqStatus {
        self.seq
            .status()
            .await
            .worse(self.device.status().await)
            .worse(self.lock.status().await)
    }
}
