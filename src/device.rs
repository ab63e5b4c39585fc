//! The target-object contract consumed by sequence actions.
//!
//! Anything a sequence moves, stops or polls implements [`Device`]. The trait
//! is deliberately small: the engine only needs to start an operation, poll it
//! for completion, optionally finalize it, and request a cooperative stop.
//! Everything else about the hardware stays inside the driver.
//!
//! All methods take `&self`; devices are shared as `Arc<dyn Device>` between
//! a running sequence and any external reader, so implementations use interior
//! mutability for their own state.

use crate::status::SeqStatus;
use crate::value::Value;
use anyhow::{bail, Result};
use async_trait::async_trait;

/// Contract for any object referenced by a sequence action.
///
/// Drivers report failures through `anyhow::Result`; the engine classifies
/// them into [`crate::SeqError`] variants at the call site.
#[async_trait]
pub trait Device: Send + Sync {
    /// Unique device identifier used in status texts and logs.
    fn name(&self) -> &str;

    /// Whether moving to `target` is currently permitted, with a reason when
    /// it is not. Default: always allowed.
    async fn is_allowed(&self, _target: &Value) -> (bool, String) {
        (true, String::new())
    }

    /// Initiate a move to `target`. Must not block for the duration of the
    /// motion; completion is polled via [`Device::is_completed`].
    async fn start(&self, target: Value) -> Result<()>;

    /// Non-blocking completion poll. An `Err` means the operation failed
    /// asynchronously (e.g. the axis went into fault).
    async fn is_completed(&self) -> Result<bool> {
        Ok(true)
    }

    /// Finalize hook invoked once after the device reports completion, e.g.
    /// to latch the final value. Default no-op.
    async fn finish(&self) -> Result<()> {
        Ok(())
    }

    /// Request cancellation of an in-flight operation. Only issued to devices
    /// whose action was constructed stoppable. Default no-op.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Current value of the device.
    async fn read(&self) -> Result<Value>;

    /// Device-local status, combined into the sequencer's synthesized status.
    async fn status(&self) -> SeqStatus {
        SeqStatus::idle()
    }

    /// Set a named configuration value.
    async fn set_param(&self, name: &str, _value: Value) -> Result<()> {
        bail!("{}: parameter {} is not supported", self.name(), name)
    }

    /// Read back a named configuration value.
    async fn read_param(&self, name: &str) -> Result<Value> {
        bail!("{}: parameter {} is not supported", self.name(), name)
    }

    /// Invoke a named method, e.g. `"release"` or `"home"`. Unknown methods
    /// surface as execution errors when the action runs.
    async fn call(&self, method: &str, _args: &[Value]) -> Result<Value> {
        bail!("{}: method {} is not supported", self.name(), method)
    }
}
