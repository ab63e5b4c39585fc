//! labseq: a generic hardware sequencing engine for laboratory instrument
//! control.
//!
//! A complex hardware movement — change a monochromator crystal, switch a
//! detector position — decomposes into an ordered list of primitive steps.
//! This crate executes such sequences with retry, abort and stop semantics:
//!
//! - [`SequenceAction`]: one primitive operation (move, set-parameter, call,
//!   method-call, sleep, no-op).
//! - [`Step`]: a group of actions executed in parallel; the atomic unit of
//!   sequential ordering.
//! - [`Sequence`]: the ordered list of steps submitted to the engine.
//! - [`SequencerDevice`]: the public component translating a target value
//!   into a sequence (via a pluggable [`SequenceGenerator`]) and exposing
//!   start/stop/status/reset.
//! - [`SequenceHooks`]: the injected failure strategy; by default every
//!   failure aborts the sequence.
//!
//! # Control Flow
//!
//! ```text
//! start(target) -> generate Sequence -> worker task runs steps in order
//!                                       (actions within a step in parallel)
//!                                       -> caller polls status() or wait()s
//! ```
//!
//! # Concurrency
//!
//! Each sequencer runs its sequence on one dedicated Tokio task. Stops are
//! cooperative: observed at step boundaries and between completion sweeps,
//! never mid-command, and only actions marked stoppable forward the stop to
//! their device.

pub mod action;
pub mod device;
pub mod devices;
pub mod error;
pub mod hooks;
mod interpreter;
pub mod sequencer;
pub mod status;
pub mod value;

pub use action::{CallFn, Sequence, SequenceAction, Step};
pub use device::Device;
pub use devices::{LockedDevice, LockedDeviceBuilder, MockMotor};
pub use error::{SeqError, SeqResult};
pub use hooks::{
    AbortOnFailure, CheckOutcome, RetryOutcome, RunRecovery, SequenceHooks, WaitRecovery,
};
pub use sequencer::{SequenceGenerator, SequencerBuilder, SequencerDevice};
pub use status::{SeqStatus, StatusCode};
pub use value::Value;
