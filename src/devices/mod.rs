//! Built-in devices: a simulated positioner and the locked-device sequencer.

pub mod locked;
pub mod mock;

pub use locked::{LockedDevice, LockedDeviceBuilder};
pub use mock::MockMotor;
