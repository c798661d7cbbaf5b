//! Torch controller module
//!
//! A single controller owns the torch session and moves between four
//! phases:
//! - Disabled: the device has no torch, the trigger never works
//! - Idle: no session
//! - Acquiring: a session has been requested and not yet delivered
//! - Active: session held, a blink pattern (Steady or SOS) is running

mod handle;
mod machine;
mod pattern;
mod timer;

pub use handle::ControllerHandle;
pub use machine::{ControlError, TorchController, TorchStatus};
#[cfg(test)]
pub use machine::PhaseKind;
pub use pattern::{PatternKind, PeriodBounds, Selection};
