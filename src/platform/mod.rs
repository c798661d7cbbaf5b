//! Torch capability provider
//!
//! The controller only talks to the hardware through [`TorchPlatform`]
//! (capability query and session acquisition) and the [`CaptureSession`]
//! it hands back (torch writes and release). The production backend is the
//! Linux LED class in [`sysfs`].

#[cfg(test)]
pub mod mock;
mod sysfs;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use sysfs::SysfsTorch;

/// Which side of the device the torch must face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    /// Rear camera side
    Environment,
    /// Screen side
    User,
}

/// Parameters of a session request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub facing: Facing,
    /// Whether the torch should be lit as soon as the session is acquired
    pub torch: bool,
}

impl CaptureRequest {
    /// Rear-facing session with the torch lit
    pub fn rear_torch() -> Self {
        Self {
            facing: Facing::Environment,
            torch: true,
        }
    }
}

/// Errors raised by the capability provider
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("torch control is not supported on this device")]
    Unsupported,

    #[error("access to {0} was denied")]
    PermissionDenied(String),

    #[error("no usable torch device: {0}")]
    NoDevice(String),

    #[error("torch i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of torch sessions
#[async_trait]
pub trait TorchPlatform: Send + Sync {
    /// Whether the host exposes torch control at all
    fn supports_torch(&self) -> bool;

    /// Acquire an exclusive session matching `request`
    async fn acquire(&self, request: CaptureRequest) -> Result<Box<dyn CaptureSession>, PlatformError>;
}

/// An acquired torch session, exclusively owned by its holder
pub trait CaptureSession: Send {
    /// Apply the torch feature state
    fn set_torch(&mut self, on: bool) -> Result<(), PlatformError>;

    /// Release every track of the session. Calling it again is a no-op.
    fn stop_tracks(&mut self);

    /// Short human-readable name of the underlying device
    fn label(&self) -> &str;
}
