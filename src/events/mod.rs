//! Events module for controller transitions
//!
//! Provides structured event types pushed to UI clients: session start and
//! stop, torch writes, trigger label changes and user-visible notices.

use serde::{Deserialize, Serialize};

use crate::controller::PatternKind;

/// Text shown on the toggle trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Start,
    Stop,
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Start => write!(f, "Start"),
            Label::Stop => write!(f, "Stop"),
        }
    }
}

/// User-visible notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// The device has no torch; the trigger is disabled for good
    CapabilityUnsupported,
    /// A session could not be acquired
    AcquisitionFailed { reason: String },
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::CapabilityUnsupported => {
                write!(f, "Flashlight control is not supported on this device.")
            }
            Notice::AcquisitionFailed { reason } => write!(
                f,
                "Could not access the flashlight ({}). Please ensure permissions are granted.",
                reason
            ),
        }
    }
}

/// Events emitted by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TorchEvent {
    /// A torch session was acquired
    SessionStarted {
        /// Device backing the session
        device: String,
    },

    /// The session was released
    SessionStopped {
        /// How long the session was held
        duration_ms: u64,
    },

    /// The torch was switched by a pattern
    TorchChanged { on: bool },

    /// The trigger label changed
    LabelChanged { label: Label },

    /// A blink pattern was (re)armed
    PatternApplied { pattern: PatternKind, period_ms: u64 },

    /// The trigger has been disabled
    TriggerDisabled,

    /// A notice should be shown to the operator
    Notice { notice: Notice },
}

impl std::fmt::Display for TorchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TorchEvent::SessionStarted { device } => write!(f, "SESSION_STARTED ({})", device),
            TorchEvent::SessionStopped { duration_ms } => {
                write!(f, "SESSION_STOPPED ({}ms)", duration_ms)
            }
            TorchEvent::TorchChanged { on } => {
                write!(f, "TORCH_{}", if *on { "ON" } else { "OFF" })
            }
            TorchEvent::LabelChanged { label } => write!(f, "LABEL_CHANGED ({})", label),
            TorchEvent::PatternApplied { pattern, period_ms } => {
                write!(f, "PATTERN_APPLIED ({} every {}ms)", pattern, period_ms)
            }
            TorchEvent::TriggerDisabled => write!(f, "TRIGGER_DISABLED"),
            TorchEvent::Notice { notice } => write!(f, "NOTICE ({})", notice),
        }
    }
}
