//! Blink patterns and their timing parameters

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// On-durations of one SOS cycle: three short, three long, three short
pub const SOS_SEQUENCE: [u64; 9] = [200, 200, 200, 600, 600, 600, 200, 200, 200];

/// Selectable blink pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Flip the torch every period
    #[default]
    Steady,
    /// Flash the torch every period with on-times taken from [`SOS_SEQUENCE`]
    Sos,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternKind::Steady => write!(f, "steady"),
            PatternKind::Sos => write!(f, "sos"),
        }
    }
}

impl FromStr for PatternKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "steady" => Ok(PatternKind::Steady),
            "sos" => Ok(PatternKind::Sos),
            other => Err(format!("unknown pattern {:?} (expected steady or sos)", other)),
        }
    }
}

/// Allowed range of operator periods, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodBounds {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl PeriodBounds {
    pub fn contains(&self, period_ms: u64) -> bool {
        period_ms > 0 && period_ms >= self.min_ms && period_ms <= self.max_ms
    }
}

impl Default for PeriodBounds {
    fn default() -> Self {
        Self {
            min_ms: 100,
            max_ms: 5000,
        }
    }
}

/// Pattern and period currently selected by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub kind: PatternKind,
    pub period_ms: u64,
}

impl Selection {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            kind: PatternKind::Steady,
            period_ms: 500,
        }
    }
}

/// How long an SOS flash stays lit.
///
/// The sequence value is capped at three quarters of the period so the
/// torch is dark for at least a quarter period before the next flash.
pub fn sos_on_duration(index: usize, period_ms: u64) -> Duration {
    let wanted = SOS_SEQUENCE[index % SOS_SEQUENCE.len()];
    let cap = (period_ms - period_ms / 4).max(1);
    Duration::from_millis(wanted.min(cap))
}
