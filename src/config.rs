//! Configuration loading and management

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::controller::{PatternKind, PeriodBounds, Selection};

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// LED class directory scanned for a torch
    pub leds_root: PathBuf,

    /// Explicit LED to use instead of discovery
    pub led_name: Option<String>,

    /// Pattern and period selected at startup
    pub selection: Selection,

    /// Accepted operator periods
    pub bounds: PeriodBounds,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("torchd");

        let socket_path = lookup("TORCHD_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("torchd.sock"));

        let leds_root = lookup("TORCHD_LEDS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/sys/class/leds"));

        let led_name = lookup("TORCHD_LED").filter(|name| !name.trim().is_empty());

        let defaults = PeriodBounds::default();
        let bounds = PeriodBounds {
            min_ms: parse_ms(&lookup, "TORCHD_MIN_PERIOD_MS")?.unwrap_or(defaults.min_ms),
            max_ms: parse_ms(&lookup, "TORCHD_MAX_PERIOD_MS")?.unwrap_or(defaults.max_ms),
        };
        if bounds.min_ms == 0 || bounds.min_ms > bounds.max_ms {
            bail!(
                "invalid period bounds {}..={}ms",
                bounds.min_ms,
                bounds.max_ms
            );
        }

        let kind = match lookup("TORCHD_PATTERN") {
            Some(raw) => raw
                .parse::<PatternKind>()
                .map_err(anyhow::Error::msg)
                .context("invalid TORCHD_PATTERN")?,
            None => PatternKind::default(),
        };
        let period_ms = parse_ms(&lookup, "TORCHD_PERIOD_MS")?
            .unwrap_or_else(|| Selection::default().period_ms.clamp(bounds.min_ms, bounds.max_ms));
        if !bounds.contains(period_ms) {
            bail!(
                "TORCHD_PERIOD_MS {} is outside {}..={}ms",
                period_ms,
                bounds.min_ms,
                bounds.max_ms
            );
        }

        Ok(Self {
            socket_path,
            data_dir,
            leds_root,
            led_name,
            selection: Selection { kind, period_ms },
            bounds,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn parse_ms(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .with_context(|| format!("invalid {key}: {raw:?}"))
        })
        .transpose()
}
