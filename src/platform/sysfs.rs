//! Linux LED class backend
//!
//! Flash LEDs show up under `/sys/class/leds/<name>/` with a `brightness`
//! and a `max_brightness` attribute. A session lights the LED by writing
//! `max_brightness` into `brightness` and darkens it by writing `0`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{CaptureRequest, CaptureSession, Facing, PlatformError, TorchPlatform};

/// Torch provider backed by the LED class directory
#[derive(Debug, Clone)]
pub struct SysfsTorch {
    root: PathBuf,
    /// Explicit LED name, bypassing name-based discovery
    preferred: Option<String>,
}

impl SysfsTorch {
    pub fn new(root: impl Into<PathBuf>, preferred: Option<String>) -> Self {
        Self {
            root: root.into(),
            preferred,
        }
    }

    /// Names of all LEDs usable as a torch, sorted
    fn candidates(&self) -> Vec<String> {
        if let Some(name) = &self.preferred {
            return if has_attributes(&self.root.join(name)) {
                vec![name.clone()]
            } else {
                Vec::new()
            };
        }

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(root = ?self.root, ?e, "LED class directory not readable");
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| is_torch_name(name))
            .filter(|name| has_attributes(&self.root.join(name)))
            .collect();
        names.sort();
        names
    }

    fn find_device(&self, facing: Facing) -> Result<String, PlatformError> {
        let candidates = self.candidates();
        if candidates.is_empty() {
            // The torch vanished after the capability check
            return Err(PlatformError::Unsupported);
        }

        candidates
            .into_iter()
            .find(|name| self.preferred.is_some() || faces(name, facing))
            .ok_or_else(|| {
                PlatformError::NoDevice(format!("no {:?}-facing torch under {}", facing, self.root.display()))
            })
    }
}

#[async_trait]
impl TorchPlatform for SysfsTorch {
    fn supports_torch(&self) -> bool {
        !self.candidates().is_empty()
    }

    async fn acquire(&self, request: CaptureRequest) -> Result<Box<dyn CaptureSession>, PlatformError> {
        let name = self.find_device(request.facing)?;
        let dir = self.root.join(&name);

        let max_path = dir.join("max_brightness");
        let raw = tokio::fs::read_to_string(&max_path)
            .await
            .map_err(|e| map_io(e, &max_path))?;
        let max: u32 = raw
            .trim()
            .parse()
            .map_err(|_| PlatformError::NoDevice(format!("{name} reports max_brightness {:?}", raw.trim())))?;
        if max == 0 {
            return Err(PlatformError::NoDevice(format!("{name} cannot be lit")));
        }

        let mut session = SysfsSession {
            name,
            brightness: dir.join("brightness"),
            max,
            released: false,
        };
        session.set_torch(request.torch)?;

        info!(led = %session.name, max, "torch session acquired");
        Ok(Box::new(session))
    }
}

/// One acquired LED
struct SysfsSession {
    name: String,
    brightness: PathBuf,
    max: u32,
    released: bool,
}

impl SysfsSession {
    /// Attribute writes are a few bytes and done inline on the controller task
    fn write_level(&self, level: u32) -> Result<(), PlatformError> {
        std::fs::write(&self.brightness, format!("{level}\n")).map_err(|e| map_io(e, &self.brightness))
    }
}

impl CaptureSession for SysfsSession {
    fn set_torch(&mut self, on: bool) -> Result<(), PlatformError> {
        if self.released {
            return Ok(());
        }
        self.write_level(if on { self.max } else { 0 })
    }

    fn stop_tracks(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Err(e) = self.write_level(0) {
            warn!(led = %self.name, ?e, "failed to darken torch on release");
        }
        info!(led = %self.name, "torch session released");
    }

    fn label(&self) -> &str {
        &self.name
    }
}

impl Drop for SysfsSession {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

fn is_torch_name(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.contains("torch") || name.contains("flash")
}

fn faces(name: &str, facing: Facing) -> bool {
    let front = name.to_ascii_lowercase().contains("front");
    match facing {
        Facing::Environment => !front,
        Facing::User => front,
    }
}

fn has_attributes(dir: &Path) -> bool {
    dir.join("brightness").is_file() && dir.join("max_brightness").is_file()
}

fn map_io(err: std::io::Error, path: &Path) -> PlatformError {
    match err.kind() {
        ErrorKind::PermissionDenied => PlatformError::PermissionDenied(path.display().to_string()),
        ErrorKind::NotFound => PlatformError::NoDevice(path.display().to_string()),
        _ => PlatformError::Io(err),
    }
}
